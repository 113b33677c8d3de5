//! MySQL / MariaDB driver.

use std::fmt;
use std::time::Instant;

use dbwire_core::error::ConnectionErrorKind;
use dbwire_core::{
    ColumnDetail, ConnectionConfig, ConnectionState, DatabaseConnection, Error, QueryResult,
    Result, TableInfo, TcpTransport, Transport, Value,
};

use crate::auth::{AuthPlugin, caching_sha2, clear_password};
use crate::catalog;
use crate::handshake::{AuthSwitch, Handshake, HandshakeResponse, ssl_request};
use crate::protocol::{
    Command, EofPacket, ErrPacket, OkPacket, Packet, PacketBuffer, PacketReader, build_packets,
    capabilities, server_status,
};
use crate::types::ColumnDef;

/// Identity reported in the server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub connection_id: u32,
}

/// A MySQL or MariaDB connection using the text protocol.
pub struct MySqlConnection<T: Transport = TcpTransport> {
    config: ConnectionConfig,
    transport: T,
    state: ConnectionState,
    buffer: PacketBuffer,
    /// Sequence number for the next packet of the current command
    sequence_id: u8,
    /// Capabilities both sides agreed on
    capabilities: u32,
    server: Option<ServerInfo>,
    status_flags: u16,
    last_insert_id: u64,
}

impl<T: Transport> fmt::Debug for MySqlConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection<TcpTransport> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, TcpTransport::new())
    }
}

impl<T: Transport> MySqlConnection<T> {
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            buffer: PacketBuffer::new(),
            sequence_id: 0,
            capabilities: 0,
            server: None,
            status_flags: 0,
            last_insert_id: 0,
        }
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// `LAST_INSERT_ID()` reported by the most recent OK packet.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ==================== Connection phase ====================

    async fn establish(&mut self) -> Result<()> {
        let timeout = self.config.connect_timeout_duration();
        self.transport
            .connect(&self.config.host, self.config.port, None, timeout)
            .await?;

        let greeting = self.read_packet().await?;
        if greeting.is_err() {
            return Err(ErrPacket::parse(&greeting.payload)?.into_error());
        }
        let handshake = Handshake::parse(&greeting.payload)?;
        tracing::debug!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            plugin = %handshake.auth_plugin,
            "received handshake"
        );

        let database = (!self.config.database.is_empty()).then(|| self.config.database.clone());
        let mut client_flags = capabilities::DEFAULT_CLIENT_FLAGS;
        if database.is_some() {
            client_flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }

        if let Some(options) = self.config.tls_options() {
            if !handshake.supports(capabilities::CLIENT_SSL) {
                return Err(Error::connection(
                    ConnectionErrorKind::Ssl,
                    "server does not support TLS",
                ));
            }
            client_flags |= capabilities::CLIENT_SSL;
            self.send_packet(&ssl_request(client_flags)).await?;
            self.transport
                .upgrade_tls(&self.config.host, &options)
                .await?;
            tracing::debug!(host = %self.config.host, "upgraded to TLS");
        }
        self.capabilities = client_flags & handshake.capabilities;
        self.status_flags = handshake.status_flags;
        self.server = Some(ServerInfo {
            version: handshake.server_version.clone(),
            connection_id: handshake.connection_id,
        });

        let plugin = AuthPlugin::from_name(&handshake.auth_plugin).ok_or_else(|| {
            Error::auth(format!(
                "unsupported authentication plugin '{}'",
                handshake.auth_plugin
            ))
        })?;
        let auth_response = self.plugin_response(plugin, &handshake.scramble)?;
        let response = HandshakeResponse {
            capabilities: client_flags,
            username: &self.config.username,
            auth_response: &auth_response,
            database: database.as_deref(),
            auth_plugin: plugin.name(),
        }
        .encode()?;
        self.send_packet(&response).await?;

        self.authenticate(plugin).await
    }

    fn plugin_response(&self, plugin: AuthPlugin, scramble: &[u8]) -> Result<Vec<u8>> {
        if plugin.requires_secure_transport() && !self.transport.is_secure() {
            return Err(Error::auth(format!("{} requires SSL", plugin.name())));
        }
        Ok(plugin.response(self.config.password_str(), scramble))
    }

    /// Read auth results until the server's OK, following plugin switches.
    async fn authenticate(&mut self, mut plugin: AuthPlugin) -> Result<()> {
        loop {
            let packet = self.read_packet().await?;
            match packet.first_byte() {
                Some(0x00) => {
                    let ok = OkPacket::parse(&packet.payload)?;
                    self.status_flags = ok.status_flags;
                    tracing::debug!(user = %self.config.username, plugin = plugin.name(), "authenticated");
                    return Ok(());
                }
                Some(0xFF) => {
                    let err = ErrPacket::parse(&packet.payload)?;
                    return Err(Error::auth(err.error_message));
                }
                Some(0xFE) => {
                    let switch = AuthSwitch::parse(&packet.payload)?;
                    plugin = AuthPlugin::from_name(&switch.plugin).ok_or_else(|| {
                        Error::auth(format!(
                            "unsupported authentication plugin '{}'",
                            switch.plugin
                        ))
                    })?;
                    tracing::debug!(plugin = plugin.name(), "auth switch requested");
                    let response = self.plugin_response(plugin, &switch.scramble)?;
                    self.send_packet(&response).await?;
                }
                Some(0x01) => match (plugin, packet.payload.get(1).copied()) {
                    (AuthPlugin::CachingSha2Password, Some(caching_sha2::FAST_AUTH_SUCCESS)) => {
                        tracing::debug!("caching_sha2_password fast auth succeeded");
                    }
                    (AuthPlugin::CachingSha2Password, Some(caching_sha2::PERFORM_FULL_AUTH)) => {
                        if !self.transport.is_secure() {
                            return Err(Error::auth(
                                "caching_sha2_password full authentication requires SSL",
                            ));
                        }
                        tracing::debug!("caching_sha2_password full auth over TLS");
                        let password = clear_password(self.config.password_str());
                        self.send_packet(&password).await?;
                    }
                    (_, status) => {
                        return Err(Error::protocol(format!(
                            "unexpected auth data {status:?} for {}",
                            plugin.name()
                        )));
                    }
                },
                other => {
                    return Err(Error::protocol(format!(
                        "unexpected packet {other:?} during authentication"
                    )));
                }
            }
        }
    }

    // ==================== Command phase ====================

    async fn text_query(&mut self, sql: &str) -> Result<QueryResult> {
        self.sequence_id = 0;
        let mut payload = Vec::with_capacity(sql.len() + 1);
        payload.push(Command::Query as u8);
        payload.extend_from_slice(sql.as_bytes());
        self.send_packet(&payload).await?;

        let mut result_set: Option<QueryResult> = None;
        let mut affected_rows = 0;
        loop {
            let packet = self.read_packet().await?;
            let status = match packet.first_byte() {
                Some(0xFF) => return Err(ErrPacket::parse(&packet.payload)?.into_error()),
                Some(0x00) => {
                    let ok = OkPacket::parse(&packet.payload)?;
                    affected_rows = ok.affected_rows;
                    self.last_insert_id = ok.last_insert_id;
                    ok.status_flags
                }
                Some(0xFB) => {
                    // Decline the file request with an empty packet; the
                    // server then ends the statement.
                    self.send_packet(&[]).await?;
                    let reply = self.read_packet().await?;
                    tracing::debug!(reply = ?reply.first_byte(), "declined LOCAL INFILE");
                    return Err(Error::server("LOCAL INFILE requests are not supported"));
                }
                Some(_) => {
                    let (set, status) = self.read_result_set(&packet.payload).await?;
                    result_set = Some(set);
                    status
                }
                None => return Err(Error::protocol("empty response packet")),
            };
            self.status_flags = status;
            if status & server_status::SERVER_MORE_RESULTS_EXISTS == 0 {
                break;
            }
        }

        let command = command_name(sql);
        Ok(match result_set {
            Some(mut set) => {
                set.command = command;
                set
            }
            None => {
                let mut result = QueryResult::empty(command);
                result.row_count = affected_rows;
                result
            }
        })
    }

    /// Column count, column definitions, optional EOF, rows, terminator.
    async fn read_result_set(&mut self, first: &[u8]) -> Result<(QueryResult, u16)> {
        let column_count = PacketReader::new(first)
            .read_lenenc_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::protocol("invalid column count"))?;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let packet = self.read_packet().await?;
            columns.push(ColumnDef::parse(&packet.payload)?.to_column_info());
        }

        let deprecate_eof = self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0;
        if !deprecate_eof {
            let marker = self.read_packet().await?;
            if !marker.is_eof() {
                return Err(Error::protocol("expected EOF after column definitions"));
            }
        }

        let mut rows = Vec::new();
        let status = loop {
            let packet = self.read_packet().await?;
            if packet.is_err() {
                return Err(ErrPacket::parse(&packet.payload)?.into_error());
            }
            if deprecate_eof && packet.is_eof_ok() {
                break OkPacket::parse(&packet.payload)?.status_flags;
            }
            if !deprecate_eof && packet.is_eof() {
                break EofPacket::parse(&packet.payload).status_flags;
            }
            rows.push(parse_text_row(&packet.payload, column_count)?);
        };

        Ok((QueryResult::from_rows(columns, rows, String::new()), status))
    }

    // ==================== I/O ====================

    async fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (bytes, next) = build_packets(payload, self.sequence_id);
        tracing::trace!(len = payload.len(), seq = self.sequence_id, "send packet");
        self.sequence_id = next;
        self.transport.send(&bytes).await
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.buffer.next_packet() {
                tracing::trace!(len = packet.payload.len(), seq = packet.sequence_id, "received packet");
                self.sequence_id = packet.sequence_id.wrapping_add(1);
                return Ok(packet);
            }
            let chunk = self.transport.receive().await?;
            self.buffer.feed(&chunk);
        }
    }

    async fn fail(&mut self, err: Error) -> Error {
        if matches!(err, Error::Query(_)) {
            err
        } else {
            self.abort(err).await
        }
    }

    async fn abort(&mut self, err: Error) -> Error {
        tracing::debug!(error = %err, "connection failed");
        self.state = ConnectionState::Error(err.to_string());
        self.buffer.clear();
        if let Err(e) = self.transport.disconnect().await {
            tracing::trace!(error = %e, "disconnect after failure");
        }
        err
    }
}

impl<T: Transport> DatabaseConnection for MySqlConnection<T> {
    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[tracing::instrument(level = "debug", skip(self), fields(host = %self.config.host, port = self.config.port))]
    async fn connect(&mut self) -> Result<()> {
        if self.state.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        self.buffer.clear();
        self.sequence_id = 0;
        self.server = None;

        match self.establish().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => Err(self.abort(err).await),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.state.is_connected() && self.transport.is_connected() {
            self.sequence_id = 0;
            if let Err(e) = self.send_packet(&[Command::Quit as u8]).await {
                tracing::trace!(error = %e, "COM_QUIT not delivered");
            }
        }
        self.transport.disconnect().await?;
        self.buffer.clear();
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        if !self.state.is_connected() {
            return Err(Error::not_connected());
        }
        let started = Instant::now();
        match self.text_query(sql).await {
            Ok(result) => Ok(result.with_execution_time(started.elapsed())),
            Err(err) => Err(self.fail(err).await.with_sql(sql)),
        }
    }

    async fn list_databases(&mut self) -> Result<Vec<String>> {
        Ok(self.query(catalog::LIST_DATABASES).await?.first_column_strings())
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        let configured = self.config.database.clone();
        let schema = schema.or((!configured.is_empty()).then_some(configured.as_str()));
        let result = self.query(&catalog::list_tables(schema)).await?;
        Ok(TableInfo::from_catalog_rows(&result))
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDetail>> {
        let result = self.query(&catalog::describe_table(schema, table)).await?;
        Ok(ColumnDetail::from_catalog_rows(&result))
    }
}

/// Text-protocol row: one length-encoded string or `0xFB` NULL per column.
fn parse_text_row(payload: &[u8], column_count: usize) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    (0..column_count)
        .map(|_| match reader.read_lenenc_cell() {
            Some(Some(bytes)) => Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned())),
            Some(None) => Ok(Value::Null),
            None => Err(Error::protocol("truncated row packet")),
        })
        .collect()
}

/// Leading keyword of the statement, upper-cased (`SELECT`, `INSERT`, ...).
fn command_name(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}
