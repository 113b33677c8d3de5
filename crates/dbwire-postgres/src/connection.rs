//! PostgreSQL driver.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use dbwire_core::error::ConnectionErrorKind;
use dbwire_core::{
    ColumnDetail, ColumnInfo, ConnectionConfig, ConnectionState, DatabaseConnection, Error,
    QueryResult, Result, TableInfo, TcpTransport, TlsOptions, Transport, Value,
};

use crate::auth::{PgScram, md5_password, select_mechanism};
use crate::catalog;
use crate::oid;
use crate::protocol::{
    AuthRequest, BackendMessage, ErrorFields, FieldDescription, FrontendMessage, MessageReader,
    MessageWriter, PROTOCOL_VERSION,
};

/// Cancellation key sent by the server after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: i32,
    pub secret_key: i32,
}

/// A PostgreSQL connection speaking the simple query protocol.
///
/// Generic over the [`Transport`] so tests can script the server side.
pub struct PgConnection<T: Transport = TcpTransport> {
    config: ConnectionConfig,
    transport: T,
    state: ConnectionState,
    reader: MessageReader,
    writer: MessageWriter,
    parameters: HashMap<String, String>,
    backend_key: Option<BackendKey>,
    client_nonce: Option<String>,
}

impl<T: Transport> fmt::Debug for PgConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("state", &self.state)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("backend_key", &self.backend_key)
            .finish_non_exhaustive()
    }
}

impl PgConnection<TcpTransport> {
    /// Driver over a plain TCP transport. Nothing is sent until `connect`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, TcpTransport::new())
    }
}

impl<T: Transport> PgConnection<T> {
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            reader: MessageReader::new(),
            writer: MessageWriter::new(),
            parameters: HashMap::new(),
            backend_key: None,
            client_nonce: None,
        }
    }

    /// Fix the SCRAM client nonce instead of drawing a random one.
    #[doc(hidden)]
    pub fn with_client_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.client_nonce = Some(nonce.into());
        self
    }

    /// `ParameterStatus` values reported since connect (`server_version`, ...).
    pub fn server_parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ==================== Startup + auth ====================

    async fn establish(&mut self) -> Result<()> {
        let timeout = self.config.connect_timeout_duration();
        self.transport
            .connect(&self.config.host, self.config.port, None, timeout)
            .await?;

        if let Some(options) = self.config.tls_options() {
            self.negotiate_tls(&options).await?;
        }

        let mut params = vec![("user".to_string(), self.config.username.clone())];
        if !self.config.database.is_empty() {
            params.push(("database".to_string(), self.config.database.clone()));
        }
        params.push(("client_encoding".to_string(), "UTF8".to_string()));
        self.send(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params,
        })
        .await?;

        self.read_startup().await
    }

    async fn negotiate_tls(&mut self, options: &TlsOptions) -> Result<()> {
        self.send(&FrontendMessage::SSLRequest).await?;

        let answer = loop {
            if let Some(byte) = self.reader.take_byte() {
                break byte;
            }
            let chunk = self.transport.receive().await?;
            self.reader.feed(&chunk);
        };

        match answer {
            b'S' => {
                if self.reader.buffered() > 0 {
                    return Err(Error::protocol(
                        "server sent unencrypted data after accepting SSLRequest",
                    ));
                }
                self.transport
                    .upgrade_tls(&self.config.host, options)
                    .await?;
                tracing::debug!(host = %self.config.host, "upgraded to TLS");
                Ok(())
            }
            b'N' => Err(Error::connection(
                ConnectionErrorKind::Ssl,
                "server does not support TLS",
            )),
            other => Err(Error::protocol(format!(
                "unexpected SSLRequest response 0x{other:02x}"
            ))),
        }
    }

    /// Read frames until `ReadyForQuery`, answering authentication requests.
    async fn read_startup(&mut self) -> Result<()> {
        let mut scram: Option<SaslExchange> = None;
        loop {
            match self.receive_message().await? {
                BackendMessage::Authentication(request) => {
                    self.authenticate(request, &mut scram).await?;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_key = Some(BackendKey {
                        process_id,
                        secret_key,
                    });
                }
                BackendMessage::ReadyForQuery(_) => {
                    ensure_server_verified(scram.as_ref())?;
                    return Ok(());
                }
                BackendMessage::ErrorResponse(fields) => return Err(startup_error(fields)),
                other => tracing::trace!(?other, "ignoring startup frame"),
            }
        }
    }

    async fn authenticate(
        &mut self,
        request: AuthRequest,
        scram: &mut Option<SaslExchange>,
    ) -> Result<()> {
        match request {
            AuthRequest::Ok => {
                ensure_server_verified(scram.as_ref())?;
                tracing::debug!(user = %self.config.username, "authenticated");
                Ok(())
            }
            AuthRequest::CleartextPassword => {
                tracing::debug!("server requested cleartext password");
                let password = self.require_password()?.to_string();
                self.send(&FrontendMessage::PasswordMessage(password)).await
            }
            AuthRequest::Md5Password(salt) => {
                tracing::debug!("server requested MD5 password");
                let hashed = md5_password(&self.config.username, self.require_password()?, salt);
                self.send(&FrontendMessage::PasswordMessage(hashed)).await
            }
            AuthRequest::Sasl(mechanisms) => {
                let Some(mechanism) = select_mechanism(&mechanisms) else {
                    return Err(Error::auth(format!(
                        "unsupported SASL mechanisms: {}",
                        mechanisms.join(", ")
                    )));
                };
                self.require_password()?;
                tracing::debug!(mechanism, "starting SASL exchange");

                let session = match &self.client_nonce {
                    Some(nonce) => PgScram::with_nonce(&self.config.username, nonce),
                    None => PgScram::new(&self.config.username),
                };
                let client_first = session.client_first_message();
                *scram = Some(SaslExchange {
                    session,
                    verified: false,
                });
                self.send(&FrontendMessage::SASLInitialResponse {
                    mechanism: mechanism.to_string(),
                    data: client_first.into_bytes(),
                })
                .await
            }
            AuthRequest::SaslContinue(server_first) => {
                let exchange = scram
                    .as_mut()
                    .ok_or_else(|| Error::protocol("SASL continue before SASL start"))?;
                let client_final =
                    exchange.session.handle_server_first(self.config.password_str().as_bytes(), &server_first)?;
                self.send(&FrontendMessage::SASLResponse(client_final.into_bytes()))
                    .await
            }
            AuthRequest::SaslFinal(server_final) => {
                let exchange = scram
                    .as_mut()
                    .ok_or_else(|| Error::protocol("SASL final before SASL start"))?;
                exchange.session.verify_server_final(&server_final)?;
                exchange.verified = true;
                tracing::debug!("server signature verified");
                Ok(())
            }
            AuthRequest::Unsupported(code) => Err(Error::auth(format!(
                "unsupported authentication method (code {code})"
            ))),
        }
    }

    fn require_password(&self) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| Error::auth("server requested a password but none was supplied"))
    }

    // ==================== Query ====================

    async fn simple_query(&mut self, sql: &str) -> Result<QueryResult> {
        self.send(&FrontendMessage::Query(sql.to_string())).await?;

        let mut columns: Vec<ColumnInfo> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut has_result_set = false;
        let mut command = String::new();
        let mut server_error = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription(fields) => {
                    columns = fields.iter().map(column_info).collect();
                    rows.clear();
                    has_result_set = true;
                }
                BackendMessage::DataRow(cells) => {
                    rows.push(cells.into_iter().map(cell_value).collect());
                }
                BackendMessage::CommandComplete(tag) => command = tag,
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(fields) => {
                    // The server still sends ReadyForQuery; keep reading so
                    // the connection stays in step.
                    server_error.get_or_insert(fields.into_error());
                }
                BackendMessage::NoticeResponse(fields) => {
                    tracing::debug!(message = %fields.message, "server notice");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery(_) => break,
                other => tracing::warn!(?other, "ignoring unexpected frame during query"),
            }
        }

        if let Some(err) = server_error {
            return Err(err);
        }

        let row_count = if has_result_set {
            rows.len() as u64
        } else {
            affected_rows(&command)
        };
        let mut result = QueryResult::from_rows(columns, rows, command);
        result.row_count = row_count;
        Ok(result)
    }

    // ==================== I/O ====================

    async fn send(&mut self, msg: &FrontendMessage) -> Result<()> {
        let bytes = self.writer.write(msg);
        tracing::trace!(len = bytes.len(), "send");
        self.transport.send(bytes).await
    }

    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            if let Some(msg) = self.reader.next_message()? {
                return Ok(msg);
            }
            let chunk = self.transport.receive().await?;
            tracing::trace!(len = chunk.len(), "received");
            self.reader.feed(&chunk);
        }
    }

    /// Record a failure. Server-reported query errors leave the connection
    /// usable; anything else tears it down.
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
        self.reader.clear();
        if let Err(e) = self.transport.disconnect().await {
            tracing::trace!(error = %e, "disconnect after failure");
        }
        err
    }
}

impl<T: Transport> DatabaseConnection for PgConnection<T> {
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
        self.reader.clear();
        self.parameters.clear();
        self.backend_key = None;

        match self.establish().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            // Any failure during startup ends the attempt, server errors included.
            Err(err) => Err(self.abort(err).await),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.state.is_connected() && self.transport.is_connected() {
            if let Err(e) = self.send(&FrontendMessage::Terminate).await {
                tracing::trace!(error = %e, "Terminate not delivered");
            }
        }
        self.transport.disconnect().await?;
        self.reader.clear();
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        if !self.state.is_connected() {
            return Err(Error::not_connected());
        }
        let started = Instant::now();
        match self.simple_query(sql).await {
            Ok(result) => Ok(result.with_execution_time(started.elapsed())),
            Err(err) => Err(self.fail(err).await.with_sql(sql)),
        }
    }

    async fn list_databases(&mut self) -> Result<Vec<String>> {
        Ok(self.query(catalog::LIST_DATABASES).await?.first_column_strings())
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        let sql = catalog::list_tables(schema.unwrap_or(catalog::DEFAULT_SCHEMA));
        let result = self.query(&sql).await?;
        Ok(TableInfo::from_catalog_rows(&result))
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDetail>> {
        let result = self.query(&catalog::describe_table(schema, table)).await?;
        Ok(ColumnDetail::from_catalog_rows(&result))
    }
}

/// A SCRAM exchange in progress during startup.
struct SaslExchange {
    session: PgScram,
    verified: bool,
}

/// Once SASL has started, the server must prove the password before the
/// session may proceed.
fn ensure_server_verified(exchange: Option<&SaslExchange>) -> Result<()> {
    match exchange {
        Some(exchange) if !exchange.verified => Err(Error::auth(
            "server completed SASL authentication without a server signature",
        )),
        _ => Ok(()),
    }
}

/// Startup errors in SQLSTATE class 28 (invalid authorization) are
/// authentication failures.
fn startup_error(fields: ErrorFields) -> Error {
    if fields.code.starts_with("28") {
        Error::auth(fields.message)
    } else {
        fields.into_error()
    }
}

fn column_info(field: &FieldDescription) -> ColumnInfo {
    ColumnInfo::new(field.name.clone(), oid::type_name(field.type_oid)).with_table_id(field.table_oid)
}

fn cell_value(cell: Option<Vec<u8>>) -> Value {
    match cell {
        None => Value::Null,
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
    }
}

/// Trailing count of a command tag (`INSERT 0 5` -> 5, `CREATE TABLE` -> 0).
fn affected_rows(tag: &str) -> u64 {
    tag.split_whitespace()
        .last()
        .and_then(|last| last.parse().ok())
        .unwrap_or(0)
}
