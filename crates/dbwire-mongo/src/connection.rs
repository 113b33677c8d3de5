//! MongoDB driver.

use std::fmt;
use std::time::Instant;

use dbwire_bson::{BsonDocument, BsonValue};
use dbwire_core::{
    ColumnDetail, ConnectionConfig, ConnectionState, DatabaseConnection, Error, QueryResult,
    Result, TableInfo, TcpTransport, Transport,
};

use crate::auth::{AUTH_SOURCE, MongoScram, SaslReply, password_digest, sasl_continue, sasl_start};
use crate::catalog;
use crate::command::{check_reply, is_ok, prepare, reply_documents, to_query_result};
use crate::wire::{MessageReader, encode_op_msg};

/// Database commands run against when the configuration names none.
pub const DEFAULT_DATABASE: &str = "admin";

/// A MongoDB connection exchanging `OP_MSG` commands.
///
/// `query` takes a JSON command document such as
/// `{"find": "users", "filter": {"age": {"$gt": 30}}}`.
pub struct MongoConnection<T: Transport = TcpTransport> {
    config: ConnectionConfig,
    transport: T,
    state: ConnectionState,
    reader: MessageReader,
    request_id: i32,
    hello: Option<BsonDocument>,
    client_nonce: Option<String>,
}

impl<T: Transport> fmt::Debug for MongoConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConnection")
            .field("state", &self.state)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl MongoConnection<TcpTransport> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, TcpTransport::new())
    }
}

impl<T: Transport> MongoConnection<T> {
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            reader: MessageReader::new(),
            request_id: 0,
            hello: None,
            client_nonce: None,
        }
    }

    /// Fix the SCRAM client nonce instead of drawing a random one.
    #[doc(hidden)]
    pub fn with_client_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.client_nonce = Some(nonce.into());
        self
    }

    /// The server's `hello` reply from the last successful connect.
    pub fn hello(&self) -> Option<&BsonDocument> {
        self.hello.as_ref()
    }

    pub fn max_wire_version(&self) -> Option<i64> {
        self.hello
            .as_ref()
            .and_then(|hello| hello.get("maxWireVersion"))
            .and_then(BsonValue::as_i64)
    }

    /// Configured database, or `admin`.
    pub fn database(&self) -> &str {
        if self.config.database.is_empty() {
            DEFAULT_DATABASE
        } else {
            &self.config.database
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn establish(&mut self) -> Result<()> {
        let timeout = self.config.connect_timeout_duration();
        let tls = self.config.tls_options();
        self.transport
            .connect(&self.config.host, self.config.port, tls.as_ref(), timeout)
            .await?;

        let hello = BsonDocument::new()
            .with("hello", 1)
            .with("$db", AUTH_SOURCE);
        let reply = self.round_trip(&hello).await?;
        check_reply(&reply)?;
        tracing::debug!(
            max_wire_version = ?reply.get("maxWireVersion").and_then(BsonValue::as_i64),
            secure = self.transport.is_secure(),
            "hello accepted"
        );
        self.hello = Some(reply);

        if let Some(password) = self.config.password.clone() {
            self.authenticate(&password).await?;
        }
        Ok(())
    }

    /// SCRAM-SHA-1 conversation against the `admin` database.
    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let digest = password_digest(&self.config.username, password);
        let mut session = match self.client_nonce.as_deref() {
            Some(nonce) => MongoScram::with_nonce(&self.config.username, nonce),
            None => MongoScram::new(&self.config.username),
        };

        let reply = self
            .round_trip(&sasl_start(&session.client_first_message()))
            .await?;
        let server_first = sasl_step(&reply)?;
        let client_final = session.handle_server_first(digest.as_bytes(), &server_first.payload)?;

        let reply = self
            .round_trip(&sasl_continue(
                server_first.conversation_id,
                client_final.as_bytes(),
            ))
            .await?;
        let server_final = sasl_step(&reply)?;
        session.verify_server_final(&server_final.payload)?;

        if !server_final.done {
            let reply = self
                .round_trip(&sasl_continue(server_final.conversation_id, &[]))
                .await?;
            if !sasl_step(&reply)?.done {
                return Err(Error::protocol("SASL conversation did not complete"));
            }
        }
        tracing::debug!(user = %self.config.username, "authenticated with SCRAM-SHA-1");
        Ok(())
    }

    /// Send one command and wait for the reply addressed to it.
    async fn round_trip(&mut self, command: &BsonDocument) -> Result<BsonDocument> {
        self.request_id = self.request_id.wrapping_add(1);
        let request_id = self.request_id;
        let bytes = encode_op_msg(request_id, command)?;
        tracing::trace!(
            request_id,
            command = command.first_key().unwrap_or_default(),
            len = bytes.len(),
            "send OP_MSG"
        );
        self.transport.send(&bytes).await?;

        let reply = loop {
            if let Some(reply) = self.reader.next_reply()? {
                break reply;
            }
            let chunk = self.transport.receive().await?;
            self.reader.feed(&chunk);
        };
        if reply.header.response_to != request_id {
            return Err(Error::protocol(format!(
                "reply addressed to request {} while waiting for {}",
                reply.header.response_to, request_id
            )));
        }
        Ok(reply.document)
    }

    /// Run a command on a connected driver, mapping `ok: 0` to an error.
    async fn run(&mut self, command: BsonDocument) -> Result<BsonDocument> {
        if !self.state.is_connected() {
            return Err(Error::not_connected());
        }
        let outcome = match self.round_trip(&command).await {
            Ok(reply) => check_reply(&reply).map(|()| reply),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(reply) => Ok(reply),
            Err(err) => Err(self.fail(err).await),
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
        self.reader.clear();
        if let Err(e) = self.transport.disconnect().await {
            tracing::trace!(error = %e, "disconnect after failure");
        }
        err
    }
}

/// A SASL reply; `ok: 0` here is a failed login.
fn sasl_step(reply: &BsonDocument) -> Result<SaslReply> {
    if !is_ok(reply) {
        let message = reply.get_str("errmsg").unwrap_or("authentication failed");
        return Err(Error::auth(message));
    }
    SaslReply::parse(reply)
}

impl<T: Transport> DatabaseConnection for MongoConnection<T> {
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
        self.hello = None;

        match self.establish().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => Err(self.abort(err).await),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
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
        let command = prepare(sql, self.database()).map_err(|e| e.with_sql(sql))?;
        let name = command.first_key().unwrap_or_default().to_string();
        let reply = self.run(command).await.map_err(|e| e.with_sql(sql))?;
        let documents = reply_documents(&reply);
        Ok(to_query_result(&documents, &name).with_execution_time(started.elapsed()))
    }

    async fn list_databases(&mut self) -> Result<Vec<String>> {
        let reply = self.run(catalog::list_databases()).await?;
        Ok(catalog::database_names(&reply_documents(&reply)))
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        let database = schema.unwrap_or(self.database()).to_string();
        let reply = self.run(catalog::list_collections(&database)).await?;
        Ok(catalog::collections(&database, &reply_documents(&reply)))
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDetail>> {
        let database = if schema.is_empty() {
            self.database().to_string()
        } else {
            schema.to_string()
        };
        let reply = self.run(catalog::sample(&database, table)).await?;
        Ok(catalog::describe(&reply_documents(&reply)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_op_msg;
    use dbwire_bson::ObjectId;
    use dbwire_core::error::ConnectionErrorKind;
    use dbwire_core::{ConnectionType, ScriptedTransport, SentLog, Value};

    const CLIENT_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=JDntyRhQfJWIGDV27H0LEifJQLE=";
    const SERVER_FINAL: &str = "v=kDkyBj41ObwwX3x4AfqHbtVnO/4=";

    fn reply(response_to: i32, doc: &BsonDocument) -> Vec<u8> {
        let mut bytes = encode_op_msg(response_to + 1000, doc).unwrap();
        bytes[8..12].copy_from_slice(&response_to.to_le_bytes());
        bytes
    }

    fn hello_ok() -> BsonDocument {
        BsonDocument::new()
            .with("isWritablePrimary", true)
            .with("maxWireVersion", 21)
            .with("ok", 1.0)
    }

    fn sasl(payload: &str, done: bool) -> BsonDocument {
        BsonDocument::new()
            .with("conversationId", 1)
            .with("done", done)
            .with("payload", BsonValue::Binary(payload.as_bytes().to_vec()))
            .with("ok", 1.0)
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new(ConnectionType::Mongodb, "mongo.local", "shop", "user")
    }

    fn driver(
        config: ConnectionConfig,
        transport: ScriptedTransport,
    ) -> (MongoConnection<ScriptedTransport>, SentLog) {
        let log = transport.sent_log();
        let conn = MongoConnection::with_transport(config, transport).with_client_nonce(CLIENT_NONCE);
        (conn, log)
    }

    fn sent_command(log: &SentLog, index: usize) -> BsonDocument {
        decode_op_msg(&log.messages()[index]).unwrap().document
    }

    fn binary(doc: &BsonDocument, key: &str) -> Vec<u8> {
        match doc.get(key) {
            Some(BsonValue::Binary(bytes)) => bytes.clone(),
            other => panic!("expected binary {key}, found {other:?}"),
        }
    }

    fn users_batch() -> BsonDocument {
        let user = BsonDocument::new()
            .with("_id", ObjectId::parse_str("65a1b2c3d4e5f60718293a4b").unwrap())
            .with("name", "Ada")
            .with("age", 36)
            .with("email", BsonValue::Null);
        BsonDocument::new()
            .with(
                "cursor",
                BsonDocument::new()
                    .with("firstBatch", vec![BsonValue::Document(user)])
                    .with("id", BsonValue::Int64(0))
                    .with("ns", "shop.users"),
            )
            .with("ok", 1.0)
    }

    #[tokio::test]
    async fn test_connect_without_credentials_sends_hello_only() {
        let (mut conn, log) = driver(config(), ScriptedTransport::new().reply(reply(1, &hello_ok())));
        conn.connect().await.unwrap();

        assert_eq!(conn.state(), &ConnectionState::Connected);
        assert_eq!(conn.max_wire_version(), Some(21));
        assert_eq!(log.len(), 1);
        let hello = sent_command(&log, 0);
        assert_eq!(hello.first_key(), Some("hello"));
        assert_eq!(hello.get_str("$db"), Some("admin"));
    }

    #[tokio::test]
    async fn test_scram_sha1_conversation() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &sasl(SERVER_FIRST, false)))
            .reply(reply(3, &sasl(SERVER_FINAL, false)))
            .reply(reply(4, &sasl("", true)));
        let (mut conn, log) = driver(config().password("pencil"), transport);
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        assert_eq!(log.len(), 4);
        let start = sent_command(&log, 1);
        assert_eq!(start.get_str("mechanism"), Some("SCRAM-SHA-1"));
        assert_eq!(binary(&start, "payload"), b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");

        let proof = sent_command(&log, 2);
        assert_eq!(proof.first_key(), Some("saslContinue"));
        assert_eq!(proof.get("conversationId"), Some(&BsonValue::Int32(1)));
        assert_eq!(binary(&proof, "payload"), CLIENT_FINAL.as_bytes());

        assert!(binary(&sent_command(&log, 3), "payload").is_empty());
    }

    #[tokio::test]
    async fn test_scram_done_after_final_skips_extra_round() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &sasl(SERVER_FIRST, false)))
            .reply(reply(3, &sasl(SERVER_FINAL, true)));
        let (mut conn, log) = driver(config().password("pencil"), transport);
        conn.connect().await.unwrap();
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_scram_signature_mismatch() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &sasl(SERVER_FIRST, false)))
            .reply(reply(3, &sasl("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=", false)));
        let (mut conn, _) = driver(config().password("pencil"), transport);

        let err = conn.connect().await.unwrap_err();
        assert!(err.is_auth_error(), "{err}");
        assert!(matches!(conn.state(), ConnectionState::Error(_)));
        assert!(!conn.transport().is_connected());
    }

    #[tokio::test]
    async fn test_authentication_failed() {
        let denied = BsonDocument::new()
            .with("ok", 0.0)
            .with("errmsg", "Authentication failed.")
            .with("code", 18)
            .with("codeName", "AuthenticationFailed");
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &denied));
        let (mut conn, _) = driver(config().password("wrong"), transport);

        let err = conn.connect().await.unwrap_err();
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("Authentication failed."));
    }

    #[tokio::test]
    async fn test_find_fixture() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &users_batch()));
        let (mut conn, log) = driver(config(), transport);
        conn.connect().await.unwrap();

        let result = conn.query(r#"{"find": "users", "limit": 1}"#).await.unwrap();
        assert_eq!(result.command, "find");
        assert_eq!(result.row_count, 1);
        assert_eq!(result.column_names(), vec!["_id", "name", "age", "email"]);
        assert_eq!(result.columns[0].type_name, "objectId");
        assert_eq!(result.columns[2].type_name, "int");
        assert_eq!(result.columns[3].type_name, "null");
        assert_eq!(result.rows[0].get_by_name("name"), Some(&Value::from("Ada")));
        assert_eq!(result.rows[0].get_by_name("age"), Some(&Value::Int(36)));

        let find = sent_command(&log, 1);
        assert_eq!(find.keys().collect::<Vec<_>>(), vec!["find", "limit", "$db"]);
        assert_eq!(find.get_str("$db"), Some("shop"));
    }

    #[tokio::test]
    async fn test_find_in_one_byte_chunks() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &users_batch()))
            .chunk_size(1);
        let (mut conn, _) = driver(config(), transport);
        conn.connect().await.unwrap();
        let result = conn.query(r#"{"find": "users", "limit": 1}"#).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns.len(), 4);
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection() {
        let failed = BsonDocument::new()
            .with("ok", 0.0)
            .with("errmsg", "no such command: 'fnd'")
            .with("code", 59);
        let count = BsonDocument::new().with("n", 3).with("ok", 1.0);
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &failed))
            .reply(reply(3, &count));
        let (mut conn, _) = driver(config(), transport);
        conn.connect().await.unwrap();

        let err = conn.query(r#"{"fnd": "users"}"#).await.unwrap_err();
        assert!(err.to_string().contains("no such command"));
        assert_eq!(err.sql(), Some(r#"{"fnd": "users"}"#));
        assert!(conn.is_connected());

        let result = conn.query(r#"{"count": "users"}"#).await.unwrap();
        assert_eq!(result.rows[0].get_by_name("n"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_invalid_json_sends_nothing() {
        let (mut conn, log) = driver(config(), ScriptedTransport::new().reply(reply(1, &hello_ok())));
        conn.connect().await.unwrap();
        assert!(conn.query("{find").await.is_err());
        assert!(conn.is_connected());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_misaddressed_reply_is_fatal() {
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(9, &users_batch()));
        let (mut conn, _) = driver(config(), transport);
        conn.connect().await.unwrap();

        let err = conn.query(r#"{"find": "users"}"#).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(matches!(conn.state(), ConnectionState::Error(_)));
    }

    #[tokio::test]
    async fn test_tls_is_direct() {
        let (mut conn, log) = driver(
            config().ssl(true),
            ScriptedTransport::new().reply(reply(1, &hello_ok())),
        );
        conn.connect().await.unwrap();
        assert!(conn.transport().is_secure());
        assert_eq!(log.len(), 1);

        let (mut conn, _) = driver(config().ssl(true), ScriptedTransport::new().without_tls());
        let err = conn.connect().await.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::TlsUnsupported));
    }

    #[tokio::test]
    async fn test_catalog_wrappers() {
        let databases = BsonDocument::new()
            .with(
                "databases",
                vec![
                    BsonValue::Document(BsonDocument::new().with("name", "admin")),
                    BsonValue::Document(BsonDocument::new().with("name", "shop")),
                ],
            )
            .with("ok", 1.0);
        let collections = BsonDocument::new()
            .with(
                "cursor",
                BsonDocument::new().with(
                    "firstBatch",
                    vec![BsonValue::Document(
                        BsonDocument::new().with("name", "users").with("type", "collection"),
                    )],
                ),
            )
            .with("ok", 1.0);
        let transport = ScriptedTransport::new()
            .reply(reply(1, &hello_ok()))
            .reply(reply(2, &databases))
            .reply(reply(3, &collections))
            .reply(reply(4, &users_batch()));
        let (mut conn, log) = driver(config(), transport);
        conn.connect().await.unwrap();

        assert_eq!(conn.list_databases().await.unwrap(), vec!["admin", "shop"]);
        assert_eq!(sent_command(&log, 1).get("nameOnly"), Some(&BsonValue::Boolean(true)));

        let tables = conn.list_tables(None).await.unwrap();
        assert_eq!(
            tables,
            vec![TableInfo {
                schema: "shop".into(),
                name: "users".into(),
                kind: "collection".into(),
            }]
        );

        let columns = conn.describe_table("shop", "users").await.unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[1].name, "name");
        assert!(!columns[1].nullable);
        assert!(columns[3].nullable);
        assert_eq!(sent_command(&log, 3).get("limit"), Some(&BsonValue::Int32(100)));
    }
}
