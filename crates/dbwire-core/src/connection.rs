//! The uniform driver capability.
//!
//! - [`DatabaseConnection`] - connect, query and catalog operations every driver exposes
//! - [`ConnectionState`] - lifecycle state owned by each driver instance

use std::fmt;

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::result::{ColumnDetail, QueryResult, TableInfo};

/// Lifecycle of one driver instance.
///
/// Only the driver moves itself between states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub const fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// A connection to one database server over its native protocol.
///
/// Methods take `&mut self`: a driver serves one request/response exchange at
/// a time, and callers that share an instance must serialise access.
pub trait DatabaseConnection: Send {
    /// The configuration this driver was built from.
    fn config(&self) -> &ConnectionConfig;

    /// Current lifecycle state.
    fn state(&self) -> &ConnectionState;

    /// Open the socket and run the authentication exchange.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Close the socket. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Execute one statement (SQL text, or a JSON command document for MongoDB).
    fn query(&mut self, sql: &str) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Names of the databases visible to the user.
    fn list_databases(&mut self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Tables (or collections) in `schema`, or in the driver's default schema.
    fn list_tables(
        &mut self,
        schema: Option<&str>,
    ) -> impl Future<Output = Result<Vec<TableInfo>>> + Send;

    /// Column layout of one table (or the sampled key set of a collection).
    fn describe_table(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<ColumnDetail>>> + Send;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

/// Quote a string literal for embedding in catalog SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
