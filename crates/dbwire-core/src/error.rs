//! Error types shared by every dbwire driver.

use std::fmt;

/// The primary error type for all dbwire operations.
#[derive(Debug)]
pub enum Error {
    /// Transport and authentication failures
    Connection(ConnectionError),
    /// Server-reported query errors
    Query(QueryError),
    /// Malformed or unexpected wire data
    Protocol(ProtocolError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused
    Refused,
    /// DNS resolution failed
    DnsResolution,
    /// TCP connect did not finish in time
    Timeout,
    /// TLS negotiation failed
    Ssl,
    /// TLS was requested but this build cannot provide it
    TlsUnsupported,
    /// Bad credentials, unsupported mechanism, SCRAM mismatch
    Authentication,
    /// Connection closed mid-operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// PostgreSQL SQLSTATE or MySQL SQL state marker
    pub sqlstate: Option<String>,
    /// Numeric server code (MySQL error number, MongoDB `code`)
    pub code: Option<i64>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in the statement
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table, column or database not found
    NotFound,
    /// Permission denied
    Permission,
    /// Any other server error
    Database,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// No idle entry became available before the acquire timeout
    Exhausted,
    /// Pool was destroyed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Wire data that cannot be interpreted.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
            source: None,
        })
    }

    /// Authentication failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::connection(ConnectionErrorKind::Authentication, message)
    }

    /// The peer closed the stream.
    pub fn closed() -> Self {
        Self::connection(ConnectionErrorKind::Disconnected, "connection closed")
    }

    /// Operation attempted on a driver that is not connected.
    pub fn not_connected() -> Self {
        Self::connection(ConnectionErrorKind::Disconnected, "not connected")
    }

    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Server-reported error with only a message.
    pub fn server(message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: None,
            sqlstate: None,
            code: None,
            message: message.into(),
            detail: None,
            hint: None,
        })
    }

    pub fn pool(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Error::Pool(PoolError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (pool exhaustion, timeouts)?
    ///
    /// The drivers never retry on their own; this is for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Refused | ConnectionErrorKind::Timeout
            ),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_)
        )
    }

    /// Is this an authentication failure?
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Authentication,
                ..
            })
        )
    }

    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Error::Connection(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the statement text to a server-reported error.
    pub fn with_sql(mut self, sql: &str) -> Self {
        if let Error::Query(q) = &mut self {
            q.sql = Some(sql.to_string());
        }
        self
    }
}

impl QueryErrorKind {
    /// Classify by SQLSTATE class.
    pub fn from_sqlstate(sqlstate: &str) -> Self {
        match sqlstate.get(..2) {
            Some("42") if sqlstate == "42501" => QueryErrorKind::Permission,
            Some("42") if sqlstate == "42P01" || sqlstate == "42703" || sqlstate == "42S02" => {
                QueryErrorKind::NotFound
            }
            Some("42") => QueryErrorKind::Syntax,
            Some("23") => QueryErrorKind::Constraint,
            Some("3D") => QueryErrorKind::NotFound,
            Some("28") => QueryErrorKind::Permission,
            _ => QueryErrorKind::Database,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Protocol(e) => e.source.as_deref(),
            Error::Pool(e) => e.source.as_deref(),
            Error::Config(e) => e.source.as_deref(),
            Error::Io(e) => return Some(e),
            Error::Query(_) | Error::Timeout => None,
        };
        boxed.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<dbwire_crypto::ScramError> for Error {
    fn from(err: dbwire_crypto::ScramError) -> Self {
        let message = err.to_string();
        if err.is_authentication_failure() {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Authentication,
                message,
                source: Some(Box::new(err)),
            })
        } else {
            Error::Protocol(ProtocolError {
                message,
                raw_data: None,
                source: Some(Box::new(err)),
            })
        }
    }
}

/// Result type alias for dbwire operations.
pub type Result<T> = std::result::Result<T, Error>;
