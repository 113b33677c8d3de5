//! Driver selection by [`ConnectionType`].

use std::fmt;

use dbwire_core::{
    ColumnDetail, ConnectionConfig, ConnectionState, ConnectionType, DatabaseConnection,
    QueryResult, Result, TableInfo, TcpTransport, Transport, TransportFactory,
};
use dbwire_mongo::MongoConnection;
use dbwire_mysql::MySqlConnection;
use dbwire_postgres::PgConnection;

/// One of the three protocol drivers, chosen from the configuration.
///
/// MariaDB shares the MySQL driver.
pub enum AnyConnection<T: Transport = TcpTransport> {
    Postgres(PgConnection<T>),
    Mysql(MySqlConnection<T>),
    Mongo(MongoConnection<T>),
}

macro_rules! dispatch {
    ($self:expr, $conn:ident => $body:expr) => {
        match $self {
            AnyConnection::Postgres($conn) => $body,
            AnyConnection::Mysql($conn) => $body,
            AnyConnection::Mongo($conn) => $body,
        }
    };
}

impl AnyConnection<TcpTransport> {
    /// Build the driver for `config` on a fresh socket from `factory`.
    pub fn new(config: ConnectionConfig, factory: &TransportFactory) -> Self {
        Self::with_transport(config, factory.create())
    }
}

impl<T: Transport> AnyConnection<T> {
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        match config.connection_type {
            ConnectionType::Postgresql => {
                AnyConnection::Postgres(PgConnection::with_transport(config, transport))
            }
            ConnectionType::Mysql | ConnectionType::Mariadb => {
                AnyConnection::Mysql(MySqlConnection::with_transport(config, transport))
            }
            ConnectionType::Mongodb => {
                AnyConnection::Mongo(MongoConnection::with_transport(config, transport))
            }
        }
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.config().connection_type
    }

    pub fn as_postgres(&self) -> Option<&PgConnection<T>> {
        match self {
            AnyConnection::Postgres(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn as_mysql(&self) -> Option<&MySqlConnection<T>> {
        match self {
            AnyConnection::Mysql(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn as_mongo(&self) -> Option<&MongoConnection<T>> {
        match self {
            AnyConnection::Mongo(conn) => Some(conn),
            _ => None,
        }
    }
}

impl<T: Transport> From<PgConnection<T>> for AnyConnection<T> {
    fn from(conn: PgConnection<T>) -> Self {
        AnyConnection::Postgres(conn)
    }
}

impl<T: Transport> From<MySqlConnection<T>> for AnyConnection<T> {
    fn from(conn: MySqlConnection<T>) -> Self {
        AnyConnection::Mysql(conn)
    }
}

impl<T: Transport> From<MongoConnection<T>> for AnyConnection<T> {
    fn from(conn: MongoConnection<T>) -> Self {
        AnyConnection::Mongo(conn)
    }
}

impl<T: Transport> fmt::Debug for AnyConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, conn => fmt::Debug::fmt(conn, f))
    }
}

impl<T: Transport> DatabaseConnection for AnyConnection<T> {
    fn config(&self) -> &ConnectionConfig {
        dispatch!(self, conn => conn.config())
    }

    fn state(&self) -> &ConnectionState {
        dispatch!(self, conn => conn.state())
    }

    async fn connect(&mut self) -> Result<()> {
        dispatch!(self, conn => conn.connect().await)
    }

    async fn disconnect(&mut self) -> Result<()> {
        dispatch!(self, conn => conn.disconnect().await)
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        dispatch!(self, conn => conn.query(sql).await)
    }

    async fn list_databases(&mut self) -> Result<Vec<String>> {
        dispatch!(self, conn => conn.list_databases().await)
    }

    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        dispatch!(self, conn => conn.list_tables(schema).await)
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDetail>> {
        dispatch!(self, conn => conn.describe_table(schema, table).await)
    }
}

/// Validate `config`, build its driver and run the handshake.
///
/// A failed handshake leaves nothing open; the error is returned as the driver
/// reported it.
#[tracing::instrument(level = "debug", skip(config, factory), fields(key = %config.pool_key()))]
pub async fn connect(config: ConnectionConfig, factory: &TransportFactory) -> Result<AnyConnection> {
    config.validate()?;
    let mut conn = AnyConnection::new(config, factory);
    conn.connect().await?;
    tracing::info!(kind = %conn.connection_type(), "connected");
    Ok(conn)
}
