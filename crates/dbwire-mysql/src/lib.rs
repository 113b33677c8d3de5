//! MySQL driver for dbwire.
//!
//! `dbwire-mysql` speaks the MySQL client/server protocol (also spoken by
//! MariaDB) over a [`Transport`](dbwire_core::Transport). It provides:
//!
//! - Packet framing with sequence ids and 16 MiB continuation packets
//! - `HandshakeV10` parsing and `HandshakeResponse41`
//! - `mysql_native_password`, `caching_sha2_password` (fast and full auth)
//!   and auth-switch requests
//! - `SSLRequest` upgrade when TLS is configured
//! - `COM_QUERY` text result sets, with or without `CLIENT_DEPRECATE_EOF`
//!
//! # Example
//!
//! ```rust,ignore
//! use dbwire_core::{ConnectionConfig, ConnectionType, DatabaseConnection};
//! use dbwire_mysql::MySqlConnection;
//!
//! let config = ConnectionConfig::new(ConnectionType::Mysql, "localhost", "app", "root")
//!     .password("secret");
//! let mut conn = MySqlConnection::new(config);
//! conn.connect().await?;
//! let tables = conn.list_tables(None).await?;
//! ```

pub mod auth;
pub mod catalog;
pub mod connection;
pub mod handshake;
pub mod protocol;
pub mod types;

pub use connection::{MySqlConnection, ServerInfo};
