//! PostgreSQL driver for dbwire.
//!
//! `dbwire-postgres` speaks the PostgreSQL frontend/backend protocol v3 over a
//! [`Transport`](dbwire_core::Transport) and implements
//! [`DatabaseConnection`](dbwire_core::DatabaseConnection). It provides:
//!
//! - Frame reassembly from arbitrarily split byte chunks
//! - Authentication: trust, cleartext, MD5 and SCRAM-SHA-256
//! - Optional `SSLRequest` upgrade when TLS is configured
//! - The simple query protocol with text-format rows
//! - Catalog wrappers over `pg_database` and `information_schema`
//!
//! # Example
//!
//! ```rust,ignore
//! use dbwire_core::{ConnectionConfig, ConnectionType, DatabaseConnection};
//! use dbwire_postgres::PgConnection;
//!
//! let config = ConnectionConfig::new(ConnectionType::Postgresql, "localhost", "app", "postgres")
//!     .password("secret");
//! let mut conn = PgConnection::new(config);
//! conn.connect().await?;
//! let result = conn.query("SELECT now()").await?;
//! ```

pub mod auth;
pub mod catalog;
pub mod connection;
pub mod oid;
pub mod protocol;

pub use connection::{BackendKey, PgConnection};
