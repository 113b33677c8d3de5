//! Core types and transport for dbwire.
//!
//! This crate holds everything the protocol drivers share:
//!
//! - [`Error`] taxonomy and [`Result`] alias
//! - [`ConnectionConfig`] and its TLS settings
//! - [`QueryResult`], [`Row`], [`Value`] and the catalog result types
//! - [`DatabaseConnection`], the capability every driver implements
//! - [`Transport`], [`TcpTransport`] and [`TransportFactory`]
//! - [`FifoLock`] for serialising callers onto one connection
//!
//! With the `test-util` feature, [`ScriptedTransport`] replays canned server
//! bytes so drivers can be exercised without a server.

pub mod config;
pub mod connection;
pub mod error;
pub mod result;
pub mod row;
pub mod sync;
pub mod transport;
pub mod value;

pub use config::{ConnectionConfig, ConnectionType, SslSetting, TlsOptions};
pub use connection::{ConnectionState, DatabaseConnection, quote_literal};
pub use error::{Error, Result};
pub use result::{ColumnDetail, QueryResult, TableInfo};
pub use row::{ColumnIndex, ColumnInfo, Row};
pub use sync::{FifoGuard, FifoLock};
pub use transport::{TcpTransport, Transport, TransportFactory};
pub use value::Value;

#[cfg(any(test, feature = "test-util"))]
pub use transport::{ScriptedTransport, SentLog};
