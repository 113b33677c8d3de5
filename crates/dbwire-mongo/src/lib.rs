//! MongoDB driver for dbwire.
//!
//! Commands travel as `OP_MSG` messages with a single BSON body. Queries are
//! JSON command documents (`{"find": "users", "limit": 10}`) and replies are
//! flattened into a [`QueryResult`](dbwire_core::QueryResult): the batch in
//! `cursor.firstBatch`, `values` or `databases` becomes the rows, otherwise
//! the reply itself is a single row. Columns are the union of document keys.
//!
//! When a password is configured the driver authenticates against `admin`
//! with SCRAM-SHA-1.
//!
//! ```rust,ignore
//! use dbwire_core::{ConnectionConfig, ConnectionType, DatabaseConnection};
//! use dbwire_mongo::MongoConnection;
//!
//! let config = ConnectionConfig::new(ConnectionType::Mongodb, "localhost", "shop", "app")
//!     .password("secret");
//! let mut conn = MongoConnection::new(config);
//! conn.connect().await?;
//! let result = conn.query(r#"{"find": "users", "filter": {"active": true}}"#).await?;
//! ```

pub mod auth;
pub mod catalog;
pub mod command;
pub mod connection;
pub mod wire;

pub use connection::{DEFAULT_DATABASE, MongoConnection};
