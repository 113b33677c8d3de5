//! Connection pooling for dbwire drivers.
//!
//! A [`Pool`] keeps idle driver connections per
//! [`pool_key`](dbwire_core::ConnectionConfig::pool_key)
//! (`type://host:port/database@user`) and hands them out exclusively, so each
//! connection only ever sees one caller's queries at a time.
//!
//! - `acquire` reuses an idle connection, opens a new one below `max_size`,
//!   or polls until `acquire_timeout`
//! - `release` returns a connection idle, still connected
//! - `sweep` / `spawn_reaper` close connections idle past `idle_timeout`
//! - `destroy_all` closes everything at shutdown
//!
//! ```rust,ignore
//! let pool = Pool::new(PoolConfig::default())?;
//! let mut conn = pool.acquire(&config, |config| dbwire::connect(config, &factory)).await?;
//! let result = conn.query("SELECT 1").await?;
//! pool.release(conn).await;
//! ```

pub mod config;
pub mod pool;

pub use config::PoolConfig;
pub use pool::{KeyStats, POLL_INTERVAL, Pool, PoolStats, PooledConnection};
