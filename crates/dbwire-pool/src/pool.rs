//! Keyed pool of driver connections.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dbwire_core::error::PoolErrorKind;
use dbwire_core::{ConnectionConfig, DatabaseConnection, Error, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

/// How often a waiting `acquire` re-checks for an idle entry.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct IdleEntry<C> {
    conn: C,
    since: Instant,
}

/// Connections sharing one pool key.
struct Slot<C> {
    idle: Vec<IdleEntry<C>>,
    /// Checked out, or reserved while connecting
    in_use: usize,
}

impl<C> Default for Slot<C> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            in_use: 0,
        }
    }
}

impl<C> Slot<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use
    }
}

enum Checkout<C> {
    Idle(C),
    Reserved,
    Full,
}

struct PoolInner<C> {
    config: PoolConfig,
    slots: Mutex<HashMap<String, Slot<C>>>,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: DatabaseConnection> PoolInner<C> {
    fn checkout(&self, key: &str) -> Result<Checkout<C>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::pool(PoolErrorKind::Closed, "pool has been destroyed"));
        }
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();

        // Most recently released first; entries whose link died are dropped.
        while let Some(entry) = slot.idle.pop() {
            if entry.conn.is_connected() {
                slot.in_use += 1;
                return Ok(Checkout::Idle(entry.conn));
            }
            tracing::debug!(key, "dropping dead idle connection");
        }

        if slot.total() < self.config.max_size {
            slot.in_use += 1;
            Ok(Checkout::Reserved)
        } else {
            Ok(Checkout::Full)
        }
    }

    /// Give back a checked-out slot without returning a connection.
    fn forget(&self, key: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.in_use = slot.in_use.saturating_sub(1);
            if slot.total() == 0 {
                slots.remove(key);
            }
        }
    }

    /// Return a connection as idle. Hands it back when the pool is closed.
    fn check_in(&self, key: &str, conn: C) -> Option<C> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return Some(conn);
        };
        slot.in_use = slot.in_use.saturating_sub(1);
        if self.closed.load(Ordering::Acquire) {
            return Some(conn);
        }
        slot.idle.push(IdleEntry {
            conn,
            since: Instant::now(),
        });
        None
    }

    fn take_expired(&self) -> Vec<C> {
        let timeout = self.config.idle_timeout;
        let mut expired = Vec::new();
        let mut slots = self.slots.lock();
        for slot in slots.values_mut() {
            let (stale, fresh): (Vec<_>, Vec<_>) = slot
                .idle
                .drain(..)
                .partition(|entry| entry.since.elapsed() >= timeout);
            slot.idle = fresh;
            expired.extend(stale.into_iter().map(|entry| entry.conn));
        }
        slots.retain(|_, slot| slot.total() > 0);
        expired
    }

    async fn sweep(&self) -> usize {
        let expired = self.take_expired();
        let count = expired.len();
        for mut conn in expired {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(error = %e, "error closing idle connection");
            }
        }
        if count > 0 {
            tracing::debug!(closed = count, "idle sweep");
        }
        count
    }
}

/// A pool of driver connections keyed by
/// [`ConnectionConfig::pool_key`](dbwire_core::ConnectionConfig::pool_key).
///
/// Each key holds at most `max_size` connections. Clones share the pool.
pub struct Pool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: DatabaseConnection + 'static> Pool<C> {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                slots: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                reaper: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Check out a connection for `config`.
    ///
    /// Reuses an idle connection when one exists, otherwise calls `connect`
    /// if the key is below `max_size`. A full key is polled every
    /// [`POLL_INTERVAL`] until `acquire_timeout`, then fails with
    /// [`PoolErrorKind::Exhausted`].
    #[tracing::instrument(level = "debug", skip(self, config, connect), fields(key = tracing::field::Empty))]
    pub async fn acquire<F, Fut>(
        &self,
        config: &ConnectionConfig,
        connect: F,
    ) -> Result<PooledConnection<C>>
    where
        F: FnOnce(ConnectionConfig) -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let key = config.pool_key();
        tracing::Span::current().record("key", key.as_str());
        let deadline = Instant::now() + self.inner.config.acquire_timeout;

        loop {
            match self.inner.checkout(&key)? {
                Checkout::Idle(conn) => {
                    tracing::debug!("reusing idle connection");
                    return Ok(self.wrap(key, conn));
                }
                Checkout::Reserved => {
                    tracing::debug!("opening new connection");
                    return match connect(config.clone()).await {
                        Ok(conn) => Ok(self.wrap(key, conn)),
                        Err(err) => {
                            self.inner.forget(&key);
                            Err(err)
                        }
                    };
                }
                Checkout::Full => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::pool(
                    PoolErrorKind::Exhausted,
                    format!(
                        "no connection for {key} within {:?} (max {} per key)",
                        self.inner.config.acquire_timeout, self.inner.config.max_size
                    ),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn wrap(&self, key: String, conn: C) -> PooledConnection<C> {
        PooledConnection {
            conn: Some(conn),
            key,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Mark a checked-out connection idle. It stays connected.
    ///
    /// A connection that is no longer connected, or released after
    /// [`destroy_all`](Self::destroy_all), is closed instead.
    pub async fn release(&self, mut pooled: PooledConnection<C>) {
        let Some(conn) = pooled.conn.take() else {
            return;
        };
        let rejected = if conn.is_connected() {
            self.inner.check_in(&pooled.key, conn)
        } else {
            self.inner.forget(&pooled.key);
            Some(conn)
        };
        if let Some(mut conn) = rejected {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(error = %e, "error closing released connection");
            }
        }
    }

    /// Close idle connections older than `idle_timeout`; returns how many.
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    /// Run [`sweep`](Self::sweep) every `idle_timeout / 2` on the tokio
    /// runtime until the pool is destroyed or dropped.
    pub fn spawn_reaper(&self) {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.sweep().await;
            }
        });
        if let Some(previous) = self.inner.reaper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Disconnect every idle connection and refuse further acquires.
    ///
    /// Connections still checked out are closed when released.
    pub async fn destroy_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(reaper) = self.inner.reaper.lock().take() {
            reaper.abort();
        }
        let idle: Vec<C> = {
            let mut slots = self.inner.slots.lock();
            slots
                .drain()
                .flat_map(|(_, slot)| slot.idle.into_iter().map(|entry| entry.conn))
                .collect()
        };
        tracing::debug!(closing = idle.len(), "destroying pool");
        for mut conn in idle {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(error = %e, "error closing pooled connection");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots.lock();
        let mut stats = PoolStats::default();
        for (key, slot) in slots.iter() {
            let entry = KeyStats {
                idle: slot.idle.len(),
                in_use: slot.in_use,
            };
            stats.idle += entry.idle;
            stats.in_use += entry.in_use;
            stats.per_key.insert(key.clone(), entry);
        }
        stats.total = stats.idle + stats.in_use;
        stats
    }
}

/// Counts for one pool key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyStats {
    pub idle: usize,
    pub in_use: usize,
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle plus in-use connections
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub per_key: BTreeMap<String, KeyStats>,
}

/// A connection checked out of a [`Pool`].
///
/// Hand it back with [`Pool::release`]. Dropping it instead discards the
/// connection and frees its slot.
pub struct PooledConnection<C> {
    conn: Option<C>,
    key: String,
    pool: Weak<PoolInner<C>>,
}

impl<C> PooledConnection<C> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken by release"),
        }
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken by release"),
        }
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.conn.take().is_none() {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            let mut slots = pool.slots.lock();
            if let Some(slot) = slots.get_mut(&self.key) {
                slot.in_use = slot.in_use.saturating_sub(1);
                if slot.total() == 0 {
                    slots.remove(&self.key);
                }
            }
            tracing::debug!(key = %self.key, "pooled connection dropped without release");
        }
    }
}
