//! One connection, many callers.

use dbwire_core::{
    ColumnDetail, DatabaseConnection, FifoGuard, FifoLock, QueryResult, Result, TableInfo,
};

use crate::AnyConnection;

/// A cloneable handle that serialises every call onto one driver.
///
/// Calls run in the order they were made. Hold [`lock`](Self::lock) to run
/// several statements back to back (e.g. a transaction) without interleaving.
pub struct SharedConnection<C = AnyConnection> {
    inner: FifoLock<C>,
}

impl<C> Clone for SharedConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> std::fmt::Debug for SharedConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<C: DatabaseConnection> SharedConnection<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: FifoLock::new(conn),
        }
    }

    /// Exclusive access until the guard drops.
    pub async fn lock(&self) -> FifoGuard<C> {
        self.inner.lock().await
    }

    /// Callers waiting for their turn.
    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.lock().await.query(sql).await
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.lock().await.list_databases().await
    }

    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>> {
        self.lock().await.list_tables(schema).await
    }

    pub async fn describe_table(&self, schema: &str, table: &str) -> Result<Vec<ColumnDetail>> {
        self.lock().await.describe_table(schema, table).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.lock().await.disconnect().await
    }
}

impl<C: DatabaseConnection> From<C> for SharedConnection<C> {
    fn from(conn: C) -> Self {
        Self::new(conn)
    }
}
