//! # SQL Executor
//!
//! The only path by which repositories and the bootstrapper touch SQL.
//!
//! ## Retry Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Statement Execution                               │
//! │                                                                         │
//! │  retry_on_lock (writes)                                                │
//! │   └── attempt 1..=max_attempts, sleep base·2^(n-1) between             │
//! │        └── with_reconnect                                              │
//! │             └── run statement                                          │
//! │                  ├── Ok                        → return                 │
//! │                  ├── ConnectionLost            → recreate, run once more│
//! │                  ├── Locked                    → back off (outer loop)  │
//! │                  └── anything else             → return unchanged      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backoff sleeps happen with the connection guard released, so readers are
//! never stuck behind a waiting writer.

use std::future::Future;
use std::sync::Arc;

use kiosk_core::{OrderStatus, SyncStatus, UserRole};
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::connection::ConnectionManager;
use crate::error::{DbError, DbResult};

// =============================================================================
// Bind Values
// =============================================================================

/// A positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<OrderStatus> for SqlValue {
    fn from(v: OrderStatus) -> Self {
        SqlValue::Text(v.as_str().to_string())
    }
}

impl From<SyncStatus> for SqlValue {
    fn from(v: SyncStatus) -> Self {
        SqlValue::Text(v.as_str().to_string())
    }
}

impl From<UserRole> for SqlValue {
    fn from(v: UserRole) -> Self {
        SqlValue::Text(v.as_str().to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Binds every value onto a `query`, `query_as` or `query_scalar` builder.
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for value in $params {
            query = match value {
                SqlValue::Null => query.bind(None::<i64>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::Bool(v) => query.bind(*v),
            };
        }
        query
    }};
}

// =============================================================================
// Retry
// =============================================================================

/// Runs `op` until it succeeds, fails with a non-lock error, or the attempt
/// budget is spent.
///
/// Only [`DbError::Locked`] is retried. Sleeps double each time, starting at
/// `policy.base_delay_ms`.
pub async fn retry_on_lock<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_transient_lock() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Database locked, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient_lock() => {
                warn!(attempts = attempt, "Database still locked, giving up");
                return Err(e);
            }
            other => return other,
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs SQL against the managed connection.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl SqlExecutor {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let retry = manager.config().retry;
        SqlExecutor { manager, retry }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs one or more raw statements without parameters.
    pub async fn exec(&self, sql: &str) -> DbResult<()> {
        retry_on_lock(&self.retry, || {
            self.with_reconnect(move || async move {
                let mut guard = self.manager.acquire().await?;
                guard.exec(sql).await.map(|_| ())
            })
        })
        .await
    }

    /// Runs a parameterized write and returns the last inserted row id.
    pub async fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<i64> {
        debug!(sql, params = params.len(), "run");
        retry_on_lock(&self.retry, || {
            self.with_reconnect(move || async move {
                let mut guard = self.manager.acquire().await?;
                let conn = guard.connection().await?;
                let result = bind_params!(sqlx::query(sql), params).execute(conn).await;
                guard.track(result).map(|done| done.last_insert_rowid())
            })
        })
        .await
    }

    /// Runs a parameterized write and returns the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        debug!(sql, params = params.len(), "execute");
        retry_on_lock(&self.retry, || {
            self.with_reconnect(move || async move {
                let mut guard = self.manager.acquire().await?;
                let conn = guard.connection().await?;
                let result = bind_params!(sqlx::query(sql), params).execute(conn).await;
                guard.track(result).map(|done| done.rows_affected())
            })
        })
        .await
    }

    /// Fetches every matching row.
    pub async fn query_all<T>(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.with_reconnect(move || async move {
            let mut guard = self.manager.acquire().await?;
            let conn = guard.connection().await?;
            let result = bind_params!(sqlx::query_as::<_, T>(sql), params)
                .fetch_all(conn)
                .await;
            guard.track(result)
        })
        .await
    }

    /// Fetches the first matching row, if any.
    pub async fn query_one<T>(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.with_reconnect(move || async move {
            let mut guard = self.manager.acquire().await?;
            let conn = guard.connection().await?;
            let result = bind_params!(sqlx::query_as::<_, T>(sql), params)
                .fetch_optional(conn)
                .await;
            guard.track(result)
        })
        .await
    }

    /// Fetches a single integer (COUNT, SUM, ...). NULL and no row read as 0.
    pub async fn query_scalar_i64(&self, sql: &str, params: &[SqlValue]) -> DbResult<i64> {
        self.with_reconnect(move || async move {
            let mut guard = self.manager.acquire().await?;
            let conn = guard.connection().await?;
            let result = bind_params!(sqlx::query_scalar::<_, Option<i64>>(sql), params)
                .fetch_optional(conn)
                .await;
            guard.track(result).map(|value| value.flatten().unwrap_or(0))
        })
        .await
    }

    /// Runs `op`; if the handle turned out to be unusable, runs it once more
    /// on a fresh connection.
    async fn with_reconnect<T, F, Fut>(&self, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        match op().await {
            Err(e) if e.is_connection_lost() => {
                warn!(error = %e, "Retrying statement on a new connection");
                op().await
            }
            other => other,
        }
    }
}

/// Rejects anything but plain identifiers before they are spliced into SQL.
pub(crate) fn check_identifier(name: &str) -> DbResult<&str> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(name)
    } else {
        Err(DbError::QueryFailed(format!("invalid identifier '{name}'")))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
