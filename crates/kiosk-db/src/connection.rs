//! # Connection Management
//!
//! One SQLite connection per process, created on first use.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connection Lifecycle                               │
//! │                                                                         │
//! │  acquire() ──► Mutex<Option<Handle>> locked                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  connection()                                                          │
//! │       │                                                                 │
//! │       ├── slot empty   → open: connect → SELECT 1 → WAL → publish      │
//! │       │                  (check failure: discard, open once more)       │
//! │       ├── slot suspect → discard, then open as above                   │
//! │       └── slot healthy → reuse                                         │
//! │                                                                         │
//! │  reset()  ──► close handle → delete files (base, -wal, -shm, -journal) │
//! │                  └── deletion failed / in-memory → drop every object    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! Creation happens while the slot mutex is held, so concurrent first
//! callers can never build two handles. Every statement runs with the guard
//! held; no caller ever sees a half-initialized connection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::{DbConfig, RetryPolicy};
use crate::error::{DbError, DbResult};

/// Companion files SQLite may leave next to the database file.
const COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// How a reset cleared the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Database files were deleted; the next use creates a fresh file.
    Physical,
    /// Every user object was dropped through the live connection.
    Logical,
}

/// A live handle plus its health flag.
struct Handle {
    conn: SqliteConnection,
    suspect: bool,
}

impl Handle {
    fn new(conn: SqliteConnection) -> Self {
        Handle {
            conn,
            suspect: false,
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Owner of the process-wide database connection.
pub struct ConnectionManager {
    config: DbConfig,
    path: PathBuf,
    slot: Mutex<Option<Handle>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("path", &self.path)
            .field("in_memory", &self.config.is_in_memory())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager. No connection is opened until first use.
    pub fn new(config: DbConfig) -> Self {
        let path = config.resolve_path();
        ConnectionManager {
            config,
            path,
            slot: Mutex::new(None),
        }
    }

    /// Resolved database file path (`:memory:` for in-memory databases).
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Locks the connection slot.
    ///
    /// The returned guard serializes all database work. Drop it before
    /// sleeping or awaiting anything unrelated to the database.
    pub async fn acquire(&self) -> DbResult<ConnectionGuard<'_>> {
        ensure_supported()?;
        let slot = self.slot.lock().await;
        Ok(ConnectionGuard {
            manager: self,
            slot,
        })
    }

    /// Opens the connection now instead of on first statement.
    pub async fn connect(&self) -> DbResult<()> {
        let mut guard = self.acquire().await?;
        guard.connection().await?;
        Ok(())
    }

    /// Returns true if a handle is currently held.
    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Marks the current handle unusable; the next caller recreates it.
    pub async fn invalidate(&self) {
        if let Some(handle) = self.slot.lock().await.as_mut() {
            warn!("Connection marked unusable");
            handle.suspect = true;
        }
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        let Ok(mut guard) = self.acquire().await else {
            return false;
        };
        guard.exec("SELECT 1").await.is_ok()
    }

    /// Closes the connection. Subsequent calls reopen it lazily.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(handle) => {
                info!(path = %self.path.display(), "Closing database connection");
                if let Err(e) = handle.conn.close().await {
                    warn!(error = %e, "Error while closing database connection");
                }
            }
            None => debug!("Close requested with no open connection"),
        }
    }

    /// Destroys all local data.
    ///
    /// ## Steps
    /// 1. Close the handle
    /// 2. Delete the database file and its `-wal`/`-shm`/`-journal` companions
    /// 3. If deletion is impossible (or the database is in-memory), reopen and
    ///    drop every trigger, view, index and table, then VACUUM
    ///
    /// Calling it twice in a row is safe.
    pub async fn reset(&self) -> DbResult<ResetMode> {
        ensure_supported()?;
        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.take() {
            if let Err(e) = handle.conn.close().await {
                warn!(error = %e, "Error while closing database connection before reset");
            }
        }

        if !self.config.is_in_memory() {
            match remove_database_files(&self.path) {
                Ok(removed) => {
                    info!(path = %self.path.display(), removed, "Database files deleted");
                    return Ok(ResetMode::Physical);
                }
                Err(e) => {
                    warn!(error = %e, "Could not delete database files, dropping objects instead");
                }
            }
        }

        let mut conn = self.open().await?;
        let dropped = drop_all_objects(&mut conn, self.config.database.foreign_keys)
            .await
            .map_err(|e| DbError::ResetFailed(e.to_string()))?;
        *slot = Some(Handle::new(conn));

        info!(dropped, "Database objects dropped");
        Ok(ResetMode::Logical)
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Opens and validates a fresh connection.
    ///
    /// A failed validation query discards the handle and tries once more.
    async fn open(&self) -> DbResult<SqliteConnection> {
        ensure_supported()?;

        let attempt = match self.open_validated().await {
            Err(e) if e.is_connection_lost() => {
                warn!(error = %e, "New connection failed validation, recreating once");
                self.open_validated().await
            }
            other => other,
        };

        attempt.map_err(|e| match e {
            DbError::ConnectionLost(message) => DbError::ConnectionFailed(message),
            other => other,
        })
    }

    async fn open_validated(&self) -> DbResult<SqliteConnection> {
        debug!(path = %self.path.display(), "Opening database connection");

        let mut conn = self
            .connect_options()?
            .connect()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        // 1. Validate
        if let Err(e) = sqlx::query("SELECT 1").execute(&mut conn).await {
            return Err(DbError::ConnectionLost(format!("validation query failed: {e}")));
        }

        // 2. WAL: readers don't block the writer
        match sqlx::query_scalar::<_, String>("PRAGMA journal_mode = WAL")
            .fetch_one(&mut conn)
            .await
        {
            Ok(mode) => debug!(journal_mode = %mode, "Journal mode set"),
            Err(e) => warn!(error = %e, "Could not enable WAL journal mode"),
        }

        // 3. Publish (caller stores it in the slot)
        info!(path = %self.path.display(), "Database connection ready");
        Ok(conn)
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::ConnectionFailed(format!("{}: {e}", parent.display()))
                })?;
            }
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };

        Ok(options
            .foreign_keys(self.config.database.foreign_keys)
            .busy_timeout(self.config.busy_timeout_duration()))
    }
}

// =============================================================================
// Connection Guard
// =============================================================================

/// Exclusive access to the connection slot.
pub struct ConnectionGuard<'a> {
    manager: &'a ConnectionManager,
    slot: MutexGuard<'a, Option<Handle>>,
}

impl ConnectionGuard<'_> {
    /// Returns the live connection, creating or replacing it if needed.
    pub async fn connection(&mut self) -> DbResult<&mut SqliteConnection> {
        if self.slot.as_ref().is_some_and(|handle| handle.suspect) {
            warn!("Discarding unusable connection");
            self.discard();
        }

        if self.slot.is_none() {
            let conn = self.manager.open().await?;
            *self.slot = Some(Handle::new(conn));
        }

        match self.slot.as_mut() {
            Some(handle) => Ok(&mut handle.conn),
            None => Err(DbError::Internal("connection slot empty after open".into())),
        }
    }

    /// Runs raw SQL (one or more statements) and returns rows affected.
    pub async fn exec(&mut self, sql: &str) -> DbResult<u64> {
        let conn = self.connection().await?;
        let result = conn.execute(sql).await;
        self.track(result).map(|done| done.rows_affected())
    }

    /// Like [`exec`](Self::exec), but waits out lock contention.
    ///
    /// The guard stays held while backing off, so an open transaction on
    /// this connection survives the wait.
    pub async fn exec_with_retry(&mut self, sql: &str, policy: &RetryPolicy) -> DbResult<u64> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.exec(sql).await {
                Err(e) if e.is_transient_lock() && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Statement locked, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Converts a driver result, flagging the handle if it went bad.
    pub fn track<T>(&mut self, result: Result<T, sqlx::Error>) -> DbResult<T> {
        result.map_err(|e| {
            let err = DbError::from(e);
            if err.is_connection_lost() {
                error!(error = %err, "Connection lost during statement");
                self.mark_suspect();
            }
            err
        })
    }

    pub fn mark_suspect(&mut self) {
        if let Some(handle) = self.slot.as_mut() {
            handle.suspect = true;
        }
    }

    /// Replaces the handle with a freshly validated one.
    pub async fn reconnect(&mut self) -> DbResult<()> {
        self.discard();
        self.connection().await?;
        Ok(())
    }

    fn discard(&mut self) {
        // Dropping the handle tears down the driver's worker.
        drop(self.slot.take());
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_supported() -> DbResult<()> {
    if cfg!(target_family = "wasm") {
        return Err(DbError::PlatformUnsupported);
    }
    Ok(())
}

/// Deletes the database file and its companions. Missing files are fine.
fn remove_database_files(path: &Path) -> std::io::Result<usize> {
    let mut removed = 0;

    let companions = COMPANION_SUFFIXES.iter().map(|suffix| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    });

    for file in std::iter::once(path.to_path_buf()).chain(companions) {
        match std::fs::remove_file(&file) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}

/// Drop order: dependents first.
fn drop_priority(kind: &str) -> u8 {
    match kind {
        "trigger" => 0,
        "view" => 1,
        "index" => 2,
        _ => 3,
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Drops every user-defined object and compacts the file.
pub(crate) async fn drop_all_objects(
    conn: &mut SqliteConnection,
    foreign_keys: bool,
) -> DbResult<usize> {
    (&mut *conn).execute("PRAGMA foreign_keys = OFF").await?;

    let dropped = drop_objects(conn).await;

    if foreign_keys {
        (&mut *conn).execute("PRAGMA foreign_keys = ON").await?;
    }

    let dropped = dropped?;
    (&mut *conn).execute("VACUUM").await?;
    Ok(dropped)
}

async fn drop_objects(conn: &mut SqliteConnection) -> DbResult<usize> {
    let mut objects: Vec<(String, String)> = sqlx::query_as(
        "SELECT type, name FROM sqlite_master \
         WHERE type IN ('trigger', 'view', 'index', 'table') \
         AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *conn)
    .await?;

    objects.sort_by_key(|(kind, _)| drop_priority(kind));

    for (kind, name) in &objects {
        let sql = format!(
            "DROP {} IF EXISTS {}",
            kind.to_ascii_uppercase(),
            quote_identifier(name)
        );
        debug!(%sql, "Dropping object");
        (&mut *conn).execute(sql.as_str()).await?;
    }

    Ok(objects.len())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECTS: &str = "
        CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));
        CREATE INDEX idx_child_parent ON child (parent_id);
        CREATE VIEW parent_names AS SELECT name FROM parent;
        CREATE TRIGGER trg_parent AFTER INSERT ON parent BEGIN
            INSERT INTO child (parent_id) VALUES (NEW.id);
        END;
        INSERT INTO parent (name) VALUES ('a');
    ";

    async fn object_count(manager: &ConnectionManager) -> i64 {
        let mut guard = manager.acquire().await.unwrap();
        let conn = guard.connection().await.unwrap();
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(conn)
        .await
        .unwrap()
    }

    fn file_manager(dir: &tempfile::TempDir) -> ConnectionManager {
        ConnectionManager::new(DbConfig::new(dir.path().join("nested/kiosk.db")))
    }

    #[tokio::test]
    async fn test_connection_is_lazy() {
        let manager = ConnectionManager::new(DbConfig::in_memory());
        assert!(!manager.is_open().await);

        assert!(manager.health_check().await);
        assert!(manager.is_open().await);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(&dir);

        let mut guard = manager.acquire().await.unwrap();
        let conn = guard.connection().await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(conn)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        drop(guard);

        assert!(manager.path().exists());
    }

    #[tokio::test]
    async fn test_invalidated_connection_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(&dir);

        {
            let mut guard = manager.acquire().await.unwrap();
            guard.exec("CREATE TEMP TABLE scratch (id INTEGER)").await.unwrap();
            guard.exec("CREATE TABLE kept (id INTEGER)").await.unwrap();
        }

        manager.invalidate().await;

        let mut guard = manager.acquire().await.unwrap();
        // Temp objects die with the old handle, the file survives
        let err = guard.exec("SELECT * FROM scratch").await.unwrap_err();
        assert!(matches!(err, DbError::NoSuchObject(_)));
        guard.exec("SELECT * FROM kept").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let manager = ConnectionManager::new(DbConfig::in_memory());
        manager.connect().await.unwrap();
        manager.close().await;
        assert!(!manager.is_open().await);

        // Closing twice is harmless
        manager.close().await;
        assert!(manager.health_check().await);
    }

    #[tokio::test]
    async fn test_physical_reset_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(&dir);

        manager.acquire().await.unwrap().exec(OBJECTS).await.unwrap();
        assert!(object_count(&manager).await > 0);

        assert_eq!(manager.reset().await.unwrap(), ResetMode::Physical);
        assert!(!manager.path().exists());
        assert!(!manager.is_open().await);

        // Second reset with nothing on disk
        assert_eq!(manager.reset().await.unwrap(), ResetMode::Physical);

        assert_eq!(object_count(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_in_memory_reset_is_logical() {
        let manager = ConnectionManager::new(DbConfig::in_memory());
        manager.acquire().await.unwrap().exec(OBJECTS).await.unwrap();

        assert_eq!(manager.reset().await.unwrap(), ResetMode::Logical);
        assert!(manager.is_open().await);
        assert_eq!(object_count(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_drop_all_objects_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(&dir);

        {
            let mut guard = manager.acquire().await.unwrap();
            guard.exec(OBJECTS).await.unwrap();
            let conn = guard.connection().await.unwrap();
            let dropped = drop_all_objects(conn, true).await.unwrap();
            assert_eq!(dropped, 5);

            let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
                .fetch_one(guard.connection().await.unwrap())
                .await
                .unwrap();
            assert_eq!(fk, 1);
        }

        assert_eq!(object_count(&manager).await, 0);
        assert!(manager.path().exists());
    }

    #[test]
    fn test_drop_priority_order() {
        let mut kinds = vec!["table", "index", "trigger", "view"];
        kinds.sort_by_key(|kind| drop_priority(kind));
        assert_eq!(kinds, vec!["trigger", "view", "index", "table"]);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
