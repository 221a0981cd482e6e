//! # Database Handle
//!
//! The single entry point screens and commands hold on to.
//!
//! ## What Lives Here
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Database                                       │
//! │                                                                         │
//! │   Arc<ConnectionManager> ──── one SqliteConnection per process         │
//! │          │                                                              │
//! │          ├── SqlExecutor ──── orders() / users()                       │
//! │          │                                                              │
//! │          └── SchemaBootstrapper ──── bootstrap() / reset()             │
//! │                       │                                                 │
//! │                       └── Option<Arc<dyn SchemaSource>>                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cloning a `Database` is cheap; every clone shares the same connection.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{BootstrapReport, SchemaBootstrapper, SchemaSource};
use crate::config::DbConfig;
use crate::connection::{ConnectionManager, ResetMode};
use crate::error::DbResult;
use crate::executor::SqlExecutor;
use crate::repository::{OrderRepository, UserRepository};

/// Shared handle to the on-device database.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::open(DbConfig::load_or_default(None)).await?
///     .with_schema_source(Arc::new(backend_client));
/// db.bootstrap(None).await?;
///
/// let page = db.orders().find_by_page(PageRequest::new(1, 20)?).await?;
/// ```
#[derive(Clone)]
pub struct Database {
    manager: Arc<ConnectionManager>,
    executor: SqlExecutor,
    schema_source: Option<Arc<dyn SchemaSource>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.manager.path())
            .field("schema_source", &self.schema_source.is_some())
            .finish()
    }
}

impl Database {
    /// Creates the handle and opens the connection immediately.
    ///
    /// ## Returns
    /// * `Ok(Database)` - connection validated and in WAL mode
    /// * `Err(DbError::ConnectionFailed)` - the engine could not open the file
    pub async fn open(config: DbConfig) -> DbResult<Self> {
        let db = Self::lazy(config)?;
        db.manager.connect().await?;
        info!(path = %db.path().display(), "Database ready");
        Ok(db)
    }

    /// Creates the handle without touching the file. The connection opens
    /// on first use.
    pub fn lazy(config: DbConfig) -> DbResult<Self> {
        config.validate()?;
        let manager = Arc::new(ConnectionManager::new(config));
        let executor = SqlExecutor::new(Arc::clone(&manager));
        Ok(Database {
            manager,
            executor,
            schema_source: None,
        })
    }

    /// Sets the collaborator that serves the schema script.
    pub fn with_schema_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.schema_source = Some(source);
        self
    }

    pub fn path(&self) -> &Path {
        self.manager.path()
    }

    pub fn executor(&self) -> &SqlExecutor {
        &self.executor
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    // =========================================================================
    // Repository Accessors
    // =========================================================================

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.executor.clone())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.executor.clone())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Applies the schema script, or fetches it from the schema source when
    /// `script` is `None`.
    pub async fn bootstrap(&self, script: Option<&str>) -> DbResult<BootstrapReport> {
        let mut bootstrapper = SchemaBootstrapper::new(Arc::clone(&self.manager));
        if let Some(source) = &self.schema_source {
            bootstrapper = bootstrapper.with_source(Arc::clone(source));
        }
        bootstrapper.bootstrap(script).await
    }

    /// Destroys every table, index, view and trigger.
    ///
    /// The next query reopens an empty database; call
    /// [`bootstrap`](Self::bootstrap) before using repositories again.
    pub async fn reset(&self) -> DbResult<ResetMode> {
        self.manager.reset().await
    }

    /// Closes the connection. Later queries reopen it.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    /// Returns true if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        self.manager.health_check().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
