//! # kiosk-db: Database Layer for Kiosk POS
//!
//! On-device storage for the kiosk: one SQLite connection shared by the
//! whole process, a schema delivered by the backend as a SQL script, and
//! repositories for orders and staff accounts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk POS Data Flow                              │
//! │                                                                         │
//! │  Screen / command (order history, daily totals, sign-in)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kiosk-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ Connection    │    │  Repositories │    │  Bootstrap   │  │   │
//! │  │   │ Manager       │    │               │    │              │  │   │
//! │  │   │               │    │ OrderRepo     │    │ fast path    │  │   │
//! │  │   │ lazy open     │◄───│ UserRepo      │    │ batched      │  │   │
//! │  │   │ WAL, reset    │    │ (SqlExecutor) │    │ fallback     │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/SQLite/kiosk.db  (+ -wal, -shm)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Database, retry and bootstrap settings (TOML + env)
//! - [`connection`] - Single shared connection, validation, reset
//! - [`executor`] - Parameter binding, lock retry, reconnect
//! - [`bootstrap`] - Schema script cleaning, splitting and application
//! - [`repository`] - Generic CRUD plus order and user repositories
//! - [`database`] - The [`Database`] handle tying it together
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kiosk_db::{Database, DbConfig};
//!
//! let db = Database::open(DbConfig::load_or_default(None)).await?
//!     .with_schema_source(Arc::new(backend));
//! db.bootstrap(None).await?;
//!
//! let today = DayRange::utc(Utc::now().date_naive())?;
//! let sales = db.orders()
//!     .get_total_sales(Some(today.start_ms), Some(today.end_ms))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod executor;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use bootstrap::{
    BootstrapPath, BootstrapReport, SchemaBootstrapper, SchemaResponse, SchemaSource,
    StatementFailure, StaticSchema,
};
pub use config::{BootstrapSettings, DatabaseSettings, DbConfig, RetryPolicy};
pub use connection::{ConnectionManager, ResetMode};
pub use database::Database;
pub use error::{DbError, DbResult};
pub use executor::{retry_on_lock, SqlExecutor, SqlValue};

// Repository re-exports for convenience
pub use repository::{OrderRepository, Repository, UserRepository};

/// Reference schema script, as served by the backend.
pub const SCHEMA_SQL: &str = include_str!("../schema/kiosk.sql");
