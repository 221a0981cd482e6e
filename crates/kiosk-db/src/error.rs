//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Classified ONCE into a closed set of kinds    │
//! │       │                                                                 │
//! │       ├── Locked          → executor backs off and retries             │
//! │       ├── ConnectionLost  → handle discarded, statement retried once   │
//! │       ├── AlreadyExists / NoSuchObject → ignorable during bootstrap    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UI layer ← everything else, unchanged                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Upper layers branch on variants and predicates, never on message text.

use thiserror::Error;

use kiosk_core::CoreError;

use crate::bootstrap::StatementFailure;

// SQLite primary result codes (low byte of the extended code).
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_MISUSE: i32 = 21;
const SQLITE_NOTADB: i32 = 26;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - Updating an id that doesn't exist
    /// - `fetch_one` returns no rows
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a duplicate user email
    #[error("Duplicate value for {field}")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The embedded SQL engine is not available on this target.
    #[error("Embedded SQLite is not available on this platform")]
    PlatformUnsupported,

    /// Database connection could not be created.
    ///
    /// ## When This Occurs
    /// - Database file can't be created (permissions, disk full)
    /// - The validation query failed twice
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The live handle is unusable and must be recreated.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Another writer holds the database lock.
    #[error("Database is locked: {0}")]
    Locked(String),

    /// Schema object already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Schema object (table, index, view, trigger) does not exist.
    #[error("No such object: {0}")]
    NoSuchObject(String),

    /// Query execution failed.
    ///
    /// ## When This Occurs
    /// - SQL syntax error
    /// - CHECK / NOT NULL constraint failure
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Remote schema collaborator reported failure or returned no script.
    #[error("Schema fetch failed: {0}")]
    SchemaFetch(String),

    /// Schema bootstrap finished with critical statement failures.
    #[error(
        "Schema bootstrap failed with {} critical error(s): {}",
        .failures.len(),
        summarize(.failures)
    )]
    SchemaApply { failures: Vec<StatementFailure> },

    /// Destructive reset could not complete.
    #[error("Reset failed: {0}")]
    ResetFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Caller supplied an invalid domain value.
    #[error("Invalid input: {0}")]
    Invalid(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Transient contention: worth retrying after a delay.
    pub fn is_transient_lock(&self) -> bool {
        matches!(self, DbError::Locked(_))
    }

    /// The handle itself is bad: worth recreating the connection.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, DbError::ConnectionLost(_))
    }

    /// Schema-state errors that re-applying a script is expected to hit.
    pub fn is_ignorable_schema_error(&self) -> bool {
        matches!(self, DbError::AlreadyExists(_) | DbError::NoSuchObject(_))
    }
}

fn summarize(failures: &[StatementFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → result code / constraint kind / message
/// sqlx::Error::Io             → DbError::ConnectionLost
/// sqlx::Error::WorkerCrashed  → DbError::ConnectionLost
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => {
                        return DbError::UniqueViolation {
                            field: constraint_target(db_err.message()),
                        };
                    }
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        return DbError::ForeignKeyViolation {
                            message: db_err.message().to_string(),
                        };
                    }
                    _ => {}
                }

                let code = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|extended| extended & 0xff);

                classify(code, db_err.message())
            }

            sqlx::Error::Io(io_err) => DbError::ConnectionLost(io_err.to_string()),

            sqlx::Error::WorkerCrashed => {
                DbError::ConnectionLost("SQLite worker thread crashed".to_string())
            }

            sqlx::Error::Protocol(message) => DbError::ConnectionLost(message),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

/// Classifies an engine failure from its primary result code and message.
///
/// SQLite reports schema-state problems ("already exists", "no such table")
/// with the generic SQLITE_ERROR code, so those are recognized by message.
pub(crate) fn classify(code: Option<i32>, message: &str) -> DbError {
    let lowered = message.to_ascii_lowercase();

    if matches!(code, Some(SQLITE_BUSY | SQLITE_LOCKED))
        || lowered.contains("database is locked")
        || lowered.contains("database table is locked")
        || lowered.contains("database is busy")
    {
        return DbError::Locked(message.to_string());
    }

    if matches!(code, Some(SQLITE_MISUSE | SQLITE_CORRUPT | SQLITE_NOTADB))
        || lowered.contains("null pointer")
        || lowered.contains("nullpointerexception")
        || lowered.contains("cannot read property")
    {
        return DbError::ConnectionLost(message.to_string());
    }

    if lowered.contains("unique constraint failed") {
        return DbError::UniqueViolation {
            field: constraint_target(message),
        };
    }

    if lowered.contains("foreign key constraint failed") {
        return DbError::ForeignKeyViolation {
            message: message.to_string(),
        };
    }

    if lowered.contains("already exists") {
        return DbError::AlreadyExists(message.to_string());
    }

    if lowered.contains("no such table")
        || lowered.contains("no such index")
        || lowered.contains("no such view")
        || lowered.contains("no such trigger")
    {
        return DbError::NoSuchObject(message.to_string());
    }

    DbError::QueryFailed(message.to_string())
}

/// Extracts `table.column` from "UNIQUE constraint failed: table.column".
fn constraint_target(message: &str) -> String {
    message
        .split("constraint failed: ")
        .nth(1)
        .unwrap_or("unknown")
        .to_string()
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_classification() {
        assert!(classify(Some(5), "database is locked").is_transient_lock());
        assert!(classify(Some(6), "database table is locked: orders").is_transient_lock());
        // Message alone is enough when the code is missing
        assert!(classify(None, "SQLITE_BUSY: database is locked").is_transient_lock());
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(classify(Some(21), "bad parameter or other API misuse").is_connection_lost());
        assert!(classify(None, "java.lang.NullPointerException").is_connection_lost());
        assert!(classify(None, "Cannot read property 'execAsync' of null").is_connection_lost());
    }

    #[test]
    fn test_schema_state_classification() {
        let err = classify(Some(1), "table simple_orders already exists");
        assert!(matches!(err, DbError::AlreadyExists(_)));
        assert!(err.is_ignorable_schema_error());

        let err = classify(Some(1), "no such table: legacy_orders");
        assert!(matches!(err, DbError::NoSuchObject(_)));
        assert!(err.is_ignorable_schema_error());

        let err = classify(Some(1), "near \"CREAT\": syntax error");
        assert!(matches!(err, DbError::QueryFailed(_)));
        assert!(!err.is_ignorable_schema_error());
        assert!(!err.is_transient_lock());
    }

    #[test]
    fn test_unique_violation_field() {
        let err = classify(Some(19), "UNIQUE constraint failed: users.email");
        match err {
            DbError::UniqueViolation { field } => assert_eq!(field, "users.email"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_schema_apply_message_lists_every_failure() {
        let err = DbError::SchemaApply {
            failures: vec![
                StatementFailure {
                    index: 3,
                    statement: "CREAT TABLE a (id)".to_string(),
                    message: "syntax error".to_string(),
                },
                StatementFailure {
                    index: 9,
                    statement: "INSERT INTO b VALUES (1)".to_string(),
                    message: "no such column".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 critical error(s)"));
        assert!(text.contains("statement 4"));
        assert!(text.contains("statement 10"));
    }
}
