//! # Repository Module
//!
//! Database repository implementations for Kiosk POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layering                                  │
//! │                                                                         │
//! │  Screen / command                                                      │
//! │       │                                                                 │
//! │       │  db.orders().search_with_pagination(page, &search)             │
//! │       ▼                                                                 │
//! │  OrderRepository / UserRepository   (entity-specific queries)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  TableRepository<E>                                                    │
//! │  ├── find_all / find_by_id / count / delete                            │
//! │  └── insert / update_fields   (InsertBuilder / UpdateBuilder)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqlExecutor  (lock retry, reconnect)                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OrderRepository`] - Orders, pagination, search, reports
//! - [`UserRepository`] - Staff accounts

pub mod order;
pub mod user;

pub use order::OrderRepository;
pub use user::UserRepository;

use std::marker::PhantomData;

use async_trait::async_trait;
use kiosk_core::{Order, User};
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::executor::{check_identifier, SqlExecutor, SqlValue};

/// Columns the engine owns; builders never write them from input.
const ENGINE_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

// =============================================================================
// Entity
// =============================================================================

/// A row type bound to one table.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'static {
    /// Table name.
    const TABLE: &'static str;
    /// Primary key column.
    const PRIMARY_KEY: &'static str = "id";
    /// Human-readable name used in NotFound errors.
    const NAME: &'static str;
}

impl Entity for Order {
    const TABLE: &'static str = "simple_orders";
    const NAME: &'static str = "Order";
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const NAME: &'static str = "User";
}

// =============================================================================
// Statement Builders
// =============================================================================

/// One column assignment. `None` means "not provided" and is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub column: &'static str,
    pub value: Option<SqlValue>,
}

impl Field {
    /// A value that is always written.
    pub fn set(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Field {
            column,
            value: Some(value.into()),
        }
    }

    /// A value that is written only when present.
    pub fn maybe<T: Into<SqlValue>>(column: &'static str, value: Option<T>) -> Self {
        Field {
            column,
            value: value.map(Into::into),
        }
    }
}

/// Converts an input struct into column assignments.
pub trait ToFields {
    fn to_fields(&self) -> Vec<Field>;
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

fn writable(fields: Vec<Field>) -> DbResult<Vec<(&'static str, SqlValue)>> {
    fields
        .into_iter()
        .filter(|field| !ENGINE_COLUMNS.contains(&field.column))
        .filter_map(|field| field.value.map(|value| (field.column, value)))
        .map(|(column, value)| check_identifier(column).map(|_| (column, value)))
        .collect()
}

/// Builds `INSERT INTO t (a, b) VALUES (?, ?)` from the provided fields.
pub struct InsertBuilder;

impl InsertBuilder {
    pub fn build(table: &str, fields: Vec<Field>) -> DbResult<Statement> {
        let table = check_identifier(table)?;
        let (columns, params): (Vec<_>, Vec<_>) = writable(fields)?.into_iter().unzip();

        if columns.is_empty() {
            return Err(DbError::QueryFailed(format!(
                "insert into {table} has no columns"
            )));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Statement {
            sql: format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                columns.join(", ")
            ),
            params,
        })
    }
}

/// Builds `UPDATE t SET a = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?`.
pub struct UpdateBuilder;

impl UpdateBuilder {
    pub fn build(table: &str, primary_key: &str, id: i64, fields: Vec<Field>) -> DbResult<Statement> {
        let table = check_identifier(table)?;
        let primary_key = check_identifier(primary_key)?;

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in writable(fields)? {
            assignments.push(format!("{column} = ?"));
            params.push(value);
        }
        assignments.push("updated_at = CURRENT_TIMESTAMP".to_string());
        params.push(SqlValue::Integer(id));

        Ok(Statement {
            sql: format!(
                "UPDATE {table} SET {} WHERE {primary_key} = ?",
                assignments.join(", ")
            ),
            params,
        })
    }
}

// =============================================================================
// Table Repository
// =============================================================================

/// CRUD primitives shared by every entity.
#[derive(Debug, Clone)]
pub struct TableRepository<E> {
    executor: SqlExecutor,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> TableRepository<E> {
    pub fn new(executor: SqlExecutor) -> Self {
        TableRepository {
            executor,
            _entity: PhantomData,
        }
    }

    pub fn executor(&self) -> &SqlExecutor {
        &self.executor
    }

    /// Every row, newest first.
    pub async fn find_all(&self) -> DbResult<Vec<E>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY created_at DESC, {pk} DESC",
            E::TABLE,
            pk = E::PRIMARY_KEY
        );
        self.executor.query_all(&sql, &[]).await
    }

    /// The row with primary key `id`, or `None`.
    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<E>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ?", E::TABLE, E::PRIMARY_KEY);
        self.executor.query_one(&sql, &[SqlValue::Integer(id)]).await
    }

    /// Like [`find_by_id`](Self::find_by_id) but missing rows are an error.
    pub async fn get(&self, id: i64) -> DbResult<E> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found(E::NAME, id))
    }

    pub async fn count(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", E::TABLE);
        self.executor.query_scalar_i64(&sql, &[]).await
    }

    /// Deletes by primary key. Returns false if nothing matched.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        debug!(table = E::TABLE, id, "Deleting row");
        let sql = format!("DELETE FROM {} WHERE {} = ?", E::TABLE, E::PRIMARY_KEY);
        let affected = self.executor.execute(&sql, &[SqlValue::Integer(id)]).await?;
        Ok(affected > 0)
    }

    /// Inserts the provided fields and returns the new id.
    pub async fn insert(&self, fields: Vec<Field>) -> DbResult<i64> {
        let statement = InsertBuilder::build(E::TABLE, fields)?;
        let id = self.executor.run(&statement.sql, &statement.params).await?;
        debug!(table = E::TABLE, id, "Inserted row");
        Ok(id)
    }

    /// Updates the provided fields and stamps `updated_at`.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no row has this id
    pub async fn update_fields(&self, id: i64, fields: Vec<Field>) -> DbResult<()> {
        let statement = UpdateBuilder::build(E::TABLE, E::PRIMARY_KEY, id, fields)?;
        let affected = self.executor.execute(&statement.sql, &statement.params).await?;
        if affected == 0 {
            return Err(DbError::not_found(E::NAME, id));
        }
        Ok(())
    }
}

// =============================================================================
// Repository Trait
// =============================================================================

/// Uniform CRUD surface over a [`TableRepository`].
///
/// Entity repositories implement `create` and `update`; everything else
/// is inherited.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: Entity;
    type New: Send + Sync;
    type Patch: Send + Sync;

    fn table(&self) -> &TableRepository<Self::Entity>;

    /// Inserts a new row and returns its id.
    async fn create(&self, data: &Self::New) -> DbResult<i64>;

    /// Applies a partial update.
    async fn update(&self, id: i64, patch: &Self::Patch) -> DbResult<()>;

    async fn find_all(&self) -> DbResult<Vec<Self::Entity>> {
        self.table().find_all().await
    }

    async fn find_by_id(&self, id: i64) -> DbResult<Option<Self::Entity>> {
        self.table().find_by_id(id).await
    }

    async fn count(&self) -> DbResult<i64> {
        self.table().count().await
    }

    async fn delete(&self, id: i64) -> DbResult<bool> {
        self.table().delete(id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
