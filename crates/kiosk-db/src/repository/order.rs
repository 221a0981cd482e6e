//! # Order Repository
//!
//! Database operations for the `simple_orders` table.
//!
//! ## Query Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Queries                                     │
//! │                                                                         │
//! │  LISTING (history screen)                                              │
//! │     └── ORDER BY created_at DESC, id DESC  LIMIT ? OFFSET ?            │
//! │                                                                         │
//! │  SEARCH                                                                │
//! │     └── (staff_id LIKE ? OR CAST(id AS TEXT) LIKE ?)                   │
//! │         AND order_timestamp >= ?  AND order_timestamp <= ?             │
//! │         (each clause only when its filter is present)                  │
//! │                                                                         │
//! │  REPORTS                                                               │
//! │     └── status = 'completed' [AND order_timestamp in range]            │
//! │         COALESCE(SUM(net_amount_cents), 0) / COUNT(*)                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use tracing::{debug, info};

use kiosk_core::{
    CoreError, NewOrder, Order, OrderPage, OrderPatch, OrderSearch, OrderStatus, PageRequest,
    SyncStatus, DEFAULT_PAYMENT_METHOD,
};

use crate::error::{DbError, DbResult};
use crate::executor::{SqlExecutor, SqlValue};
use crate::repository::{Entity, Field, Repository, TableRepository, ToFields};

const INSERT_ORDER: &str = r#"
    INSERT INTO simple_orders (
        staff_id, order_timestamp, products,
        products_subtotal_cents, misc_fee_cents, total_cents, discount_cents,
        net_amount_cents, net_received_cents, change_cents,
        payment_reference, payment_method, is_override,
        status, sync_status
    ) VALUES (
        ?, ?, ?,
        ?, ?, ?, ?,
        ?, ?, ?,
        ?, ?, ?,
        ?, ?
    )
"#;

const NEWEST_FIRST: &str = "ORDER BY created_at DESC, id DESC";

impl ToFields for OrderPatch {
    fn to_fields(&self) -> Vec<Field> {
        vec![
            Field::maybe("staff_id", self.staff_id.clone()),
            Field::maybe("order_timestamp", self.order_timestamp),
            Field::maybe("products", self.products.clone()),
            Field::maybe("products_subtotal_cents", self.products_subtotal_cents),
            Field::maybe("misc_fee_cents", self.misc_fee_cents),
            Field::maybe("total_cents", self.total_cents),
            Field::maybe("discount_cents", self.discount_cents),
            Field::maybe("net_amount_cents", self.net_amount_cents),
            Field::maybe("net_received_cents", self.net_received_cents),
            Field::maybe("change_cents", self.change_cents),
            Field::maybe("payment_reference", self.payment_reference.clone()),
            Field::maybe("payment_method", self.payment_method.clone()),
            Field::maybe("is_override", self.is_override),
            Field::maybe("status", self.status),
            Field::maybe("sync_status", self.sync_status),
        ]
    }
}

// =============================================================================
// Filters
// =============================================================================

/// WHERE clause under construction. Parameters stay in clause order.
#[derive(Debug, Default)]
struct Filter {
    clauses: Vec<&'static str>,
    params: Vec<SqlValue>,
}

impl Filter {
    fn search(search: &OrderSearch) -> Self {
        let mut filter = Filter::default();
        if search.is_unfiltered() {
            return filter;
        }

        if let Some(term) = search.active_term() {
            let pattern = format!("%{}%", escape_like(term));
            filter.clauses.push(
                "(staff_id LIKE ? ESCAPE '\\' OR CAST(id AS TEXT) LIKE ? ESCAPE '\\')",
            );
            filter.params.push(SqlValue::Text(pattern.clone()));
            filter.params.push(SqlValue::Text(pattern));
        }

        filter.range(search.start, search.end)
    }

    fn completed() -> Self {
        Filter {
            clauses: vec!["status = ?"],
            params: vec![OrderStatus::Completed.into()],
        }
    }

    fn range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        if let Some(start) = start {
            self.clauses.push("order_timestamp >= ?");
            self.params.push(SqlValue::Integer(start));
        }
        if let Some(end) = end {
            self.clauses.push("order_timestamp <= ?");
            self.params.push(SqlValue::Integer(end));
        }
        self
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Rejects a range whose end precedes its start. Open bounds always pass.
fn check_range(start: Option<i64>, end: Option<i64>) -> DbResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(DbError::Invalid(
            CoreError::InvalidRange(format!("end {end} is before start {start}")),
        )),
        _ => Ok(()),
    }
}

/// Escapes LIKE wildcards so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

// =============================================================================
// Order Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: TableRepository<Order>,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(executor: SqlExecutor) -> Self {
        OrderRepository {
            base: TableRepository::new(executor),
        }
    }

    fn executor(&self) -> &SqlExecutor {
        self.base.executor()
    }

    /// Inserts an order at checkout completion.
    ///
    /// ## Defaults
    /// * `payment_reference` → `""`
    /// * `payment_method` → `"cash"`
    /// * `is_override` → `false`
    ///
    /// ## Returns
    /// The engine-assigned id.
    pub async fn create(&self, order: &NewOrder) -> DbResult<i64> {
        let params = vec![
            SqlValue::from(order.staff_id.as_str()),
            SqlValue::from(order.order_timestamp),
            SqlValue::from(order.products.as_str()),
            SqlValue::from(order.products_subtotal_cents),
            SqlValue::from(order.misc_fee_cents),
            SqlValue::from(order.total_cents),
            SqlValue::from(order.discount_cents),
            SqlValue::from(order.net_amount_cents),
            SqlValue::from(order.net_received_cents),
            SqlValue::from(order.change_cents),
            SqlValue::from(order.payment_reference.clone().unwrap_or_default()),
            SqlValue::from(
                order
                    .payment_method
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
            ),
            SqlValue::from(order.is_override.unwrap_or(false)),
            SqlValue::from(order.status),
            SqlValue::from(order.sync_status),
        ];

        let id = self.executor().run(INSERT_ORDER, &params).await?;
        info!(id, staff_id = %order.staff_id, net_cents = order.net_amount_cents, "Order created");
        Ok(id)
    }

    /// Applies a partial update and stamps `updated_at`.
    ///
    /// An empty patch writes nothing; it only checks that the order exists.
    pub async fn update(&self, id: i64, patch: &OrderPatch) -> DbResult<()> {
        if patch.is_empty() {
            debug!(id, "Empty order patch, nothing to write");
            return self.base.get(id).await.map(|_| ());
        }
        debug!(id, "Updating order");
        self.base.update_fields(id, patch.to_fields()).await
    }

    /// Marks an order voided. The row is kept.
    pub async fn void(&self, id: i64) -> DbResult<()> {
        info!(id, "Voiding order");
        let patch = OrderPatch {
            status: Some(OrderStatus::Voided),
            ..Default::default()
        };
        self.update(id, &patch).await
    }

    /// One page of orders, newest first.
    pub async fn find_by_page(&self, page: PageRequest) -> DbResult<OrderPage> {
        self.search_with_pagination(page, &OrderSearch::default())
            .await
    }

    /// One page of orders matching every present filter, newest first.
    ///
    /// The term matches staff id or order id as substrings,
    /// case-insensitively. Range bounds are inclusive.
    ///
    /// ## Errors
    /// * `DbError::Invalid` - both bounds given and `end < start`
    pub async fn search_with_pagination(
        &self,
        page: PageRequest,
        search: &OrderSearch,
    ) -> DbResult<OrderPage> {
        check_range(search.start, search.end)?;
        let filter = Filter::search(search);
        let where_clause = filter.where_clause();

        let count_sql = format!("SELECT COUNT(*) FROM {}{where_clause}", Order::TABLE);
        let total_count = self
            .executor()
            .query_scalar_i64(&count_sql, &filter.params)
            .await?;

        let list_sql = format!(
            "SELECT * FROM {}{where_clause} {NEWEST_FIRST} LIMIT ? OFFSET ?",
            Order::TABLE
        );
        let mut params = filter.params;
        params.push(SqlValue::from(page.page_size()));
        params.push(SqlValue::Integer(page.offset()));

        let orders = self.executor().query_all(&list_sql, &params).await?;

        debug!(
            page = page.page(),
            filtered = !search.is_unfiltered(),
            total_count,
            returned = orders.len(),
            "Order page loaded"
        );
        Ok(OrderPage::new(orders, total_count, page))
    }

    /// Orders whose business timestamp falls in `[start, end]`.
    pub async fn find_by_date_range(&self, start: i64, end: i64) -> DbResult<Vec<Order>> {
        check_range(Some(start), Some(end))?;
        self.find_where(Filter::default().range(Some(start), Some(end)))
            .await
    }

    pub async fn find_by_status(&self, status: OrderStatus) -> DbResult<Vec<Order>> {
        self.find_where(Filter {
            clauses: vec!["status = ?"],
            params: vec![status.into()],
        })
        .await
    }

    pub async fn find_by_sync_status(&self, status: SyncStatus) -> DbResult<Vec<Order>> {
        self.find_where(Filter {
            clauses: vec!["sync_status = ?"],
            params: vec![status.into()],
        })
        .await
    }

    pub async fn find_by_staff_id(&self, staff_id: &str) -> DbResult<Vec<Order>> {
        self.find_where(Filter {
            clauses: vec!["staff_id = ?"],
            params: vec![staff_id.into()],
        })
        .await
    }

    async fn find_where(&self, filter: Filter) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT * FROM {}{} {NEWEST_FIRST}",
            Order::TABLE,
            filter.where_clause()
        );
        self.executor().query_all(&sql, &filter.params).await
    }

    /// Records an upload result and stamps `synced_at`.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no order has this id
    pub async fn update_sync_status(&self, id: i64, status: SyncStatus) -> DbResult<()> {
        let affected = self
            .executor()
            .execute(
                "UPDATE simple_orders \
                 SET sync_status = ?, synced_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?",
                &[status.into(), SqlValue::Integer(id)],
            )
            .await?;

        if affected == 0 {
            return Err(DbError::not_found(Order::NAME, id));
        }

        debug!(id, %status, "Order sync status updated");
        Ok(())
    }

    /// Sum of `net_amount_cents` over completed orders in the optional range.
    pub async fn get_total_sales(&self, start: Option<i64>, end: Option<i64>) -> DbResult<i64> {
        check_range(start, end)?;
        let filter = Filter::completed().range(start, end);
        let sql = format!(
            "SELECT COALESCE(SUM(net_amount_cents), 0) FROM {}{}",
            Order::TABLE,
            filter.where_clause()
        );
        self.executor().query_scalar_i64(&sql, &filter.params).await
    }

    /// Number of completed orders in the optional range.
    pub async fn get_order_count(&self, start: Option<i64>, end: Option<i64>) -> DbResult<i64> {
        check_range(start, end)?;
        let filter = Filter::completed().range(start, end);
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            Order::TABLE,
            filter.where_clause()
        );
        self.executor().query_scalar_i64(&sql, &filter.params).await
    }

    /// Removes every order. Returns the number of rows deleted.
    pub async fn delete_all(&self) -> DbResult<u64> {
        let deleted = self
            .executor()
            .execute("DELETE FROM simple_orders", &[])
            .await?;
        info!(deleted, "All orders deleted");
        Ok(deleted)
    }
}

#[async_trait]
impl Repository for OrderRepository {
    type Entity = Order;
    type New = NewOrder;
    type Patch = OrderPatch;

    fn table(&self) -> &TableRepository<Order> {
        &self.base
    }

    async fn create(&self, data: &NewOrder) -> DbResult<i64> {
        OrderRepository::create(self, data).await
    }

    async fn update(&self, id: i64, patch: &OrderPatch) -> DbResult<()> {
        OrderRepository::update(self, id, patch).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
