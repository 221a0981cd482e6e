//! # Order Types
//!
//! The `simple_orders` record: one row per completed checkout.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CHECKOUT                                                           │
//! │     └── create(NewOrder) → Order { status: Completed,                  │
//! │                                    sync_status: Pending }              │
//! │                                                                         │
//! │  2. UPLOAD                                                             │
//! │     └── update_sync_status(id, Synced | Failed) → stamps synced_at     │
//! │                                                                         │
//! │  3. (OPTIONAL) VOID                                                    │
//! │     └── void(id) → Order { status: Voided }   (row is kept)            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Business Timestamp vs Row Timestamps
//! `order_timestamp` is the checkout time chosen by the app (epoch millis)
//! and drives reports and date filters. `created_at` / `updated_at` are
//! stamped by the engine and only drive listing order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

/// Payment method stored when the checkout screen does not supply one.
pub const DEFAULT_PAYMENT_METHOD: &str = "cash";

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Paid and counted in sales reports.
    #[default]
    Completed,
    /// Logically retired; excluded from sales reports.
    Voided,
}

impl OrderStatus {
    /// Returns the tag stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Completed => "completed",
            OrderStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Ok(OrderStatus::Completed),
            "voided" | "void" => Ok(OrderStatus::Voided),
            other => Err(CoreError::unknown_tag("order status", other)),
        }
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Whether a locally created order has reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not uploaded yet.
    #[default]
    Pending,
    /// Accepted by the backend.
    Synced,
    /// Last upload attempt failed.
    Failed,
}

impl SyncStatus {
    /// Returns the tag stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(CoreError::unknown_tag("sync status", other)),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A persisted order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    /// Engine-assigned primary key.
    pub id: i64,

    /// Staff member who rang up the order.
    pub staff_id: String,

    /// Business timestamp of the checkout (epoch millis).
    pub order_timestamp: i64,

    /// Serialized line items. Owned by the caller, never parsed here.
    pub products: String,

    pub products_subtotal_cents: i64,
    pub misc_fee_cents: i64,
    /// Total before discount.
    pub total_cents: i64,
    pub discount_cents: i64,
    pub net_amount_cents: i64,
    pub net_received_cents: i64,
    /// `net_received - net_amount`, computed by the checkout screen.
    pub change_cents: i64,

    /// Free-text reference (card slip number, transfer note, ...).
    pub payment_reference: String,

    pub payment_method: String,

    /// Whether the products subtotal was typed in manually.
    pub is_override: bool,

    pub status: OrderStatus,
    pub sync_status: SyncStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Returns true if the order counts towards sales totals.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == OrderStatus::Completed
    }
}

// =============================================================================
// New Order
// =============================================================================

/// Input for inserting an order at checkout completion.
///
/// Optional fields are defaulted by the repository:
/// `payment_reference` → `""`, `is_override` → `false`,
/// `payment_method` → [`DEFAULT_PAYMENT_METHOD`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOrder {
    pub staff_id: String,
    pub order_timestamp: i64,
    pub products: String,
    pub products_subtotal_cents: i64,
    pub misc_fee_cents: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub net_amount_cents: i64,
    pub net_received_cents: i64,
    pub change_cents: i64,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub is_override: Option<bool>,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

// =============================================================================
// Order Patch
// =============================================================================

/// Partial update of an order. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderPatch {
    pub staff_id: Option<String>,
    pub order_timestamp: Option<i64>,
    pub products: Option<String>,
    pub products_subtotal_cents: Option<i64>,
    pub misc_fee_cents: Option<i64>,
    pub total_cents: Option<i64>,
    pub discount_cents: Option<i64>,
    pub net_amount_cents: Option<i64>,
    pub net_received_cents: Option<i64>,
    pub change_cents: Option<i64>,
    pub payment_reference: Option<String>,
    pub payment_method: Option<String>,
    pub is_override: Option<bool>,
    pub status: Option<OrderStatus>,
    pub sync_status: Option<SyncStatus>,
}

impl OrderPatch {
    /// Returns true when the patch would not change any column.
    pub fn is_empty(&self) -> bool {
        *self == OrderPatch::default()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
