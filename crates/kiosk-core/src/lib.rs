//! # kiosk-core: Domain Types for Kiosk POS
//!
//! This crate holds the records the point-of-sale app persists locally and
//! the small amount of pure arithmetic around them (pagination, business-day
//! ranges). It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Mobile UI (out of scope)                     │   │
//! │  │    Checkout ──► Receipt ──► Order history ──► Reports          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ typed read/write calls                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kiosk-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   order   │  │   user    │  │   page    │  │   time    │  │   │
//! │  │   │  Order    │  │   User    │  │ PageReq   │  │ DayRange  │  │   │
//! │  │   │ NewOrder  │  │ UserRole  │  │ OrderPage │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kiosk-db (Database Layer)                    │   │
//! │  │        connection, schema bootstrap, repositories               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`order`] - The `simple_orders` record and its inputs
//! - [`user`] - Staff accounts
//! - [`page`] - Pagination requests and results
//! - [`time`] - Epoch-millis business-day ranges for reports
//! - [`error`] - Domain error types
//!
//! ## Integer Money
//! All monetary values are in cents (i64). The repository never recomputes
//! derived amounts: `change_cents` is whatever the checkout screen computed.

pub mod error;
pub mod order;
pub mod page;
pub mod time;
pub mod user;

pub use error::{CoreError, CoreResult};
pub use order::{NewOrder, Order, OrderPatch, OrderStatus, SyncStatus, DEFAULT_PAYMENT_METHOD};
pub use page::{OrderPage, OrderSearch, PageRequest};
pub use time::DayRange;
pub use user::{NewUser, User, UserPatch, UserRole};
