//! # Error Types
//!
//! Domain-specific error types for kiosk-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kiosk-core errors (this file)                                         │
//! │  └── CoreError        - Invalid domain input                           │
//! │                                                                         │
//! │  kiosk-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  Flow: CoreError → DbError::Invalid → UI layer message                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Domain errors raised while constructing or parsing domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Page size must be at least one row.
    #[error("Page size must be greater than 0")]
    InvalidPageSize,

    /// A stored or supplied status tag is not one of the known values.
    ///
    /// ## When This Occurs
    /// - Parsing `status` / `sync_status` / `role` strings from the UI
    #[error("Unknown {kind} '{value}'")]
    UnknownTag { kind: &'static str, value: String },

    /// A calendar date could not be turned into a timestamp range.
    #[error("Invalid date range: {0}")]
    InvalidRange(String),
}

impl CoreError {
    /// Creates an UnknownTag error.
    pub fn unknown_tag(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::UnknownTag {
            kind,
            value: value.into(),
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CoreError::unknown_tag("order status", "refunded").to_string(),
            "Unknown order status 'refunded'"
        );
        assert_eq!(
            CoreError::InvalidPageSize.to_string(),
            "Page size must be greater than 0"
        );
    }
}
