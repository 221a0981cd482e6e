//! # Pagination
//!
//! Page arithmetic shared by listing and search screens.
//!
//! ```text
//! page_size = 20
//!
//!   page 1 → OFFSET 0    rows  1..20
//!   page 2 → OFFSET 20   rows 21..40
//!   page 3 → OFFSET 40   rows 41..45   (total_count = 45, total_pages = 3)
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::order::Order;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Creates a page request.
    ///
    /// Page `0` is treated as page `1`; a zero page size is rejected.
    pub fn new(page: u32, page_size: u32) -> CoreResult<Self> {
        if page_size == 0 {
            return Err(CoreError::InvalidPageSize);
        }
        Ok(PageRequest {
            page: page.max(1),
            page_size,
        })
    }

    /// Current 1-based page number.
    #[inline]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of rows to skip: `(page - 1) * page_size`.
    #[inline]
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }

    /// `ceil(total_count / page_size)`.
    pub fn total_pages(&self, total_count: i64) -> i64 {
        if total_count <= 0 {
            return 0;
        }
        let size = i64::from(self.page_size);
        (total_count + size - 1) / size
    }
}

/// One page of orders plus the numbers the history screen needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total_count: i64,
    pub total_pages: i64,
    pub current_page: i64,
}

impl OrderPage {
    /// Assembles a page from a query result and the total row count.
    pub fn new(orders: Vec<Order>, total_count: i64, request: PageRequest) -> Self {
        OrderPage {
            orders,
            total_count,
            total_pages: request.total_pages(total_count),
            current_page: i64::from(request.page()),
        }
    }
}

/// Optional filters for order search. Every present filter is ANDed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderSearch {
    /// Matched against staff id and the order id as text.
    pub term: Option<String>,
    /// Inclusive lower bound on `order_timestamp` (epoch millis).
    pub start: Option<i64>,
    /// Inclusive upper bound on `order_timestamp` (epoch millis).
    pub end: Option<i64>,
}

impl OrderSearch {
    /// Search on text only.
    pub fn term(term: impl Into<String>) -> Self {
        OrderSearch {
            term: Some(term.into()),
            ..Default::default()
        }
    }

    /// Sets the inclusive timestamp range.
    pub fn between(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// The search term, if it contains anything but whitespace.
    pub fn active_term(&self) -> Option<&str> {
        self.term
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    /// Returns true when no filter applies.
    pub fn is_unfiltered(&self) -> bool {
        self.active_term().is_none() && self.start.is_none() && self.end.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::new(1, 20).unwrap().offset(), 0);
        assert_eq!(PageRequest::new(3, 20).unwrap().offset(), 40);
        // Page 0 is clamped to the first page
        assert_eq!(PageRequest::new(0, 20).unwrap().offset(), 0);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert_eq!(PageRequest::new(1, 0), Err(CoreError::InvalidPageSize));
    }

    #[test]
    fn test_total_pages_is_ceiling() {
        let req = PageRequest::new(1, 20).unwrap();
        assert_eq!(req.total_pages(0), 0);
        assert_eq!(req.total_pages(1), 1);
        assert_eq!(req.total_pages(20), 1);
        assert_eq!(req.total_pages(21), 2);
        assert_eq!(req.total_pages(45), 3);
    }

    #[test]
    fn test_blank_term_is_unfiltered() {
        assert!(OrderSearch::term("   ").is_unfiltered());
        assert!(OrderSearch::default().is_unfiltered());
        assert!(!OrderSearch::default().between(Some(0), None).is_unfiltered());
        assert_eq!(OrderSearch::term(" s-01 ").active_term(), Some("s-01"));
    }

    #[test]
    fn test_page_serializes_camel_case() {
        let page = OrderPage::new(Vec::new(), 45, PageRequest::new(2, 20).unwrap());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["totalCount"], 45);
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["currentPage"], 2);
        assert!(json["orders"].as_array().unwrap().is_empty());
    }
}
