//! # Business-Day Ranges
//!
//! Reports filter on `order_timestamp`, an epoch-millis value. A "day" is
//! the inclusive range from the first to the last millisecond of a calendar
//! date in the shop's UTC offset.

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

/// Inclusive epoch-millis range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DayRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl DayRange {
    /// Range covering `date` in UTC.
    pub fn utc(date: NaiveDate) -> CoreResult<Self> {
        Self::in_offset(date, Utc.fix())
    }

    /// Range covering `date` in the given fixed offset.
    pub fn in_offset(date: NaiveDate, offset: FixedOffset) -> CoreResult<Self> {
        Self::spanning(date, date, offset)
    }

    /// Range from the start of `first` to the end of `last`, inclusive.
    pub fn spanning(first: NaiveDate, last: NaiveDate, offset: FixedOffset) -> CoreResult<Self> {
        if last < first {
            return Err(CoreError::InvalidRange(format!("{last} is before {first}")));
        }

        let start = offset
            .from_local_datetime(&first.and_time(NaiveTime::MIN))
            .single()
            .ok_or_else(|| CoreError::InvalidRange(format!("no start of day for {first}")))?;

        let next_day = last
            .succ_opt()
            .ok_or_else(|| CoreError::InvalidRange(format!("no day after {last}")))?;
        let end = offset
            .from_local_datetime(&next_day.and_time(NaiveTime::MIN))
            .single()
            .ok_or_else(|| CoreError::InvalidRange(format!("no end of day for {last}")))?;

        Ok(DayRange {
            start_ms: start.timestamp_millis(),
            end_ms: end.timestamp_millis() - 1,
        })
    }

    /// Returns true if `timestamp_ms` falls inside the range.
    #[inline]
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms <= self.end_ms
    }
}
