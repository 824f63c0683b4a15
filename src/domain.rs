//! ==============================================================================
//! domain.rs - the reading record and the value types around it
//! ==============================================================================
//!
//! purpose:
//!     defines the one entity the hub deals in (a soil reading) together with
//!     the small value types the services pass around: measurement domains,
//!     store ids and half-open time ranges.
//!
//! relationships:
//!     - built by: validator.rs (from an untrusted payload)
//!     - persisted by: store/ (append-only)
//!     - pushed by: hub.rs (one copy per subscriber queue)
//!     - queried by: history.rs (via TimeRange)
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// one timestamped soil measurement
///
/// the timestamp is always assigned by the hub at acceptance time, never
/// taken from the device.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// temperature in degrees celsius
    pub temperature: f64,
    /// soil moisture (0-100%)
    pub moisture: f64,
    /// soil ph (0-14)
    pub ph: f64,
    /// acceptance instant (utc)
    pub timestamp: DateTime<Utc>,
}

/// inclusive numeric domain a measurement must fall in
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Domain {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const TEMPERATURE: Domain = Domain::new(-50.0, 100.0);
pub const MOISTURE: Domain = Domain::new(0.0, 100.0);
pub const PH: Domain = Domain::new(0.0, 14.0);

/// position of a reading in the store's append order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StoreId(pub u64);

/// half-open time window `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// the utc calendar day `[00:00 of date, 00:00 of date + 1)`
    pub fn for_day(date: NaiveDate) -> Self {
        let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));
        let end = date
            .succ_opt()
            .map(midnight)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            start: midnight(date),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_range_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let range = TimeRange::for_day(day);

        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert!(range.contains(range.start));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap()));
        assert!(!range.contains(range.end));
    }

    #[test]
    fn domains_are_inclusive() {
        assert!(PH.contains(0.0));
        assert!(PH.contains(14.0));
        assert!(!PH.contains(14.000_1));
        assert!(TEMPERATURE.contains(-50.0));
        assert!(!MOISTURE.contains(-0.5));
    }
}
