//! Time types for DAGLINE.
//!
//! Scheduling decisions use logical time. Wall clock time is metadata only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical time - monotonically increasing counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// Create a new logical time at zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Add ticks, saturating at `u64::MAX`
    #[must_use]
    pub const fn saturating_add(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Wall clock timestamp in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing datetime
    #[must_use]
    pub const fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Underlying datetime
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is later
    #[must_use]
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        u64::try_from((self.0 - earlier.0).num_milliseconds()).unwrap_or(0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
