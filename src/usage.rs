use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::models::UsageBucket;
use crate::store::UsageStore;

/// Number of buckets shown alongside a key in the management view.
pub const RECENT_BUCKETS: usize = 30;

/// One UTC hour on one UTC calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageWindow {
    pub date: NaiveDate,
    pub hour: u32,
}

impl UsageWindow {
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self {
            date: instant.date_naive(),
            hour: instant.hour(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(NaiveTime::MIN))
            + Duration::hours(i64::from(self.hour))
    }

    /// Start of the following hour; this is when the window's quota resets.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.start() + Duration::hours(1)
    }
}

/// Success accounting per key and hour. The admission path in `RateLimiter`
/// writes the same counters in a single statement; this type covers the
/// unconditional write and the reads.
pub struct UsageRecorder<S> {
    store: Arc<S>,
}

impl<S: UsageStore> UsageRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn record_success(
        &self,
        api_key_id: &str,
        owner_id: &str,
        window: UsageWindow,
    ) -> Result<UsageBucket, ApiError> {
        self.store.record_success(api_key_id, owner_id, window)
    }

    pub fn bucket(
        &self,
        api_key_id: &str,
        window: UsageWindow,
    ) -> Result<Option<UsageBucket>, ApiError> {
        self.store.get_bucket(api_key_id, window)
    }

    pub fn recent(&self, api_key_id: &str, limit: usize) -> Result<Vec<UsageBucket>, ApiError> {
        self.store.recent_buckets(api_key_id, limit)
    }
}
