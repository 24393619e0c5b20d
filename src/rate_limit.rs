use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::ApiError;
use crate::models::ApiKey;
use crate::store::UsageStore;
use crate::usage::UsageWindow;

/// Admitted request, as seen from the key's current hourly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    /// `request_count` of the bucket including this request.
    pub count: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Fixed one-hour windows per key, counted in the usage store.
pub struct RateLimiter<S> {
    store: Arc<S>,
}

impl<S: UsageStore> RateLimiter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Consumes one slot of the key's current window, or fails with
    /// `RateLimited` without consuming anything. The admitted request is
    /// counted as a success in the same store operation.
    pub fn admit(&self, key: &ApiKey, now: DateTime<Utc>) -> Result<RateLimitDecision, ApiError> {
        let window = UsageWindow::containing(now);
        let reset_at = window.reset_at();

        if key.rate_limit == 0 {
            return Err(ApiError::RateLimited {
                limit: 0,
                reset_at,
            });
        }

        let admission =
            self.store
                .increment_if_under_limit(&key.id, &key.owner_id, window, key.rate_limit)?;

        debug!(
            "Rate limit check for key {}: admitted={}, count={}/{}",
            key.id, admission.admitted, admission.count, key.rate_limit
        );

        if !admission.admitted {
            return Err(ApiError::RateLimited {
                limit: key.rate_limit,
                reset_at,
            });
        }

        Ok(RateLimitDecision {
            limit: key.rate_limit,
            count: admission.count,
            remaining: key.rate_limit.saturating_sub(admission.count),
            reset_at,
        })
    }

    /// Slots left in the current window. Does not consume one.
    pub fn remaining_for(&self, key: &ApiKey, now: DateTime<Utc>) -> Result<u32, ApiError> {
        let used = self
            .store
            .get_bucket(&key.id, UsageWindow::containing(now))?
            .map_or(0, |bucket| bucket.request_count);

        Ok(key.rate_limit.saturating_sub(used))
    }
}
