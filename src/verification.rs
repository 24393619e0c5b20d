//! Request-time verification of presented API keys.
//!
//! The steps run in a fixed order and stop at the first failure:
//! parse, lookup, lifecycle, expiry, secret, admission, commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::ApiError;
use crate::models::{ApiKey, KeyStatus, LifecycleEvent, RateLimitInfo, VerifyResponse};
use crate::rate_limit::RateLimiter;
use crate::security::KeyCodec;
use crate::store::{KeyStore, UsageStore};

/// Successful verification: who the caller is and where they stand against
/// their hourly quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub key_id: String,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl From<Verified> for VerifyResponse {
    fn from(verified: Verified) -> Self {
        VerifyResponse {
            valid: true,
            key_id: Some(verified.key_id),
            user_id: Some(verified.owner_id),
            project_id: verified.project_id,
            error: None,
            status: None,
            rate_limit: Some(RateLimitInfo {
                limit: verified.limit,
                remaining: verified.remaining,
                reset: verified.reset_at,
            }),
        }
    }
}

pub struct VerificationService<S> {
    store: Arc<S>,
    codec: KeyCodec,
    rate_limiter: RateLimiter<S>,
    clock: Arc<dyn Clock>,
}

impl<S: KeyStore + UsageStore> VerificationService<S> {
    pub fn new(store: Arc<S>, codec: KeyCodec) -> Self {
        Self {
            rate_limiter: RateLimiter::new(Arc::clone(&store)),
            store,
            codec,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn verify(&self, presented: &str) -> Result<Verified, ApiError> {
        let now = self.clock.now();

        let prefix = KeyCodec::extract_prefix(presented)?;
        debug!("Verifying API key with prefix: {}", prefix);

        let key = self
            .store
            .find_by_prefix(&prefix)?
            .ok_or(ApiError::KeyNotFound)?;

        self.check_lifecycle(&key, now)?;

        if !self.codec.verify(presented, &key.digest) {
            warn!("Secret mismatch for API key {}", key.id);
            return Err(ApiError::InvalidSecret);
        }

        let decision = self.rate_limiter.admit(&key, now)?;

        // The bucket write above is what makes the request count; the
        // timestamp is informational and must not fail an admitted request.
        if let Err(e) = self.store.touch_last_used(&key.id, now) {
            warn!("Failed to update last_used_at for API key {}: {}", key.id, e);
        }

        Ok(Verified {
            key_id: key.id,
            owner_id: key.owner_id,
            project_id: key.project_id,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        })
    }

    fn check_lifecycle(&self, key: &ApiKey, now: DateTime<Utc>) -> Result<(), ApiError> {
        match key.status {
            KeyStatus::Active => {}
            KeyStatus::Expired => return Err(ApiError::KeyExpired),
            other => return Err(ApiError::KeyInactive(other)),
        }

        if key.is_expired_at(now) {
            let next = key.status.apply(LifecycleEvent::Expire);
            if self.store.set_status(&key.id, next)? {
                info!("API key {} expired at {:?}", key.id, key.expires_at);
            }
            return Err(ApiError::KeyExpired);
        }

        Ok(())
    }
}
