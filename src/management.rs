//! Issuance and owner-facing management of API keys.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::ApiError;
use crate::models::{ApiKey, IssueKeyRequest, KeyStatus, LifecycleEvent, UsageBucket};
use crate::rate_limit::RateLimiter;
use crate::security::KeyCodec;
use crate::store::{KeyStore, UsageStore};
use crate::usage::{UsageRecorder, RECENT_BUCKETS};

pub const DEFAULT_RATE_LIMIT: u32 = 1000;

/// Generation attempts before a prefix collision is reported as a conflict.
const ISSUE_ATTEMPTS: usize = 3;

/// A key as its owner sees it: record, quota left this hour, recent usage.
#[derive(Debug)]
pub struct KeyDetails {
    pub key: ApiKey,
    pub remaining: u32,
    pub usage: Vec<UsageBucket>,
}

/// A freshly issued key. `plaintext` exists only in this value.
#[derive(Debug)]
pub struct IssuedKey {
    pub key: ApiKey,
    pub plaintext: String,
}

pub struct KeyManager<S> {
    store: Arc<S>,
    codec: KeyCodec,
    usage: UsageRecorder<S>,
    rate_limiter: RateLimiter<S>,
    clock: Arc<dyn Clock>,
    default_rate_limit: u32,
}

impl<S: KeyStore + UsageStore> KeyManager<S> {
    pub fn new(store: Arc<S>, codec: KeyCodec) -> Self {
        Self {
            usage: UsageRecorder::new(Arc::clone(&store)),
            rate_limiter: RateLimiter::new(Arc::clone(&store)),
            store,
            codec,
            clock: Arc::new(SystemClock),
            default_rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_rate_limit(mut self, rate_limit: u32) -> Self {
        self.default_rate_limit = rate_limit;
        self
    }

    pub fn issue(&self, request: IssueKeyRequest) -> Result<IssuedKey, ApiError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidRequest("Name is required".to_string()));
        }
        if request.owner_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("Owner is required".to_string()));
        }

        let rate_limit = request.rate_limit.unwrap_or(self.default_rate_limit);
        if rate_limit == 0 {
            return Err(ApiError::InvalidRequest(
                "Rate limit must be a positive number".to_string(),
            ));
        }

        let now = self.clock.now();
        if request.expires_at.map_or(false, |expires_at| expires_at <= now) {
            return Err(ApiError::InvalidRequest(
                "Expiry must be in the future".to_string(),
            ));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let generated = self.codec.generate()?;
            let key = ApiKey {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                digest: generated.digest,
                prefix: generated.prefix,
                status: KeyStatus::Active,
                rate_limit,
                expires_at: request.expires_at,
                last_used_at: None,
                owner_id: request.owner_id.clone(),
                project_id: request.project_id.clone(),
                created_at: now,
            };

            match self.store.insert_key(&key) {
                Ok(()) => {
                    info!(
                        "API key issued: id={}, owner={}, key={}",
                        key.id,
                        key.owner_id,
                        KeyCodec::mask(&generated.plaintext)
                    );
                    return Ok(IssuedKey {
                        key,
                        plaintext: generated.plaintext,
                    });
                }
                Err(ApiError::Conflict(reason)) if attempt < ISSUE_ATTEMPTS => {
                    warn!("Regenerating API key after conflict: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetches a key the caller owns. Keys of other owners look absent.
    fn owned(&self, owner_id: &str, key_id: &str) -> Result<ApiKey, ApiError> {
        self.store
            .find_by_id(key_id)?
            .filter(|key| key.owner_id == owner_id)
            .ok_or(ApiError::KeyNotFound)
    }

    pub fn revoke(&self, owner_id: &str, key_id: &str) -> Result<ApiKey, ApiError> {
        let mut key = self.owned(owner_id, key_id)?;

        let next = key.status.apply(LifecycleEvent::Revoke);
        if next != key.status && self.store.set_status(&key.id, next)? {
            info!("API key revoked: id={}", key.id);
        }

        // Re-read so a concurrent expiry is reported as it was persisted.
        key = self.owned(owner_id, key_id)?;
        Ok(key)
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, ApiError> {
        self.store.list_by_owner(owner_id)
    }

    pub fn get_for_owner(&self, owner_id: &str, key_id: &str) -> Result<KeyDetails, ApiError> {
        let key = self.owned(owner_id, key_id)?;
        let remaining = self.rate_limiter.remaining_for(&key, self.clock.now())?;
        let usage = self.usage.recent(&key.id, RECENT_BUCKETS)?;
        Ok(KeyDetails {
            key,
            remaining,
            usage,
        })
    }
}
