//! Collaborator interfaces the verification core depends on.
//!
//! `Database` is the production implementation; tests can provide their own.

use chrono::{DateTime, Utc};

use crate::errors::ApiError;
use crate::models::{ApiKey, KeyStatus, UsageBucket};
use crate::usage::UsageWindow;

/// Outcome of the fused check-and-increment on a usage bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub admitted: bool,
    /// Bucket `request_count` after the operation. Unchanged on rejection.
    pub count: u32,
}

pub trait KeyStore: Send + Sync {
    fn insert_key(&self, key: &ApiKey) -> Result<(), ApiError>;

    fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, ApiError>;

    fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, ApiError>;

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, ApiError>;

    /// Moves an active key to `status`. Returns `false` when the key was
    /// already out of `active`, in which case nothing is written.
    fn set_status(&self, id: &str, status: KeyStatus) -> Result<bool, ApiError>;

    fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), ApiError>;
}

pub trait UsageStore: Send + Sync {
    /// Atomically increments `request_count` and `success_count` of the
    /// bucket only if the result stays within `limit`.
    fn increment_if_under_limit(
        &self,
        api_key_id: &str,
        owner_id: &str,
        window: UsageWindow,
        limit: u32,
    ) -> Result<Admission, ApiError>;

    /// Unconditional success upsert.
    fn record_success(
        &self,
        api_key_id: &str,
        owner_id: &str,
        window: UsageWindow,
    ) -> Result<UsageBucket, ApiError>;

    fn get_bucket(
        &self,
        api_key_id: &str,
        window: UsageWindow,
    ) -> Result<Option<UsageBucket>, ApiError>;

    /// Newest first.
    fn recent_buckets(&self, api_key_id: &str, limit: usize) -> Result<Vec<UsageBucket>, ApiError>;
}
