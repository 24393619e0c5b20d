use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::KeyStatus;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid API key format")]
    MalformedKey,

    #[error("API key not found")]
    KeyNotFound,

    #[error("API key is not active")]
    KeyInactive(KeyStatus),

    #[error("API key has expired")]
    KeyExpired,

    #[error("Invalid API key")]
    InvalidSecret,

    #[error("Rate limit exceeded")]
    RateLimited { limit: u32, reset_at: DateTime<Utc> },

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Only a store outage may be retried; every other failure is a logical
    /// rejection and retrying cannot change the answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::StoreUnavailable(_))
    }

    /// Failures that surface to clients as "unauthorized".
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            ApiError::MalformedKey
                | ApiError::KeyNotFound
                | ApiError::KeyInactive(_)
                | ApiError::KeyExpired
                | ApiError::InvalidSecret
        )
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict(msg.unwrap_or_else(|| e.to_string()))
            }
            other => ApiError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        ApiError::Internal(format!("hashing failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_outage_is_retryable() {
        assert!(ApiError::StoreUnavailable("down".into()).is_retryable());
        assert!(!ApiError::InvalidSecret.is_retryable());
        assert!(!ApiError::RateLimited {
            limit: 1,
            reset_at: Utc::now()
        }
        .is_retryable());
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: api_keys.prefix".into()),
        );
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));

        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(ApiError::from(err), ApiError::StoreUnavailable(_)));
    }
}
