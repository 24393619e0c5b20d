// API key verification, quota enforcement and usage accounting
// Main library module

pub mod clock;
pub mod config;
pub mod database;
pub mod errors;
pub mod management;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod store;
pub mod usage;
pub mod verification;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use database::Database;
pub use errors::ApiError;
pub use management::{IssuedKey, KeyDetails, KeyManager};
pub use models::{ApiKey, IssueKeyRequest, KeyStatus, LifecycleEvent, UsageBucket};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use security::{GeneratedKey, KeyCodec};
pub use store::{Admission, KeyStore, UsageStore};
pub use usage::{UsageRecorder, UsageWindow};
pub use verification::{VerificationService, Verified};
