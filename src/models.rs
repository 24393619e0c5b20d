use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an issued key. Anything other than `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
    Expired,
}

/// The only two things that can move a key out of `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Observed during verification when `expires_at` has passed.
    Expire,
    /// Issued by the key owner through the management flow.
    Revoke,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Revoked => "revoked",
            KeyStatus::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, KeyStatus::Active)
    }

    /// Pure transition function. Non-active states absorb every event.
    pub fn apply(self, event: LifecycleEvent) -> KeyStatus {
        match (self, event) {
            (KeyStatus::Active, LifecycleEvent::Expire) => KeyStatus::Expired,
            (KeyStatus::Active, LifecycleEvent::Revoke) => KeyStatus::Revoked,
            (terminal, _) => terminal,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "revoked" => Ok(KeyStatus::Revoked),
            "expired" => Ok(KeyStatus::Expired),
            other => Err(format!("unknown key status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub digest: String,
    pub prefix: String,
    pub status: KeyStatus,
    pub rate_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    pub api_key_id: String,
    pub owner_id: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub request_count: u32,
    pub success_count: u32,
    pub error_count: u32,
}

// Request/Response models
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    pub project_id: Option<String>,
    pub rate_limit: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<KeyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_absorb_events() {
        for event in [LifecycleEvent::Expire, LifecycleEvent::Revoke] {
            assert_eq!(KeyStatus::Revoked.apply(event), KeyStatus::Revoked);
            assert_eq!(KeyStatus::Expired.apply(event), KeyStatus::Expired);
        }
        assert_eq!(
            KeyStatus::Active.apply(LifecycleEvent::Expire),
            KeyStatus::Expired
        );
        assert_eq!(
            KeyStatus::Active.apply(LifecycleEvent::Revoke),
            KeyStatus::Revoked
        );
    }

    #[test]
    fn expiry_instant_is_still_valid() {
        let expires_at = DateTime::parse_from_rfc3339("2024-03-14T10:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let key = ApiKey {
            id: "k".into(),
            name: "k".into(),
            digest: String::new(),
            prefix: "sk_test_AAAAAAAA".into(),
            status: KeyStatus::Active,
            rate_limit: 1,
            expires_at: Some(expires_at),
            last_used_at: None,
            owner_id: "o".into(),
            project_id: None,
            created_at: expires_at,
        };

        assert!(!key.is_expired_at(expires_at));
        assert!(key.is_expired_at(expires_at + chrono::Duration::nanoseconds(1)));
    }

    #[test]
    fn status_parses_its_own_text() {
        for status in [KeyStatus::Active, KeyStatus::Revoked, KeyStatus::Expired] {
            assert_eq!(status.as_str().parse::<KeyStatus>(), Ok(status));
        }
        assert!("deleted".parse::<KeyStatus>().is_err());
    }
}
