pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Duplicate(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StoreError::Duplicate(message) => AppError::Conflict(message),
            StoreError::Backend(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Revoked,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Revoked => "revoked",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SiteStatus::Active),
            "revoked" => Some(SiteStatus::Revoked),
            _ => None,
        }
    }
}

/// One proxy tenant. Exactly one active row per domain.
#[derive(Debug, Clone, Serialize)]
pub struct ProxySite {
    pub id: Uuid,
    pub domain: String,
    /// Opaque bearer credential, prefix `wts_`. Returned in full only at
    /// registration time.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub label: Option<String>,
    pub status: SiteStatus,
    pub subscription_tier: String,
    pub monthly_token_limit: i64,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionTier {
    pub tier: String,
    pub display_name: String,
    pub monthly_token_limit: i64,
    pub allowed_models: Vec<String>,
    pub rate_limit_rpm: i32,
}

/// Append-only request log insert shape.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub site_id: Uuid,
    pub domain: String,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub method: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub response_status: i32,
    pub latency_ms: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRow {
    pub id: i64,
    pub site_id: Uuid,
    pub domain: String,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub method: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub response_status: i32,
    pub latency_ms: i64,
    pub error_message: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageSnapshot {
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

impl UsageSnapshot {
    pub fn new(used: i64, limit: i64) -> Self {
        Self {
            used,
            limit,
            remaining: (limit - used).max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub site_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam for the proxy and the editor. The Postgres
/// implementation is authoritative; tests supply in-memory stand-ins.
#[async_trait]
pub trait Store: Send + Sync {
    // ── proxy sites ──
    async fn create_proxy_site(
        &self,
        domain: &str,
        api_key: &str,
        label: Option<&str>,
        tier: &str,
        monthly_token_limit: i64,
    ) -> Result<ProxySite, StoreError>;

    async fn find_site_by_api_key(&self, api_key: &str) -> Result<Option<ProxySite>, StoreError>;

    async fn get_site(&self, site_id: Uuid) -> Result<Option<ProxySite>, StoreError>;

    async fn list_sites(&self) -> Result<Vec<ProxySite>, StoreError>;

    /// Serialised per site row; unknown tier names are an error, never a
    /// panic.
    async fn update_site_tier(&self, site_id: Uuid, tier: &str) -> Result<ProxySite, StoreError>;

    async fn update_site_status(
        &self,
        site_id: Uuid,
        status: SiteStatus,
    ) -> Result<ProxySite, StoreError>;

    /// Replace the site's API key (rotation); the old key stops
    /// authenticating immediately.
    async fn rotate_site_key(&self, site_id: Uuid, api_key: &str)
    -> Result<ProxySite, StoreError>;

    // ── tiers ──
    async fn get_tier(&self, tier: &str) -> Result<Option<SubscriptionTier>, StoreError>;

    async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>, StoreError>;

    // ── request log / quota ──
    /// Total tokens consumed since the start of the current calendar month.
    async fn monthly_token_usage(&self, site_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), StoreError>;

    async fn list_request_logs(
        &self,
        site_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RequestLogRow>, StoreError>;

    // ── editor sessions ──
    async fn create_edit_session(
        &self,
        user_id: Uuid,
        site_id: Uuid,
        title: Option<&str>,
    ) -> Result<EditSession, StoreError>;

    async fn get_edit_session(&self, session_id: Uuid) -> Result<Option<EditSession>, StoreError>;

    async fn add_edit_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<EditMessage, StoreError>;

    /// Strict created-at ascending order.
    async fn list_edit_messages(&self, session_id: Uuid) -> Result<Vec<EditMessage>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_snapshot_clamps_remaining_at_zero() {
        let snapshot = UsageSnapshot::new(120, 100);
        assert_eq!(snapshot.used, 120);
        assert_eq!(snapshot.limit, 100);
        assert_eq!(snapshot.remaining, 0);

        let snapshot = UsageSnapshot::new(40, 100);
        assert_eq!(snapshot.remaining, 60);
    }

    #[test]
    fn site_status_round_trips() {
        assert_eq!(SiteStatus::from_str("active"), Some(SiteStatus::Active));
        assert_eq!(SiteStatus::from_str("revoked"), Some(SiteStatus::Revoked));
        assert_eq!(SiteStatus::from_str("paused"), None);
        assert_eq!(SiteStatus::Active.as_str(), "active");
    }

    #[test]
    fn message_role_round_trips() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::from_str("tool"), None);
    }

    #[test]
    fn api_key_is_not_serialized() {
        let site = ProxySite {
            id: Uuid::new_v4(),
            domain: "x.test".into(),
            api_key: "wts_secret".into(),
            label: None,
            status: SiteStatus::Active,
            subscription_tier: "free".into(),
            monthly_token_limit: 100_000,
            created_at: Utc::now(),
            revoked_at: None,
        };
        let json = serde_json::to_value(&site).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["domain"], "x.test");
    }
}
