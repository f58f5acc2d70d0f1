#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use webtosite::core::error::ProviderError;
use webtosite::core::providers::ai::{AiVendor, Completion, CompletionRequest, Usage};
use webtosite::core::store::{
    EditMessage, EditSession, MessageRole, ProxySite, RequestLogEntry, RequestLogRow, SiteStatus,
    Store, StoreError, SubscriptionTier,
};

/// Scripted AI vendor: returns canned replies in order and records every
/// request it saw.
pub struct ScriptedVendor {
    replies: Vec<Completion>,
    cursor: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub calls: AtomicUsize,
}

impl ScriptedVendor {
    pub fn new(replies: Vec<Completion>) -> Self {
        Self {
            replies,
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn single(content: &str, usage: Usage) -> Self {
        Self::new(vec![Completion {
            content: content.to_string(),
            model: "stub-model".to_string(),
            usage,
        }])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiVendor for ScriptedVendor {
    fn vendor_id(&self) -> &'static str {
        "scripted"
    }

    async fn complete(
        &self,
        _model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .get(idx.min(self.replies.len().saturating_sub(1)))
            .cloned()
            .expect("scripted vendor has at least one reply");
        Ok(reply)
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    sites: HashMap<Uuid, ProxySite>,
    tiers: HashMap<String, SubscriptionTier>,
    logs: Vec<RequestLogRow>,
    next_log_id: i64,
    sessions: HashMap<Uuid, EditSession>,
    messages: Vec<EditMessage>,
}

/// In-memory Store stand-in for service tests; the Postgres implementation
/// is exercised against a live database in deployment.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_tier(&self, tier: &str, limit: i64, allowed_models: &[&str]) {
        let mut inner = self.inner.lock().await;
        inner.tiers.insert(
            tier.to_string(),
            SubscriptionTier {
                tier: tier.to_string(),
                display_name: tier.to_string(),
                monthly_token_limit: limit,
                allowed_models: allowed_models.iter().map(|m| m.to_string()).collect(),
                rate_limit_rpm: 10,
            },
        );
    }

    pub async fn seed_site(&self, domain: &str, api_key: &str, tier: &str, limit: i64) -> ProxySite {
        let site = ProxySite {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
            label: None,
            status: SiteStatus::Active,
            subscription_tier: tier.to_string(),
            monthly_token_limit: limit,
            created_at: Utc::now(),
            revoked_at: None,
        };
        self.inner
            .lock()
            .await
            .sites
            .insert(site.id, site.clone());
        site
    }

    /// Seed a usage row dated inside the current month.
    pub async fn seed_usage(&self, site_id: Uuid, domain: &str, total_tokens: i64) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_log_id;
        inner.next_log_id += 1;
        inner.logs.push(RequestLogRow {
            id,
            site_id,
            domain: domain.to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "/v1/chat/completions".to_string(),
            method: "POST".to_string(),
            prompt_tokens: total_tokens / 2,
            completion_tokens: total_tokens - total_tokens / 2,
            total_tokens,
            response_status: 200,
            latency_ms: 12,
            error_message: None,
            requested_at: Utc::now(),
        });
    }

    pub async fn log_count(&self) -> usize {
        self.inner.lock().await.logs.len()
    }

    pub async fn last_log(&self) -> Option<RequestLogRow> {
        self.inner.lock().await.logs.last().cloned()
    }

    pub async fn messages_for(&self, session_id: Uuid) -> Vec<EditMessage> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_proxy_site(
        &self,
        domain: &str,
        api_key: &str,
        label: Option<&str>,
        tier: &str,
        monthly_token_limit: i64,
    ) -> Result<ProxySite, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .sites
            .values()
            .any(|s| s.domain == domain || s.api_key == api_key)
        {
            return Err(StoreError::Duplicate(format!(
                "duplicate key for domain {domain}"
            )));
        }
        let site = ProxySite {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
            label: label.map(str::to_string),
            status: SiteStatus::Active,
            subscription_tier: tier.to_string(),
            monthly_token_limit,
            created_at: Utc::now(),
            revoked_at: None,
        };
        inner.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn find_site_by_api_key(&self, api_key: &str) -> Result<Option<ProxySite>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .sites
            .values()
            .find(|s| s.api_key == api_key)
            .cloned())
    }

    async fn get_site(&self, site_id: Uuid) -> Result<Option<ProxySite>, StoreError> {
        Ok(self.inner.lock().await.sites.get(&site_id).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<ProxySite>, StoreError> {
        Ok(self.inner.lock().await.sites.values().cloned().collect())
    }

    async fn update_site_tier(&self, site_id: Uuid, tier: &str) -> Result<ProxySite, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(tier_row) = inner.tiers.get(tier).cloned() else {
            return Err(StoreError::NotFound("subscription tier"));
        };
        let site = inner
            .sites
            .get_mut(&site_id)
            .ok_or(StoreError::NotFound("site"))?;
        site.subscription_tier = tier_row.tier.clone();
        site.monthly_token_limit = tier_row.monthly_token_limit;
        Ok(site.clone())
    }

    async fn update_site_status(
        &self,
        site_id: Uuid,
        status: SiteStatus,
    ) -> Result<ProxySite, StoreError> {
        let mut inner = self.inner.lock().await;
        let site = inner
            .sites
            .get_mut(&site_id)
            .ok_or(StoreError::NotFound("site"))?;
        site.status = status;
        site.revoked_at = matches!(status, SiteStatus::Revoked).then(Utc::now);
        Ok(site.clone())
    }

    async fn rotate_site_key(
        &self,
        site_id: Uuid,
        api_key: &str,
    ) -> Result<ProxySite, StoreError> {
        let mut inner = self.inner.lock().await;
        let site = inner
            .sites
            .get_mut(&site_id)
            .ok_or(StoreError::NotFound("site"))?;
        site.api_key = api_key.to_string();
        Ok(site.clone())
    }

    async fn get_tier(&self, tier: &str) -> Result<Option<SubscriptionTier>, StoreError> {
        Ok(self.inner.lock().await.tiers.get(tier).cloned())
    }

    async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>, StoreError> {
        Ok(self.inner.lock().await.tiers.values().cloned().collect())
    }

    async fn monthly_token_usage(&self, site_id: Uuid) -> Result<i64, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| {
                l.site_id == site_id
                    && l.requested_at.year() == now.year()
                    && l.requested_at.month() == now.month()
            })
            .map(|l| l.total_tokens)
            .sum())
    }

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_log_id;
        inner.next_log_id += 1;
        inner.logs.push(RequestLogRow {
            id,
            site_id: entry.site_id,
            domain: entry.domain.clone(),
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            endpoint: entry.endpoint.clone(),
            method: entry.method.clone(),
            prompt_tokens: entry.prompt_tokens,
            completion_tokens: entry.completion_tokens,
            total_tokens: entry.total_tokens,
            response_status: entry.response_status,
            latency_ms: entry.latency_ms,
            error_message: entry.error_message.clone(),
            requested_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_request_logs(
        &self,
        site_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RequestLogRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.site_id == site_id)
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn create_edit_session(
        &self,
        user_id: Uuid,
        site_id: Uuid,
        title: Option<&str>,
    ) -> Result<EditSession, StoreError> {
        let session = EditSession {
            id: Uuid::new_v4(),
            user_id,
            site_id,
            title: title.map(str::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_edit_session(&self, session_id: Uuid) -> Result<Option<EditSession>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(&session_id).cloned())
    }

    async fn add_edit_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<EditMessage, StoreError> {
        let message = EditMessage {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.to_string(),
            metadata: metadata.cloned(),
            created_at: Utc::now(),
        };
        self.inner.lock().await.messages.push(message.clone());
        Ok(message)
    }

    async fn list_edit_messages(&self, session_id: Uuid) -> Result<Vec<EditMessage>, StoreError> {
        // Insertion order doubles as created-at ascending here.
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}
