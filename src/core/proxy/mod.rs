pub mod keys;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::AppError;
use crate::core::providers::ai::{AiVendor, ChatMessage, Completion, CompletionRequest};
use crate::core::retry::{RetryPolicy, with_retries};
use crate::core::store::{
    ProxySite, RequestLogEntry, SiteStatus, Store, SubscriptionTier, UsageSnapshot,
};

const ENDPOINT_CHAT: &str = "/v1/chat/completions";

/// OpenAI-compatible request body accepted on the public endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    OpenAi,
    Google,
    Anthropic,
}

impl Vendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Google => "google",
            Vendor::Anthropic => "anthropic",
        }
    }
}

/// Model→vendor routing is purely prefix-based.
pub fn route_model(model: &str) -> Option<Vendor> {
    if model.starts_with("gpt-") {
        Some(Vendor::OpenAi)
    } else if model.starts_with("gemini-") {
        Some(Vendor::Google)
    } else if model.starts_with("claude-") {
        Some(Vendor::Anthropic)
    } else {
        None
    }
}

fn completion_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect();
    format!("chatcmpl-{suffix}")
}

/// OpenAI-style response envelope; the proxy buffers the full completion,
/// it does not stream.
pub fn completion_envelope(model: &str, completion: &Completion) -> serde_json::Value {
    serde_json::json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": completion.content },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": completion.usage.prompt_tokens,
            "completion_tokens": completion.usage.completion_tokens,
            "total_tokens": completion.usage.total_tokens,
        },
    })
}

/// Multi-tenant quota-enforcing gateway over the three AI vendors.
pub struct ProxyService {
    store: Arc<dyn Store>,
    openai: Option<Arc<dyn AiVendor>>,
    google: Option<Arc<dyn AiVendor>>,
    anthropic: Option<Arc<dyn AiVendor>>,
}

impl ProxyService {
    pub fn new(
        store: Arc<dyn Store>,
        openai: Option<Arc<dyn AiVendor>>,
        google: Option<Arc<dyn AiVendor>>,
        anthropic: Option<Arc<dyn AiVendor>>,
    ) -> Self {
        Self {
            store,
            openai,
            google,
            anthropic,
        }
    }

    fn vendor_client(&self, vendor: Vendor) -> Result<Arc<dyn AiVendor>, AppError> {
        let (client, env) = match vendor {
            Vendor::OpenAi => (&self.openai, "OPENAI_API_KEY"),
            Vendor::Google => (&self.google, "GEMINI_API_KEY"),
            Vendor::Anthropic => (&self.anthropic, "ANTHROPIC_API_KEY"),
        };
        client
            .clone()
            .ok_or_else(|| AppError::Configuration(env.to_string()))
    }

    /// Resolve the tenant behind a bearer token. Missing, malformed, or
    /// revoked credentials are indistinguishable to the caller.
    pub async fn authenticate(&self, bearer: Option<&str>) -> Result<ProxySite, AppError> {
        let key = bearer
            .and_then(keys::bearer_key)
            .ok_or_else(|| AppError::Auth("missing or invalid API key".into()))?;

        let site = self
            .store
            .find_site_by_api_key(key)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::Auth("missing or invalid API key".into()))?;

        if site.status != SiteStatus::Active {
            return Err(AppError::Auth("API key has been revoked".into()));
        }
        Ok(site)
    }

    async fn check_quota(&self, site: &ProxySite) -> Result<i64, AppError> {
        let used = self
            .store
            .monthly_token_usage(site.id)
            .await
            .map_err(AppError::from)?;
        if used >= site.monthly_token_limit {
            return Err(AppError::QuotaExceeded {
                used,
                limit: site.monthly_token_limit,
            });
        }
        Ok(used)
    }

    async fn allowed_models(&self, site: &ProxySite) -> Result<Vec<String>, AppError> {
        let tier = self
            .store
            .get_tier(&site.subscription_tier)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "subscription tier {:?} not found",
                    site.subscription_tier
                ))
            })?;
        Ok(tier.allowed_models)
    }

    /// Fire-and-forget: a logging failure must never affect the response.
    fn log_request(&self, entry: RequestLogEntry) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_request_log(&entry).await {
                warn!("proxy request log insert failed: {e}");
            }
        });
    }

    pub async fn chat(
        &self,
        bearer: Option<&str>,
        request: ChatCompletionRequest,
    ) -> Result<serde_json::Value, AppError> {
        let site = self.authenticate(bearer).await?;

        // Best-effort gate: checked before dispatch, concurrent overages
        // within one window are acceptable.
        self.check_quota(&site).await?;

        let allowed = self.allowed_models(&site).await?;
        if !allowed.iter().any(|m| m == &request.model) {
            self.log_request(RequestLogEntry {
                site_id: site.id,
                domain: site.domain.clone(),
                provider: route_model(&request.model)
                    .map(|v| v.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                model: request.model.clone(),
                endpoint: ENDPOINT_CHAT.to_string(),
                method: "POST".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                response_status: 403,
                latency_ms: 0,
                error_message: Some("model not allowed for tier".to_string()),
            });
            return Err(AppError::ModelNotAllowed(request.model));
        }

        let vendor = route_model(&request.model).ok_or_else(|| {
            AppError::Validation(format!("unroutable model {:?}", request.model))
        })?;
        let client = self.vendor_client(vendor)?;

        let completion_request = CompletionRequest {
            messages: request.messages.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let started = Instant::now();
        let outcome = with_retries(RetryPolicy::proxy(), || {
            client.complete(&request.model, &completion_request)
        })
        .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(completion) => {
                info!(
                    domain = %site.domain,
                    model = %request.model,
                    tokens = completion.usage.total_tokens,
                    latency_ms,
                    "proxy completion served"
                );
                self.log_request(RequestLogEntry {
                    site_id: site.id,
                    domain: site.domain.clone(),
                    provider: vendor.as_str().to_string(),
                    model: request.model.clone(),
                    endpoint: ENDPOINT_CHAT.to_string(),
                    method: "POST".to_string(),
                    prompt_tokens: completion.usage.prompt_tokens as i64,
                    completion_tokens: completion.usage.completion_tokens as i64,
                    total_tokens: completion.usage.total_tokens as i64,
                    response_status: 200,
                    latency_ms,
                    error_message: None,
                });
                Ok(completion_envelope(&request.model, &completion))
            }
            Err(e) => {
                self.log_request(RequestLogEntry {
                    site_id: site.id,
                    domain: site.domain.clone(),
                    provider: vendor.as_str().to_string(),
                    model: request.model.clone(),
                    endpoint: ENDPOINT_CHAT.to_string(),
                    method: "POST".to_string(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                    response_status: e.http_status.map(i32::from).unwrap_or(502),
                    latency_ms,
                    error_message: Some(e.vendor_message.clone()),
                });
                Err(AppError::Upstream(e))
            }
        }
    }

    /// Models visible to the authenticated tenant, OpenAI list envelope.
    pub async fn models(&self, bearer: Option<&str>) -> Result<serde_json::Value, AppError> {
        let site = self.authenticate(bearer).await?;
        let allowed = self.allowed_models(&site).await?;
        let data: Vec<serde_json::Value> = allowed
            .iter()
            .map(|model| {
                serde_json::json!({
                    "id": model,
                    "object": "model",
                    "owned_by": route_model(model)
                        .map(|v| v.as_str())
                        .unwrap_or("unknown"),
                })
            })
            .collect();
        Ok(serde_json::json!({ "object": "list", "data": data }))
    }

    pub async fn usage(&self, bearer: Option<&str>) -> Result<serde_json::Value, AppError> {
        let site = self.authenticate(bearer).await?;
        let used = self
            .store
            .monthly_token_usage(site.id)
            .await
            .map_err(AppError::from)?;
        let snapshot = UsageSnapshot::new(used, site.monthly_token_limit);
        Ok(serde_json::json!({
            "domain": site.domain,
            "tier": site.subscription_tier,
            "usage": snapshot,
        }))
    }

    // ── admin surface ──

    /// Register a tenant; returns the site and the raw key. The key is not
    /// retrievable afterwards.
    pub async fn register_site(
        &self,
        domain: &str,
        label: Option<&str>,
        tier: &str,
    ) -> Result<(ProxySite, String), AppError> {
        if domain.trim().is_empty() {
            return Err(AppError::Validation("domain is required".into()));
        }
        let tier_row = self
            .store
            .get_tier(tier)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("subscription tier {tier:?} not found")))?;

        let api_key = keys::generate_api_key();
        let site = self
            .store
            .create_proxy_site(domain, &api_key, label, &tier_row.tier, tier_row.monthly_token_limit)
            .await
            .map_err(AppError::from)?;
        info!(domain, tier = %tier_row.tier, "proxy site registered");
        Ok((site, api_key))
    }

    pub async fn list_sites(&self) -> Result<Vec<ProxySite>, AppError> {
        self.store.list_sites().await.map_err(AppError::from)
    }

    pub async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>, AppError> {
        self.store.list_tiers().await.map_err(AppError::from)
    }

    pub async fn site_usage(&self, site_id: Uuid) -> Result<serde_json::Value, AppError> {
        let site = self
            .store
            .get_site(site_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound("site not found".into()))?;
        let used = self
            .store
            .monthly_token_usage(site_id)
            .await
            .map_err(AppError::from)?;
        Ok(serde_json::json!({
            "domain": site.domain,
            "usage": UsageSnapshot::new(used, site.monthly_token_limit),
        }))
    }

    pub async fn site_requests(
        &self,
        site_id: Uuid,
        limit: i64,
    ) -> Result<Vec<crate::core::store::RequestLogRow>, AppError> {
        self.store
            .list_request_logs(site_id, limit)
            .await
            .map_err(AppError::from)
    }

    /// Rotate a tenant's key; the new raw value is returned exactly once.
    pub async fn rotate_key(&self, site_id: Uuid) -> Result<(ProxySite, String), AppError> {
        let api_key = keys::generate_api_key();
        let site = self
            .store
            .rotate_site_key(site_id, &api_key)
            .await
            .map_err(AppError::from)?;
        info!(domain = %site.domain, "proxy site key rotated");
        Ok((site, api_key))
    }

    pub async fn update_tier(&self, site_id: Uuid, tier: &str) -> Result<ProxySite, AppError> {
        self.store
            .update_site_tier(site_id, tier)
            .await
            .map_err(AppError::from)
    }

    pub async fn update_status(
        &self,
        site_id: Uuid,
        status: SiteStatus,
    ) -> Result<ProxySite, AppError> {
        self.store
            .update_site_status(site_id, status)
            .await
            .map_err(AppError::from)
    }
}
