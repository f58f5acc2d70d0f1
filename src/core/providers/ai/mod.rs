pub mod anthropic;
pub mod google;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::ProviderError;

/// AI vendor calls carry their own deadline, longer than the general
/// provider default.
pub const AI_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Vendor-neutral completion request. Each client translates this into its
/// wire dialect.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Usage always normalised to prompt/completion/total, whatever the vendor
/// calls them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

#[async_trait]
pub trait AiVendor: Send + Sync {
    fn vendor_id(&self) -> &'static str;

    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError>;
}

pub(super) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(AI_CALL_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}
