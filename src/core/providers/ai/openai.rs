use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{ProviderError, ProviderErrorKind};

use super::{AiVendor, ChatMessage, Completion, CompletionRequest, Usage};

const PROVIDER: &str = "openai";
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn normalize_usage(usage: Option<OpenAiUsage>) -> Usage {
    match usage {
        Some(u) => Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        },
        None => Usage::default(),
    }
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: CHAT_COMPLETIONS_URL.to_string(),
            client: super::http_client(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: super::http_client(),
        }
    }
}

#[async_trait]
impl AiVendor for OpenAiClient {
    fn vendor_id(&self) -> &'static str {
        PROVIDER
    }

    /// OpenAI speaks our neutral dialect natively: messages pass through
    /// verbatim.
    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let req = OpenAiRequest {
            model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let res = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }

        let parsed: OpenAiResponse = res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::UpstreamInvalid,
                    "completion response contained no choices",
                )
            })?;

        Ok(Completion {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            usage: normalize_usage(parsed.usage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_normalises_to_prompt_completion_total() {
        let usage = normalize_usage(Some(OpenAiUsage {
            prompt_tokens: 12,
            completion_tokens: 30,
            total_tokens: 42,
        }));
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn absent_usage_normalises_to_zero() {
        let usage = normalize_usage(None);
        assert_eq!(usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn complete_sends_bearer_auth_and_normalises_usage() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(serde_json::json!({
                    "model": "gpt-4o-mini",
                    "choices": [{ "message": { "content": "hi there" } }],
                    "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 },
                }));
            })
            .await;

        let client = OpenAiClient::with_base_url("sk-test".into(), server.url("/"));
        let completion = client
            .complete(
                "gpt-4o-mini",
                &CompletionRequest {
                    messages: vec![ChatMessage::new("user", "hello")],
                    max_tokens: None,
                    temperature: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(completion.content, "hi there");
        assert_eq!(completion.usage.total_tokens, 12);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upstream_500_maps_to_retryable_failure() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/");
                then.status(500).body("boom");
            })
            .await;

        let client = OpenAiClient::with_base_url("sk-test".into(), server.url("/"));
        let err = client
            .complete(
                "gpt-4o-mini",
                &CompletionRequest {
                    messages: vec![ChatMessage::new("user", "hello")],
                    max_tokens: None,
                    temperature: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::UpstreamFailure);
        assert!(err.retryable());
    }

    #[test]
    fn request_serialization_omits_unset_tuning_fields() {
        let messages = vec![ChatMessage::new("user", "hi")];
        let req = OpenAiRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: None,
            temperature: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
