use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{ProviderError, ProviderErrorKind};

use super::{AiVendor, ChatMessage, Completion, CompletionRequest, Usage};

const PROVIDER: &str = "anthropic";
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on the Messages API.
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    model: Option<String>,
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Hoist system messages into the top-level `system` field; everything else
/// passes through in order.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system_text: Option<String> = None;
    let mut rest = Vec::new();

    for m in messages {
        if m.role == "system" {
            match &mut system_text {
                Some(s) => {
                    s.push('\n');
                    s.push_str(&m.content);
                }
                None => system_text = Some(m.content.clone()),
            }
        } else {
            rest.push(m);
        }
    }

    (system_text, rest)
}

fn normalize_usage(usage: Option<AnthropicUsage>) -> Usage {
    match usage {
        Some(u) => Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        },
        None => Usage::default(),
    }
}

pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: MESSAGES_URL.to_string(),
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
impl AiVendor for AnthropicClient {
    fn vendor_id(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let (system, messages) = split_system(&request.messages);
        let req = AnthropicRequest {
            model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
        };

        let res = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }

        let parsed: AnthropicResponse = res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })?;

        let content: String = parsed
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

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
    fn system_messages_hoist_into_top_level_field() {
        let messages = vec![
            ChatMessage::new("system", "first"),
            ChatMessage::new("user", "hello"),
            ChatMessage::new("system", "second"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("first\nsecond"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn no_system_messages_leaves_field_absent() {
        let messages = vec![ChatMessage::new("user", "hello")];
        let (system, rest) = split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn usage_totals_input_plus_output() {
        let usage = normalize_usage(Some(AnthropicUsage {
            input_tokens: 7,
            output_tokens: 13,
        }));
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.completion_tokens, 13);
        assert_eq!(usage.total_tokens, 20);
    }

    #[tokio::test]
    async fn complete_sends_api_key_header_and_joins_text_blocks() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/")
                    .header("x-api-key", "a-test")
                    .header("anthropic-version", API_VERSION);
                then.status(200).json_body(serde_json::json!({
                    "model": "claude-haiku-4-5",
                    "content": [{ "text": "Hola " }, { "text": "mundo" }],
                    "usage": { "input_tokens": 8, "output_tokens": 4 },
                }));
            })
            .await;

        let client = AnthropicClient::with_base_url("a-test".into(), server.url("/"));
        let completion = client
            .complete(
                "claude-haiku-4-5",
                &CompletionRequest {
                    messages: vec![
                        ChatMessage::new("system", "be brief"),
                        ChatMessage::new("user", "hello"),
                    ],
                    max_tokens: None,
                    temperature: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(completion.content, "Hola mundo");
        assert_eq!(completion.usage.total_tokens, 12);
        mock.assert_async().await;
    }

    #[test]
    fn max_tokens_defaults_when_unset() {
        let req = CompletionRequest {
            messages: vec![ChatMessage::new("user", "x")],
            max_tokens: None,
            temperature: None,
        };
        assert_eq!(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS), 1024);
    }
}
