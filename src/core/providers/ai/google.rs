use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{ProviderError, ProviderErrorKind};

use super::{AiVendor, ChatMessage, Completion, CompletionRequest, Usage};

const PROVIDER: &str = "google";
const GENERATE_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, PartialEq, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, PartialEq, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

/// Translate neutral messages into Gemini's dialect: leading system
/// messages become `systemInstruction`, `assistant` maps to `model`, and
/// consecutive same-role entries merge because Gemini requires strictly
/// alternating turns.
fn translate_messages(messages: &[ChatMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut system_instruction: Option<GeminiContent> = None;
    let mut past_first_non_system = false;

    for m in messages {
        if m.role == "system" {
            if !past_first_non_system {
                if let Some(si) = &mut system_instruction {
                    if let Some(part) = si.parts.first_mut() {
                        part.text.push('\n');
                        part.text.push_str(&m.content);
                    }
                } else {
                    system_instruction = Some(GeminiContent {
                        role: "user".to_string(),
                        parts: vec![GeminiPart {
                            text: m.content.clone(),
                        }],
                    });
                }
            } else {
                // Mid-conversation system message: fold into the user turn.
                let prefixed = format!("[SYSTEM] {}", m.content);
                let should_merge = contents
                    .last()
                    .map(|c| c.role == "user")
                    .unwrap_or(false);
                if should_merge {
                    if let Some(last) = contents.last_mut()
                        && let Some(part) = last.parts.first_mut()
                    {
                        part.text.push('\n');
                        part.text.push_str(&prefixed);
                    }
                } else {
                    contents.push(GeminiContent {
                        role: "user".to_string(),
                        parts: vec![GeminiPart { text: prefixed }],
                    });
                }
            }
        } else {
            past_first_non_system = true;
            let gemini_role = if m.role == "assistant" { "model" } else { "user" };

            let should_merge = contents
                .last()
                .map(|c| c.role == gemini_role)
                .unwrap_or(false);
            if should_merge {
                if let Some(last) = contents.last_mut()
                    && let Some(part) = last.parts.first_mut()
                {
                    part.text.push('\n');
                    part.text.push_str(&m.content);
                }
            } else {
                contents.push(GeminiContent {
                    role: gemini_role.to_string(),
                    parts: vec![GeminiPart {
                        text: m.content.clone(),
                    }],
                });
            }
        }
    }

    (system_instruction, contents)
}

fn normalize_usage(usage: Option<GeminiUsage>) -> Usage {
    match usage {
        Some(u) => Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        },
        None => Usage::default(),
    }
}

pub struct GoogleClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GoogleClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: GENERATE_URL_BASE.to_string(),
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
impl AiVendor for GoogleClient {
    fn vendor_id(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let (system_instruction, contents) = translate_messages(&request.messages);
        let generation_config = if request.max_tokens.is_some() || request.temperature.is_some() {
            Some(GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            })
        } else {
            None
        };
        let req = GeminiRequest {
            system_instruction,
            contents,
            generation_config,
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let res = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }

        let parsed: GeminiResponse = res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::UpstreamInvalid,
                    "generateContent response contained no candidates",
                )
            })?;

        Ok(Completion {
            content,
            model: parsed.model_version.unwrap_or_else(|| model.to_string()),
            usage: normalize_usage(parsed.usage_metadata),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    #[test]
    fn leading_system_messages_become_system_instruction() {
        let (si, contents) = translate_messages(&[
            msg("system", "you are a site editor"),
            msg("system", "be terse"),
            msg("user", "hello"),
        ]);
        let si = si.unwrap();
        assert_eq!(si.parts[0].text, "you are a site editor\nbe terse");
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let (_, contents) = translate_messages(&[
            msg("user", "q"),
            msg("assistant", "a"),
            msg("user", "q2"),
        ]);
        let roles: Vec<&str> = contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn consecutive_same_role_turns_merge() {
        let (_, contents) = translate_messages(&[msg("user", "one"), msg("user", "two")]);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts[0].text, "one\ntwo");
    }

    #[test]
    fn mid_conversation_system_folds_into_user_turn() {
        let (_, contents) = translate_messages(&[
            msg("user", "q"),
            msg("system", "note"),
        ]);
        assert_eq!(contents.len(), 1);
        assert!(contents[0].parts[0].text.contains("[SYSTEM] note"));
    }

    #[tokio::test]
    async fn complete_posts_generate_content_with_query_key() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/gemini-2.0-flash:generateContent")
                    .query_param("key", "g-test");
                then.status(200).json_body(serde_json::json!({
                    "candidates": [{ "content": { "parts": [{ "text": "bonjour" }] } }],
                    "usageMetadata": {
                        "promptTokenCount": 5,
                        "candidatesTokenCount": 2,
                        "totalTokenCount": 7,
                    },
                }));
            })
            .await;

        let client = GoogleClient::with_base_url("g-test".into(), server.base_url());
        let completion = client
            .complete(
                "gemini-2.0-flash",
                &CompletionRequest {
                    messages: vec![ChatMessage::new("user", "hello")],
                    max_tokens: Some(128),
                    temperature: Some(0.3),
                },
            )
            .await
            .unwrap();
        assert_eq!(completion.content, "bonjour");
        assert_eq!(completion.usage.prompt_tokens, 5);
        assert_eq!(completion.usage.total_tokens, 7);
        mock.assert_async().await;
    }

    #[test]
    fn usage_comes_from_usage_metadata() {
        let usage = normalize_usage(Some(GeminiUsage {
            prompt_token_count: 10,
            candidates_token_count: 5,
            total_token_count: 15,
        }));
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
