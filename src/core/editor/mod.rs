pub mod actions;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, ProviderError};
use crate::core::providers::ai::{AiVendor, ChatMessage, CompletionRequest};
use crate::core::store::{EditSession, MessageRole, Store};

use actions::{ActionBlock, EditAction, NewPage, PageUpdates, SettingsUpdates, parse_actions};

/// Transcript replies are sampled warmer than the structured calls.
const CHAT_TEMPERATURE: f32 = 0.7;
const PAGE_EXCERPT_CHARS: usize = 200;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

/// Minimal page descriptor the editor works against.
#[derive(Debug, Clone, Serialize)]
pub struct SitePage {
    pub id: i64,
    pub title: String,
    pub content: String,
}

/// REST surface of one provisioned site, as the editor needs it.
#[async_trait]
pub trait SiteRest: Send + Sync {
    async fn list_pages(&self) -> Result<Vec<SitePage>, ProviderError>;

    async fn update_page(
        &self,
        page_id: i64,
        updates: &PageUpdates,
    ) -> Result<serde_json::Value, ProviderError>;

    async fn create_page(&self, page: &NewPage) -> Result<serde_json::Value, ProviderError>;

    async fn update_settings(
        &self,
        settings: &SettingsUpdates,
    ) -> Result<serde_json::Value, ProviderError>;
}

#[async_trait]
impl SiteRest for crate::core::deploy::wp::WpClient {
    async fn list_pages(&self) -> Result<Vec<SitePage>, ProviderError> {
        let pages = self.list_pages().await?;
        Ok(pages
            .into_iter()
            .map(|p| SitePage {
                id: p.id,
                title: p.title.rendered,
                content: p.content.rendered,
            })
            .collect())
    }

    async fn update_page(
        &self,
        page_id: i64,
        updates: &PageUpdates,
    ) -> Result<serde_json::Value, ProviderError> {
        let body = serde_json::to_value(updates).unwrap_or(serde_json::Value::Null);
        let page = self.update_page(page_id, &body).await?;
        Ok(serde_json::json!({ "id": page.id, "slug": page.slug }))
    }

    async fn create_page(&self, page: &NewPage) -> Result<serde_json::Value, ProviderError> {
        let created = self
            .create_page(
                &page.title,
                &page.content,
                page.slug.as_deref(),
                page.status.as_deref().unwrap_or("publish"),
            )
            .await?;
        Ok(serde_json::json!({ "id": created.id, "slug": created.slug }))
    }

    async fn update_settings(
        &self,
        settings: &SettingsUpdates,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut body = serde_json::Map::new();
        if let Some(title) = &settings.title {
            body.insert("title".into(), serde_json::json!(title));
        }
        if let Some(tagline) = &settings.tagline {
            // WordPress calls the tagline "description" on the settings
            // resource.
            body.insert("description".into(), serde_json::json!(tagline));
        }
        self.update_settings(&serde_json::Value::Object(body)).await
    }
}

/// Resolves a tenant site id to its label, URL, and REST surface. Supplied
/// by the hosting collaborator; site persistence itself is out of scope.
#[derive(Clone)]
pub struct SiteHandle {
    pub site_id: Uuid,
    pub label: String,
    pub url: String,
    pub rest: Arc<dyn SiteRest>,
}

#[async_trait]
pub trait SiteDirectory: Send + Sync {
    async fn resolve(&self, site_id: Uuid) -> Result<SiteHandle, AppError>;
}

/// In-memory directory used by the bootstrap wiring and tests.
#[derive(Default)]
pub struct StaticSiteDirectory {
    entries: tokio::sync::RwLock<HashMap<Uuid, SiteHandle>>,
}

impl StaticSiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SiteHandle) {
        self.entries.write().await.insert(handle.site_id, handle);
    }
}

#[async_trait]
impl SiteDirectory for StaticSiteDirectory {
    async fn resolve(&self, site_id: Uuid) -> Result<SiteHandle, AppError> {
        self.entries
            .read()
            .await
            .get(&site_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("site {site_id} not found")))
    }
}

/// Per-action execution result, returned to the caller and attached to the
/// persisted assistant message.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedChange {
    #[serde(rename = "type")]
    pub action_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageOutcome {
    pub message: String,
    pub changes: Vec<AppliedChange>,
}

fn page_excerpt(content: &str) -> String {
    let stripped = TAG_RE.replace_all(content, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PAGE_EXCERPT_CHARS).collect()
}

/// The system prompt teaches the model the site it is editing and the
/// action grammar it must emit.
pub fn build_system_prompt(label: &str, url: &str, pages: &[SitePage]) -> String {
    let mut prompt = format!(
        "You are a website editing assistant for \"{label}\" ({url}).\n\
         You edit the live site by embedding action directives in your replies.\n\n\
         CURRENT PAGES:\n"
    );
    if pages.is_empty() {
        prompt.push_str("(no pages found)\n");
    }
    for page in pages {
        prompt.push_str(&format!(
            "- [ID:{}] \"{}\" — {}\n",
            page.id,
            page.title,
            page_excerpt(&page.content)
        ));
    }
    prompt.push_str(
        "\nACTION FORMAT:\n\
         Emit each action as a fenced block, exactly:\n\
         :::action\n\
         {JSON}\n\
         :::\n\
         Supported actions:\n\
         {\"type\":\"update_page\",\"pageId\":<id>,\"updates\":{\"title\"?,\"content\"?,\"slug\"?,\"status\"?}}\n\
         {\"type\":\"update_settings\",\"settings\":{\"title\"?,\"tagline\"?}}\n\
         {\"type\":\"create_page\",\"page\":{\"title\",\"content\"?,\"slug\"?,\"status\"?}}\n\
         Keep the conversational part of your reply outside the fences. \
         Only emit actions the user asked for.",
    );
    prompt
}

/// Bare prompt used when the page fetch fails at session creation.
pub fn bare_system_prompt(label: &str, url: &str) -> String {
    build_system_prompt(label, url, &[])
}

/// Session-scoped agent: persists the transcript, relays it to the text
/// model, and executes parsed actions against the site REST surface.
pub struct EditorService {
    store: Arc<dyn Store>,
    sites: Arc<dyn SiteDirectory>,
    ai: Option<Arc<dyn AiVendor>>,
    model: String,
}

impl EditorService {
    pub fn new(
        store: Arc<dyn Store>,
        sites: Arc<dyn SiteDirectory>,
        ai: Option<Arc<dyn AiVendor>>,
        model: String,
    ) -> Self {
        Self {
            store,
            sites,
            ai,
            model,
        }
    }

    pub async fn create_session(
        &self,
        user_id: Uuid,
        site_id: Uuid,
    ) -> Result<EditSession, AppError> {
        let site = self.sites.resolve(site_id).await?;

        let system_prompt = match site.rest.list_pages().await {
            Ok(pages) => build_system_prompt(&site.label, &site.url, &pages),
            Err(e) => {
                warn!(site_id = %site_id, "page fetch failed at session creation: {e}");
                bare_system_prompt(&site.label, &site.url)
            }
        };

        let session = self
            .store
            .create_edit_session(user_id, site_id, Some(&format!("Edits for {}", site.label)))
            .await
            .map_err(AppError::from)?;

        // The system prompt is always the session's first message.
        self.store
            .add_edit_message(session.id, MessageRole::System, &system_prompt, None)
            .await
            .map_err(AppError::from)?;

        info!(session_id = %session.id, site_id = %site_id, "edit session created");
        Ok(session)
    }

    pub async fn send_message(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<SendMessageOutcome, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("message text is required".into()));
        }
        let vendor = self
            .ai
            .clone()
            .ok_or_else(|| AppError::Configuration("OPENAI_API_KEY".into()))?;

        let session = self
            .store
            .get_edit_session(session_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if session.user_id != user_id {
            return Err(AppError::NotFound(format!("session {session_id} not found")));
        }
        let site = self.sites.resolve(session.site_id).await?;

        // 1. Replay the transcript in creation order.
        let history = self
            .store
            .list_edit_messages(session_id)
            .await
            .map_err(AppError::from)?;
        let mut transcript: Vec<ChatMessage> = history
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
            .collect();

        // 2. Append and persist the user turn.
        transcript.push(ChatMessage::new("user", text));
        self.store
            .add_edit_message(session_id, MessageRole::User, text, None)
            .await
            .map_err(AppError::from)?;

        // 3. Model call over the full transcript.
        let completion = vendor
            .complete(
                &self.model,
                &CompletionRequest {
                    messages: transcript,
                    max_tokens: Some(4096),
                    temperature: Some(CHAT_TEMPERATURE),
                },
            )
            .await
            .map_err(AppError::Upstream)?;

        // 4. Split action blocks out of the reply.
        let parsed = parse_actions(&completion.content);

        // 5. Execute strictly in source order; failures never stop the
        //    batch.
        let mut changes = Vec::with_capacity(parsed.actions.len());
        for block in &parsed.actions {
            changes.push(self.dispatch(&site, block).await);
        }

        // 6. Persist the assistant turn with the applied changes attached.
        let metadata = if changes.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "changes": changes }))
        };
        self.store
            .add_edit_message(
                session_id,
                MessageRole::Assistant,
                &completion.content,
                metadata.as_ref(),
            )
            .await
            .map_err(AppError::from)?;

        Ok(SendMessageOutcome {
            message: parsed.display_text,
            changes,
        })
    }

    async fn dispatch(&self, site: &SiteHandle, block: &ActionBlock) -> AppliedChange {
        match block {
            ActionBlock::Known(action) => {
                let result = match action {
                    EditAction::UpdatePage { page_id, updates } => {
                        site.rest.update_page(*page_id, updates).await
                    }
                    EditAction::UpdateSettings { settings } => {
                        site.rest.update_settings(settings).await
                    }
                    EditAction::CreatePage { page } => site.rest.create_page(page).await,
                };
                match result {
                    Ok(value) => AppliedChange {
                        action_type: action.type_name().to_string(),
                        success: true,
                        result: Some(value),
                        error: None,
                    },
                    Err(e) => {
                        warn!(action = action.type_name(), "edit action failed: {e}");
                        AppliedChange {
                            action_type: action.type_name().to_string(),
                            success: false,
                            result: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            ActionBlock::Unknown { action_type, .. } => AppliedChange {
                action_type: action_type.clone(),
                success: false,
                result: None,
                error: Some("unknown action type".to_string()),
            },
        }
    }
}
