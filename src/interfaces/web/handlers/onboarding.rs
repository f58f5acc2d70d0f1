use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::Deserialize;

use crate::core::workflow::onboarding::OnboardingOptions;

use super::super::{AppState, sse};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub url: String,
    #[serde(default)]
    pub options: OnboardingOptions,
}

/// `POST /api/onboarding/copy` — scrape an existing site and derive
/// contexts from it.
pub async fn start_copy(
    State(state): State<AppState>,
    Json(request): Json<CopyRequest>,
) -> axum::response::Response {
    let engine = state.onboarding.clone();
    sse::stream_workflow(move |sink| async move {
        engine.run_copy(&request.url, request.options, &sink).await.run
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRequest {
    /// question-id → free-text answer
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub options: OnboardingOptions,
}

/// `POST /api/onboarding/voice` — build contexts from guided-interview
/// answers.
pub async fn start_voice(
    State(state): State<AppState>,
    Json(request): Json<VoiceRequest>,
) -> axum::response::Response {
    let engine = state.onboarding.clone();
    sse::stream_workflow(move |sink| async move {
        engine
            .run_voice(&request.answers, request.options, &sink)
            .await
            .run
    })
}
