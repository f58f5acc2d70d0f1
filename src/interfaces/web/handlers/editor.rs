use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::error::AppError;

use super::super::AppState;

fn editor_service(
    state: &AppState,
) -> Result<std::sync::Arc<crate::core::editor::EditorService>, AppError> {
    state
        .editor
        .clone()
        .ok_or_else(|| AppError::Configuration("DATABASE_URL".into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: Uuid,
    pub site_id: Uuid,
}

/// `POST /api/editor/sessions` — open a session seeded with the site's
/// system prompt.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    let service = match editor_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service
        .create_session(request.user_id, request.site_id)
        .await
    {
        Ok(session) => Json(serde_json::json!({ "session": session })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub user_id: Uuid,
    pub message: String,
}

/// `POST /api/editor/sessions/{id}/messages` — one conversational turn,
/// with per-action results.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    let service = match editor_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service
        .send_message(session_id, request.user_id, &request.message)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}
