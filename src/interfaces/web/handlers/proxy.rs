use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::core::error::AppError;
use crate::core::proxy::ChatCompletionRequest;

use super::super::{AppState, auth};

fn proxy_service(
    state: &AppState,
) -> Result<std::sync::Arc<crate::core::proxy::ProxyService>, AppError> {
    state
        .proxy
        .clone()
        .ok_or_else(|| AppError::Configuration("DATABASE_URL".into()))
}

/// `POST /v1/chat/completions` — OpenAI-compatible, buffered (no
/// streaming).
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    let bearer = auth::bearer_header(&headers);
    match service.chat(bearer.as_deref(), request).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /v1/models` — models the tenant's tier allows.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    let bearer = auth::bearer_header(&headers);
    match service.models(bearer.as_deref()).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /v1/usage` — current-month token usage snapshot.
pub async fn usage(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    let bearer = auth::bearer_header(&headers);
    match service.usage(bearer.as_deref()).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}
