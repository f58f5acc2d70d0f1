use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::error::AppError;
use crate::core::store::SiteStatus;

use super::super::AppState;

fn proxy_service(
    state: &AppState,
) -> Result<std::sync::Arc<crate::core::proxy::ProxyService>, AppError> {
    state
        .proxy
        .clone()
        .ok_or_else(|| AppError::Configuration("DATABASE_URL".into()))
}

fn default_tier() -> String {
    "free".to_string()
}

#[derive(Deserialize)]
pub struct RegisterSiteRequest {
    pub domain: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: String,
}

/// `POST /admin/sites` — register a tenant and hand back the raw key once.
pub async fn register_site(
    State(state): State<AppState>,
    Json(request): Json<RegisterSiteRequest>,
) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service
        .register_site(&request.domain, request.label.as_deref(), &request.tier)
        .await
    {
        Ok((site, api_key)) => Json(serde_json::json!({
            "site": site,
            "apiKey": api_key,
            "message": "Save the API key now; it will not be shown again.",
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_sites(State(state): State<AppState>) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service.list_sites().await {
        Ok(sites) => Json(serde_json::json!({ "sites": sites })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_tiers(State(state): State<AppState>) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service.list_tiers().await {
        Ok(tiers) => Json(serde_json::json!({ "tiers": tiers })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn site_usage(State(state): State<AppState>, Path(site_id): Path<Uuid>) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service.site_usage(site_id).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
pub struct RequestsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn site_requests(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<RequestsQuery>,
) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service.site_requests(site_id, query.limit.clamp(1, 500)).await {
        Ok(rows) => Json(serde_json::json!({ "requests": rows })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /admin/sites/{id}/key` — rotate and hand back the new raw key.
pub async fn rotate_key(State(state): State<AppState>, Path(site_id): Path<Uuid>) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    match service.rotate_key(site_id).await {
        Ok((site, api_key)) => Json(serde_json::json!({
            "site": site,
            "apiKey": api_key,
            "message": "Save the API key now; it will not be shown again.",
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct UpdateSiteRequest {
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub status: Option<SiteStatus>,
}

/// `PATCH /admin/sites/{id}` — change tier and/or status.
pub async fn update_site(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<UpdateSiteRequest>,
) -> Response {
    let service = match proxy_service(&state) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    if request.tier.is_none() && request.status.is_none() {
        return AppError::Validation("nothing to update: provide tier and/or status".into())
            .into_response();
    }

    let mut site = None;
    if let Some(tier) = &request.tier {
        match service.update_tier(site_id, tier).await {
            Ok(updated) => site = Some(updated),
            Err(e) => return e.into_response(),
        }
    }
    if let Some(status) = request.status {
        match service.update_status(site_id, status).await {
            Ok(updated) => site = Some(updated),
            Err(e) => return e.into_response(),
        }
    }

    Json(serde_json::json!({ "site": site })).into_response()
}
