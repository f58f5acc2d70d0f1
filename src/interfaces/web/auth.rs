use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// Admin surface gate: a static shared secret in `x-proxy-admin-secret`.
/// With no secret configured the surface stays closed rather than open.
pub async fn require_admin_secret(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.proxy_admin_secret.as_deref() else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": {
                    "message": "admin surface disabled: PROXY_ADMIN_SECRET is not configured",
                    "type": "configuration_error",
                }
            })),
        )
            .into_response();
    };

    let presented = req
        .headers()
        .get("x-proxy-admin-secret")
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(secret) if secret == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": {
                    "message": "missing or invalid admin secret",
                    "type": "auth_error",
                }
            })),
        )
            .into_response(),
    }
}

/// Extract the raw Authorization header value for the proxy handlers; key
/// validation happens in the proxy service.
pub fn bearer_header(req_headers: &axum::http::HeaderMap) -> Option<String> {
    req_headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
