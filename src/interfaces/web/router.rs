use axum::{
    Json, Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{admin, editor, onboarding, provision, proxy};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let features = &state.config.features;

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route(
            "/api/provision/domain-site",
            post(provision::start_domain_site),
        )
        .route("/api/onboarding/copy", post(onboarding::start_copy));

    if features.voice_flow {
        router = router.route("/api/onboarding/voice", post(onboarding::start_voice));
    }

    if features.plugin_api {
        router = router.route("/api/provision/apply", post(provision::apply_contexts));
    }

    if features.user_auth {
        router = router
            .route("/api/editor/sessions", post(editor::create_session))
            .route(
                "/api/editor/sessions/{session_id}/messages",
                post(editor::send_message),
            );
    }

    if features.ai_proxy {
        router = router
            .route("/v1/chat/completions", post(proxy::chat_completions))
            .route("/v1/models", get(proxy::list_models))
            .route("/v1/usage", get(proxy::usage));

        let admin_router = Router::new()
            .route(
                "/admin/sites",
                get(admin::list_sites).post(admin::register_site),
            )
            .route("/admin/tiers", get(admin::list_tiers))
            .route("/admin/sites/{site_id}", patch(admin::update_site))
            .route("/admin/sites/{site_id}/key", post(admin::rotate_key))
            .route("/admin/sites/{site_id}/usage", get(admin::site_usage))
            .route("/admin/sites/{site_id}/requests", get(admin::site_requests))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_admin_secret,
            ));
        router = router.merge(admin_router);
    }

    router
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.config.api_port))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
