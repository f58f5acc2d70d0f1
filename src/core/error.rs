use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Kind classification shared by every provider client. The workflow layer
/// decides per step whether a kind is fatal; the retry layer only looks at
/// `retryable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Network,
    Timeout,
    Auth,
    NotFound,
    Conflict,
    RateLimited,
    QuotaExceeded,
    UpstreamInvalid,
    UpstreamFailure,
}

impl ProviderErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Network
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::UpstreamFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::Conflict => "conflict",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::UpstreamInvalid => "upstream_invalid",
            ProviderErrorKind::UpstreamFailure => "upstream_failure",
        }
    }
}

/// Uniform error shape surfaced by every provider client.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?} from {provider}: {vendor_message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub http_status: Option<u16>,
    pub vendor_message: String,
}

impl ProviderError {
    pub fn new(provider: &'static str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            http_status: None,
            vendor_message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classify a reqwest transport failure (no HTTP status available).
    pub fn from_transport(provider: &'static str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self::new(provider, kind, err.to_string())
    }

    /// Classify a non-success HTTP status from a vendor.
    pub fn from_status(provider: &'static str, status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            409 => ProviderErrorKind::Conflict,
            429 => ProviderErrorKind::RateLimited,
            500..=599 => ProviderErrorKind::UpstreamFailure,
            _ => ProviderErrorKind::UpstreamInvalid,
        };
        Self::new(provider, kind, body).with_status(status)
    }
}

/// Application-level failure taxonomy. Every HTTP handler converts one of
/// these into the normative `{error:{message, type}}` body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("missing configuration: {0}")]
    Configuration(String),
    #[error("{0}")]
    Auth(String),
    #[error("monthly token quota exceeded")]
    QuotaExceeded { used: i64, limit: i64 },
    #[error("model not allowed for this subscription tier: {0}")]
    ModelNotAllowed(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("upstream provider failed: {0}")]
    Upstream(#[from] ProviderError),
    #[error("site was not ready within the polling budget")]
    NotReady,
    #[error("operation canceled by caller")]
    Canceled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Configuration(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ModelNotAllowed(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::NotReady => StatusCode::GATEWAY_TIMEOUT,
            AppError::Canceled => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Configuration(_) => "configuration_error",
            AppError::Auth(_) => "auth_error",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::ModelNotAllowed(_) => "model_not_allowed",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Upstream(_) => "upstream_error",
            AppError::NotReady => "not_ready",
            AppError::Canceled => "canceled",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Body for the normative error envelope. Quota errors carry the usage
    /// snapshot alongside the message.
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            AppError::QuotaExceeded { used, limit } => serde_json::json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "usage": {
                        "used": used,
                        "limit": limit,
                        "remaining": 0,
                    },
                }
            }),
            AppError::Configuration(_) => serde_json::json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "configurationRequired": true,
                }
            }),
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                serde_json::json!({
                    "error": { "message": "internal server error", "type": "internal_error" }
                })
            }
            other => serde_json::json!({
                "error": { "message": other.to_string(), "type": other.error_type() }
            }),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), axum::Json(self.to_body())).into_response()
    }
}
