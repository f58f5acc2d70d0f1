use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use super::{
    EditMessage, EditSession, MessageRole, ProxySite, RequestLogEntry, RequestLogRow, SiteStatus,
    Store, StoreError, SubscriptionTier,
};

const MAX_CONNECTIONS: u32 = 10;

/// Normative schema. `IF NOT EXISTS` keeps startup idempotent across
/// restarts.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_sites (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    domain text NOT NULL UNIQUE,
    api_key text NOT NULL UNIQUE,
    label text,
    status text NOT NULL DEFAULT 'active',
    subscription_tier text NOT NULL DEFAULT 'free',
    monthly_token_limit bigint NOT NULL DEFAULT 100000,
    created_at timestamptz NOT NULL DEFAULT now(),
    revoked_at timestamptz
);

CREATE TABLE IF NOT EXISTS proxy_subscription_tiers (
    tier text PRIMARY KEY,
    display_name text NOT NULL,
    monthly_token_limit bigint NOT NULL,
    allowed_models text[] NOT NULL,
    rate_limit_rpm integer NOT NULL
);

CREATE TABLE IF NOT EXISTS proxy_request_log (
    id bigserial PRIMARY KEY,
    site_id uuid NOT NULL REFERENCES proxy_sites(id),
    domain text NOT NULL,
    provider text NOT NULL,
    model text NOT NULL,
    endpoint text NOT NULL,
    method text NOT NULL,
    prompt_tokens bigint NOT NULL DEFAULT 0,
    completion_tokens bigint NOT NULL DEFAULT 0,
    total_tokens bigint NOT NULL DEFAULT 0,
    response_status integer NOT NULL,
    latency_ms bigint NOT NULL DEFAULT 0,
    error_message text,
    requested_at timestamptz NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS proxy_request_log_site_month
    ON proxy_request_log (site_id, requested_at);

CREATE TABLE IF NOT EXISTS editor_sessions (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    user_id uuid NOT NULL,
    site_id uuid NOT NULL,
    title text,
    created_at timestamptz NOT NULL DEFAULT now(),
    updated_at timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS editor_messages (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    session_id uuid NOT NULL REFERENCES editor_sessions(id) ON DELETE CASCADE,
    role text NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
    content text NOT NULL,
    metadata jsonb,
    created_at timestamptz NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS editor_messages_session_created
    ON editor_messages (session_id, created_at);
"#;

/// (tier, display name, monthly token limit, allowed models, rpm)
const TIER_SEED: &[(&str, &str, i64, &[&str], i32)] = &[
    (
        "free",
        "Free",
        100_000,
        &["gpt-4o-mini", "gemini-2.0-flash"],
        10,
    ),
    (
        "starter",
        "Starter",
        1_000_000,
        &["gpt-4o-mini", "gpt-4o", "gemini-2.0-flash", "claude-haiku-4-5"],
        30,
    ),
    (
        "pro",
        "Pro",
        5_000_000,
        &[
            "gpt-4o-mini",
            "gpt-4o",
            "gemini-2.0-flash",
            "gemini-2.5-pro",
            "claude-haiku-4-5",
            "claude-sonnet-4-5",
        ],
        60,
    ),
    (
        "enterprise",
        "Enterprise",
        50_000_000,
        &[
            "gpt-4o-mini",
            "gpt-4o",
            "gemini-2.0-flash",
            "gemini-2.5-pro",
            "claude-haiku-4-5",
            "claude-sonnet-4-5",
            "claude-opus-4-1",
        ],
        300,
    ),
];

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    domain: String,
    api_key: String,
    label: Option<String>,
    status: String,
    subscription_tier: String,
    monthly_token_limit: i64,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<SiteRow> for ProxySite {
    fn from(row: SiteRow) -> Self {
        ProxySite {
            id: row.id,
            domain: row.domain,
            api_key: row.api_key,
            label: row.label,
            // Anything unrecognised is treated as revoked; it can never
            // authenticate.
            status: SiteStatus::from_str(&row.status).unwrap_or(SiteStatus::Revoked),
            subscription_tier: row.subscription_tier,
            monthly_token_limit: row.monthly_token_limit,
            created_at: row.created_at,
            revoked_at: row.revoked_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TierRow {
    tier: String,
    display_name: String,
    monthly_token_limit: i64,
    allowed_models: Vec<String>,
    rate_limit_rpm: i32,
}

impl From<TierRow> for SubscriptionTier {
    fn from(row: TierRow) -> Self {
        SubscriptionTier {
            tier: row.tier,
            display_name: row.display_name,
            monthly_token_limit: row.monthly_token_limit,
            allowed_models: row.allowed_models,
            rate_limit_rpm: row.rate_limit_rpm,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    site_id: Uuid,
    domain: String,
    provider: String,
    model: String,
    endpoint: String,
    method: String,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    response_status: i32,
    latency_ms: i64,
    error_message: Option<String>,
    requested_at: DateTime<Utc>,
}

impl From<LogRow> for RequestLogRow {
    fn from(row: LogRow) -> Self {
        RequestLogRow {
            id: row.id,
            site_id: row.site_id,
            domain: row.domain,
            provider: row.provider,
            model: row.model,
            endpoint: row.endpoint,
            method: row.method,
            prompt_tokens: row.prompt_tokens,
            completion_tokens: row.completion_tokens,
            total_tokens: row.total_tokens,
            response_status: row.response_status,
            latency_ms: row.latency_ms,
            error_message: row.error_message,
            requested_at: row.requested_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    site_id: Uuid,
    title: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SessionRow> for EditSession {
    fn from(row: SessionRow) -> Self {
        EditSession {
            id: row.id,
            user_id: row.user_id,
            site_id: row.site_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for EditMessage {
    fn from(row: MessageRow) -> Self {
        EditMessage {
            id: row.id,
            session_id: row.session_id,
            role: MessageRole::from_str(&row.role).unwrap_or(MessageRole::System),
            content: row.content,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.message().contains("duplicate key")
    {
        return StoreError::Duplicate(db.message().to_string());
    }
    StoreError::Backend(err)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(map_err)?;
        Ok(Self { pool })
    }

    /// Create tables and seed tiers. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }

        for (tier, display_name, limit, models, rpm) in TIER_SEED {
            let models: Vec<String> = models.iter().map(|m| m.to_string()).collect();
            sqlx::query(
                "INSERT INTO proxy_subscription_tiers \
                 (tier, display_name, monthly_token_limit, allowed_models, rate_limit_rpm) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (tier) DO NOTHING",
            )
            .bind(tier)
            .bind(display_name)
            .bind(limit)
            .bind(&models)
            .bind(rpm)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        }

        info!("store schema ready");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_proxy_site(
        &self,
        domain: &str,
        api_key: &str,
        label: Option<&str>,
        tier: &str,
        monthly_token_limit: i64,
    ) -> Result<ProxySite, StoreError> {
        let row: SiteRow = sqlx::query_as(
            "INSERT INTO proxy_sites (domain, api_key, label, subscription_tier, monthly_token_limit) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(domain)
        .bind(api_key)
        .bind(label)
        .bind(tier)
        .bind(monthly_token_limit)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.into())
    }

    async fn find_site_by_api_key(&self, api_key: &str) -> Result<Option<ProxySite>, StoreError> {
        let row: Option<SiteRow> =
            sqlx::query_as("SELECT * FROM proxy_sites WHERE api_key = $1")
                .bind(api_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn get_site(&self, site_id: Uuid) -> Result<Option<ProxySite>, StoreError> {
        let row: Option<SiteRow> = sqlx::query_as("SELECT * FROM proxy_sites WHERE id = $1")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn list_sites(&self) -> Result<Vec<ProxySite>, StoreError> {
        let rows: Vec<SiteRow> =
            sqlx::query_as("SELECT * FROM proxy_sites ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_site_tier(&self, site_id: Uuid, tier: &str) -> Result<ProxySite, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let tier_row: Option<TierRow> =
            sqlx::query_as("SELECT * FROM proxy_subscription_tiers WHERE tier = $1")
                .bind(tier)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        let Some(tier_row) = tier_row else {
            return Err(StoreError::NotFound("subscription tier"));
        };

        // Row lock serialises concurrent mutations of the same site.
        let locked: Option<SiteRow> =
            sqlx::query_as("SELECT * FROM proxy_sites WHERE id = $1 FOR UPDATE")
                .bind(site_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        if locked.is_none() {
            return Err(StoreError::NotFound("site"));
        }

        let row: SiteRow = sqlx::query_as(
            "UPDATE proxy_sites SET subscription_tier = $2, monthly_token_limit = $3 \
             WHERE id = $1 RETURNING *",
        )
        .bind(site_id)
        .bind(&tier_row.tier)
        .bind(tier_row.monthly_token_limit)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(row.into())
    }

    async fn update_site_status(
        &self,
        site_id: Uuid,
        status: SiteStatus,
    ) -> Result<ProxySite, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let locked: Option<SiteRow> =
            sqlx::query_as("SELECT * FROM proxy_sites WHERE id = $1 FOR UPDATE")
                .bind(site_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        if locked.is_none() {
            return Err(StoreError::NotFound("site"));
        }

        let row: SiteRow = sqlx::query_as(
            "UPDATE proxy_sites SET status = $2, \
             revoked_at = CASE WHEN $2 = 'revoked' THEN now() ELSE NULL END \
             WHERE id = $1 RETURNING *",
        )
        .bind(site_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(row.into())
    }

    async fn rotate_site_key(
        &self,
        site_id: Uuid,
        api_key: &str,
    ) -> Result<ProxySite, StoreError> {
        let row: Option<SiteRow> = sqlx::query_as(
            "UPDATE proxy_sites SET api_key = $2 WHERE id = $1 RETURNING *",
        )
        .bind(site_id)
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(Into::into).ok_or(StoreError::NotFound("site"))
    }

    async fn get_tier(&self, tier: &str) -> Result<Option<SubscriptionTier>, StoreError> {
        let row: Option<TierRow> =
            sqlx::query_as("SELECT * FROM proxy_subscription_tiers WHERE tier = $1")
                .bind(tier)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn list_tiers(&self) -> Result<Vec<SubscriptionTier>, StoreError> {
        let rows: Vec<TierRow> = sqlx::query_as(
            "SELECT * FROM proxy_subscription_tiers ORDER BY monthly_token_limit ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn monthly_token_usage(&self, site_id: Uuid) -> Result<i64, StoreError> {
        // SUM(bigint) widens to numeric; cast back for a clean i64 decode.
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_tokens), 0)::bigint FROM proxy_request_log \
             WHERE site_id = $1 AND requested_at >= date_trunc('month', now())",
        )
        .bind(site_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(used)
    }

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO proxy_request_log \
             (site_id, domain, provider, model, endpoint, method, prompt_tokens, \
              completion_tokens, total_tokens, response_status, latency_ms, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.site_id)
        .bind(&entry.domain)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(entry.total_tokens)
        .bind(entry.response_status)
        .bind(entry.latency_ms)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn list_request_logs(
        &self,
        site_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RequestLogRow>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT * FROM proxy_request_log WHERE site_id = $1 \
             ORDER BY requested_at DESC LIMIT $2",
        )
        .bind(site_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_edit_session(
        &self,
        user_id: Uuid,
        site_id: Uuid,
        title: Option<&str>,
    ) -> Result<EditSession, StoreError> {
        let row: SessionRow = sqlx::query_as(
            "INSERT INTO editor_sessions (user_id, site_id, title) \
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(site_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.into())
    }

    async fn get_edit_session(&self, session_id: Uuid) -> Result<Option<EditSession>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM editor_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn add_edit_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<EditMessage, StoreError> {
        let row: MessageRow = sqlx::query_as(
            "INSERT INTO editor_messages (session_id, role, content, metadata) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        sqlx::query("UPDATE editor_sessions SET updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(row.into())
    }

    async fn list_edit_messages(&self, session_id: Uuid) -> Result<Vec<EditMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM editor_messages WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
