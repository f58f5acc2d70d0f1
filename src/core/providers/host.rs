use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::{ProviderError, ProviderErrorKind};

const PROVIDER: &str = "instawp";
const API_BASE: &str = "https://app.instawp.io/api/v2";

/// HEAD probes run after the API reports ready; any response below 400
/// counts. After this many failures the API's word is trusted (DNS/TLS may
/// still be propagating).
const READY_PROBE_ATTEMPTS: u32 = 6;
const READY_PROBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct CreateSiteOptions {
    pub site_name: String,
    pub wp_version: String,
    pub php_version: String,
    pub plan_id: u32,
    pub is_reserved: bool,
}

impl CreateSiteOptions {
    /// Site name falls back to the domain with dots flattened.
    pub fn for_domain(domain: &str, site_name: Option<String>) -> Self {
        Self {
            site_name: site_name.unwrap_or_else(|| domain.replace('.', "-")),
            wp_version: "6.8.1".to_string(),
            php_version: "8.0".to_string(),
            plan_id: 2,
            is_reserved: true,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HostedSite {
    pub id: String,
    pub wp_url: String,
    pub wp_username: String,
    pub wp_password: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainMapping {
    pub a_records: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SslStatus {
    pub enabled: bool,
    pub status: String,
}

#[derive(Debug, Clone, Copy)]
pub struct MapDomainOptions {
    pub www: bool,
    pub route_www: bool,
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn create_site(&self, options: &CreateSiteOptions) -> Result<HostedSite, ProviderError>;

    /// Poll until the host reports the site active, then HEAD-probe the URL.
    async fn wait_until_ready(
        &self,
        site_id: &str,
        budget: Duration,
        interval: Duration,
    ) -> Result<HostedSite, ProviderError>;

    async fn map_domain(
        &self,
        site_id: &str,
        domain: &str,
        options: MapDomainOptions,
    ) -> Result<DomainMapping, ProviderError>;

    async fn check_ssl_status(&self, site_id: &str) -> Result<SslStatus, ProviderError>;
}

// ── InstaWP wire shapes ──

#[derive(Deserialize)]
struct InstaWpEnvelope<T> {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct SiteData {
    id: serde_json::Value,
    #[serde(default)]
    wp_url: Option<String>,
    #[serde(default)]
    wp_username: Option<String>,
    #[serde(default)]
    wp_password: Option<String>,
    #[serde(default)]
    status: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MapDomainData {
    #[serde(default)]
    a_records: Vec<String>,
}

#[derive(Deserialize)]
struct SslData {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    status: Option<String>,
}

/// The host reports readiness as numeric 0 or the literals active/running.
fn status_is_ready(status: &serde_json::Value) -> bool {
    match status {
        serde_json::Value::Number(n) => n.as_i64() == Some(0),
        serde_json::Value::String(s) => {
            let s = s.to_lowercase();
            s == "active" || s == "running" || s == "0"
        }
        _ => false,
    }
}

fn site_from_data(data: SiteData) -> Result<(HostedSite, Option<serde_json::Value>), ProviderError> {
    let id = match &data.id {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamInvalid,
                "site payload missing id",
            ));
        }
    };
    Ok((
        HostedSite {
            id,
            wp_url: data.wp_url.unwrap_or_default(),
            wp_username: data.wp_username.unwrap_or_default(),
            wp_password: data.wp_password.unwrap_or_default(),
        },
        data.status,
    ))
}

pub struct InstaWpClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl InstaWpClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: API_BASE.to_string(),
            client: super::http_client(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            api_key: "test-key".into(),
            base_url,
            client: super::http_client(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let res = req
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }

        let envelope: InstaWpEnvelope<T> = res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })?;

        if !envelope.status {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamFailure,
                envelope
                    .message
                    .unwrap_or_else(|| "host call reported failure".to_string()),
            ));
        }
        envelope.data.ok_or_else(|| {
            ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamInvalid,
                "successful envelope with no data",
            )
        })
    }

    async fn get_site(&self, site_id: &str) -> Result<SiteData, ProviderError> {
        let url = format!("{}/sites/{}", self.base_url, site_id);
        self.call(self.client.get(&url)).await
    }

    /// Any HTTP answer below 400 counts as alive.
    async fn probe_site(&self, wp_url: &str) -> bool {
        match self
            .client
            .head(wp_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(res) => res.status().as_u16() < 400,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl HostApi for InstaWpClient {
    async fn create_site(&self, options: &CreateSiteOptions) -> Result<HostedSite, ProviderError> {
        let url = format!("{}/sites", self.base_url);
        let data: SiteData = self.call(self.client.post(&url).json(options)).await?;
        let (site, _) = site_from_data(data)?;
        info!(site_id = %site.id, "host site created");
        Ok(site)
    }

    async fn wait_until_ready(
        &self,
        site_id: &str,
        budget: Duration,
        interval: Duration,
    ) -> Result<HostedSite, ProviderError> {
        let deadline = tokio::time::Instant::now() + budget;

        let site = loop {
            let data = self.get_site(site_id).await?;
            let (site, status) = site_from_data(data)?;
            if status.as_ref().map(status_is_ready).unwrap_or(false) {
                break site;
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Err(ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::Timeout,
                    format!("site {site_id} not ready within {}s", budget.as_secs()),
                ));
            }
            tokio::time::sleep(interval).await;
        };

        if !site.wp_url.is_empty() {
            for attempt in 1..=READY_PROBE_ATTEMPTS {
                if self.probe_site(&site.wp_url).await {
                    return Ok(site);
                }
                if attempt < READY_PROBE_ATTEMPTS {
                    tokio::time::sleep(READY_PROBE_DELAY).await;
                }
            }
            warn!(
                site_id,
                "site URL probes failed; trusting the host API (DNS/TLS may still be propagating)"
            );
        }
        Ok(site)
    }

    async fn map_domain(
        &self,
        site_id: &str,
        domain: &str,
        options: MapDomainOptions,
    ) -> Result<DomainMapping, ProviderError> {
        let url = format!("{}/sites/{}/domains", self.base_url, site_id);
        let body = serde_json::json!({
            "domain": domain,
            "www": options.www,
            "route_www": options.route_www,
        });
        let data: MapDomainData = self.call(self.client.post(&url).json(&body)).await?;
        Ok(DomainMapping {
            a_records: data.a_records,
        })
    }

    async fn check_ssl_status(&self, site_id: &str) -> Result<SslStatus, ProviderError> {
        let url = format!("{}/sites/{}/ssl", self.base_url, site_id);
        let data: SslData = self.call(self.client.get(&url)).await?;
        Ok(SslStatus {
            enabled: data.enabled,
            status: data.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}
