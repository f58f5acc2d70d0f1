use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CloudflareConfig;
use crate::core::error::{ProviderError, ProviderErrorKind};

const PROVIDER: &str = "cloudflare";
const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Settings applied by `configure_security`. Fixed set; individual
/// failures are logged, not fatal.
const SECURITY_SETTINGS: &[(&str, &str)] = &[
    ("ssl", "flexible"),
    ("always_use_https", "on"),
    ("min_tls_version", "1.2"),
    ("automatic_https_rewrites", "on"),
    ("browser_check", "on"),
    ("security_level", "medium"),
    ("brotli", "on"),
    ("early_hints", "on"),
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct Zone {
    pub zone_id: String,
    pub nameservers: Vec<String>,
}

#[async_trait]
pub trait DnsApi: Send + Sync {
    /// Idempotent: an existing zone for the domain is returned as-is.
    async fn get_or_create_zone(&self, domain: &str) -> Result<Zone, ProviderError>;

    /// Idempotent: existing A records for the apex (and `www` when
    /// requested) are deleted before the new proxied set is created.
    async fn set_a_records(
        &self,
        zone_id: &str,
        domain: &str,
        ips: &[String],
        include_www: bool,
    ) -> Result<(), ProviderError>;

    /// Best-effort application of the fixed security/perf defaults.
    async fn configure_security(&self, zone_id: &str) -> Result<(), ProviderError>;
}

// ── Cloudflare v4 envelope ──

#[derive(Deserialize)]
struct CfEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct CfError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct CfZone {
    id: String,
    #[serde(default)]
    name_servers: Vec<String>,
}

#[derive(Deserialize)]
struct CfDnsRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
}

#[derive(Serialize)]
struct CreateZoneBody<'a> {
    name: &'a str,
    account: AccountRef<'a>,
    #[serde(rename = "type")]
    zone_type: &'a str,
}

#[derive(Serialize)]
struct AccountRef<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct CreateRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

pub struct CloudflareClient {
    api_key: String,
    email: String,
    account_id: String,
    base_url: String,
    client: Client,
}

impl CloudflareClient {
    pub fn from_config(cfg: &CloudflareConfig) -> Option<Self> {
        let (api_key, email, account_id) = match (
            cfg.api_key.clone(),
            cfg.email.clone(),
            cfg.account_id.clone(),
        ) {
            (Some(k), Some(e), Some(a)) => (k, e, a),
            _ => return None,
        };
        Some(Self {
            api_key,
            email,
            account_id,
            base_url: API_BASE.to_string(),
            client: super::http_client(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            api_key: "test-key".into(),
            email: "ops@example.com".into(),
            account_id: "acct1".into(),
            base_url,
            client: super::http_client(),
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-Auth-Email", &self.email)
            .header("X-Auth-Key", &self.api_key)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let envelope: CfEnvelope<T> = serde_json::from_str(&body).map_err(|_| {
            ProviderError::from_status(PROVIDER, status, body.clone())
        })?;

        if !envelope.success {
            let message = envelope
                .errors
                .first()
                .map(|e| format!("[{}] {}", e.code, e.message))
                .unwrap_or_else(|| "cloudflare call failed".to_string());
            return Err(ProviderError::from_status(PROVIDER, status, message));
        }

        envelope.result.ok_or_else(|| {
            ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamInvalid,
                "successful envelope with no result",
            )
        })
    }

    async fn find_zone(&self, domain: &str) -> Result<Option<Zone>, ProviderError> {
        let url = format!("{}/zones", self.base_url);
        let res = self
            .auth(self.client.get(&url).query(&[("name", domain)]))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let zones: Vec<CfZone> = Self::parse(res).await?;
        Ok(zones.into_iter().next().map(|z| Zone {
            zone_id: z.id,
            nameservers: z.name_servers,
        }))
    }

    async fn list_a_records(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Vec<CfDnsRecord>, ProviderError> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let res = self
            .auth(self.client.get(&url).query(&[("type", "A"), ("name", name)]))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;
        Self::parse(res).await
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        );
        let res = self
            .auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;
        let _: serde_json::Value = Self::parse(res).await?;
        Ok(())
    }

    async fn create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ip: &str,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let body = CreateRecordBody {
            record_type: "A",
            name,
            content: ip,
            ttl: 1, // automatic
            proxied: true,
        };
        let res = self
            .auth(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;
        let _: serde_json::Value = Self::parse(res).await?;
        Ok(())
    }
}

#[async_trait]
impl DnsApi for CloudflareClient {
    async fn get_or_create_zone(&self, domain: &str) -> Result<Zone, ProviderError> {
        if let Some(existing) = self.find_zone(domain).await? {
            info!(domain, zone_id = %existing.zone_id, "reusing existing zone");
            return Ok(existing);
        }

        let url = format!("{}/zones", self.base_url);
        let body = CreateZoneBody {
            name: domain,
            account: AccountRef {
                id: &self.account_id,
            },
            zone_type: "full",
        };
        let res = self
            .auth(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let zone: CfZone = Self::parse(res).await?;
        info!(domain, zone_id = %zone.id, "zone created");
        Ok(Zone {
            zone_id: zone.id,
            nameservers: zone.name_servers,
        })
    }

    async fn set_a_records(
        &self,
        zone_id: &str,
        domain: &str,
        ips: &[String],
        include_www: bool,
    ) -> Result<(), ProviderError> {
        let mut names = vec![domain.to_string()];
        if include_www {
            names.push(format!("www.{domain}"));
        }

        // Delete-then-create keeps repeat applications convergent.
        for name in &names {
            for record in self.list_a_records(zone_id, name).await? {
                if record.record_type == "A" {
                    self.delete_record(zone_id, &record.id).await?;
                    info!(zone_id, name = %record.name, "stale A record removed");
                }
            }
        }

        for name in &names {
            for ip in ips {
                self.create_a_record(zone_id, name, ip).await?;
            }
        }
        info!(zone_id, records = names.len() * ips.len(), "A records set");
        Ok(())
    }

    async fn configure_security(&self, zone_id: &str) -> Result<(), ProviderError> {
        for (setting, value) in SECURITY_SETTINGS {
            let url = format!("{}/zones/{}/settings/{}", self.base_url, zone_id, setting);
            let result = async {
                let res = self
                    .auth(
                        self.client
                            .patch(&url)
                            .json(&serde_json::json!({ "value": value })),
                    )
                    .send()
                    .await
                    .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;
                let _: serde_json::Value = Self::parse(res).await?;
                Ok::<_, ProviderError>(())
            }
            .await;

            if let Err(e) = result {
                warn!(zone_id, setting, "security setting not applied: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_failure_surfaces_first_error() {
        let body = r#"{"success":false,"errors":[{"code":1061,"message":"zone already exists"}],"result":null}"#;
        let envelope: CfEnvelope<CfZone> = serde_json::from_str(body).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.errors[0].code, 1061);
    }

    #[test]
    fn zone_result_parses_nameservers() {
        let body = r#"{"success":true,"errors":[],"result":{"id":"z1","name_servers":["ns1.cf.com","ns2.cf.com"]}}"#;
        let envelope: CfEnvelope<CfZone> = serde_json::from_str(body).unwrap();
        let zone = envelope.result.unwrap();
        assert_eq!(zone.id, "z1");
        assert_eq!(zone.name_servers.len(), 2);
    }

    #[tokio::test]
    async fn existing_zone_is_reused_not_recreated() {
        let server = httpmock::MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path("/zones")
                    .query_param("name", "alpha.example");
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "errors": [],
                    "result": [{ "id": "z9", "name_servers": ["ns1.cf.com", "ns2.cf.com"] }],
                }));
            })
            .await;

        let client = CloudflareClient::with_base_url(server.base_url());
        let zone = client.get_or_create_zone("alpha.example").await.unwrap();
        assert_eq!(zone.zone_id, "z9");
        assert_eq!(zone.nameservers, vec!["ns1.cf.com", "ns2.cf.com"]);
        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn missing_zone_is_created_with_account_scope() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/zones");
                then.status(200).json_body(serde_json::json!({
                    "success": true, "errors": [], "result": [],
                }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/zones")
                    .header("X-Auth-Email", "ops@example.com")
                    .json_body_partial(r#"{ "name": "beta.example", "type": "full" }"#);
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "errors": [],
                    "result": { "id": "z1", "name_servers": ["ns1", "ns2"] },
                }));
            })
            .await;

        let client = CloudflareClient::with_base_url(server.base_url());
        let zone = client.get_or_create_zone("beta.example").await.unwrap();
        assert_eq!(zone.zone_id, "z1");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn set_a_records_deletes_existing_before_creating() {
        let server = httpmock::MockServer::start_async().await;
        // One stale apex record; none for www.
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path("/zones/z1/dns_records")
                    .query_param("name", "alpha.example");
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "errors": [],
                    "result": [{ "id": "r1", "name": "alpha.example", "type": "A" }],
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path("/zones/z1/dns_records")
                    .query_param("name", "www.alpha.example");
                then.status(200).json_body(serde_json::json!({
                    "success": true, "errors": [], "result": [],
                }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::DELETE)
                    .path("/zones/z1/dns_records/r1");
                then.status(200).json_body(serde_json::json!({
                    "success": true, "errors": [], "result": { "id": "r1" },
                }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/zones/z1/dns_records")
                    .json_body_partial(r#"{ "type": "A", "proxied": true }"#);
                then.status(200).json_body(serde_json::json!({
                    "success": true, "errors": [], "result": { "id": "r2" },
                }));
            })
            .await;

        let client = CloudflareClient::with_base_url(server.base_url());
        client
            .set_a_records("z1", "alpha.example", &["1.2.3.4".into()], true)
            .await
            .unwrap();

        delete.assert_async().await;
        // apex + www
        assert_eq!(create.hits_async().await, 2);
    }

    #[test]
    fn security_settings_include_https_enforcement() {
        assert!(
            SECURITY_SETTINGS
                .iter()
                .any(|(k, v)| *k == "always_use_https" && *v == "on")
        );
        assert!(
            SECURITY_SETTINGS
                .iter()
                .any(|(k, v)| *k == "min_tls_version" && *v == "1.2")
        );
    }
}
