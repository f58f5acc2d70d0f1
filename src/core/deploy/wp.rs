use reqwest::Client;
use serde::Deserialize;

use crate::core::error::{ProviderError, ProviderErrorKind};
use crate::core::providers::host::HostedSite;

const PROVIDER: &str = "wordpress";

/// REST client for one provisioned site, authenticated with the basic-auth
/// credentials the host returned.
pub struct WpClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpPage {
    pub id: i64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub title: WpRendered,
    #[serde(default)]
    pub content: WpRendered,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WpRendered {
    #[serde(default)]
    pub rendered: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpMedia {
    pub id: i64,
    #[serde(default)]
    pub source_url: String,
}

impl WpClient {
    pub fn for_site(site: &HostedSite) -> Self {
        Self::new(
            site.wp_url.clone(),
            site.wp_username.clone(),
            site.wp_password.clone(),
        )
    }

    pub fn new(base_url: String, username: String, password: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            client: crate::core::providers::http_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/wp-json{}", self.base_url, path)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let res = req
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }
        res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })
    }

    pub async fn list_pages(&self) -> Result<Vec<WpPage>, ProviderError> {
        self.send(
            self.client
                .get(self.url("/wp/v2/pages"))
                .query(&[("per_page", "100"), ("status", "publish,draft")]),
        )
        .await
    }

    pub async fn create_page(
        &self,
        title: &str,
        content: &str,
        slug: Option<&str>,
        status: &str,
    ) -> Result<WpPage, ProviderError> {
        let mut body = serde_json::json!({
            "title": title,
            "content": content,
            "status": status,
        });
        if let Some(slug) = slug {
            body["slug"] = serde_json::json!(slug);
        }
        self.send(self.client.post(self.url("/wp/v2/pages")).json(&body))
            .await
    }

    /// WordPress updates via POST on the resource id.
    pub async fn update_page(
        &self,
        page_id: i64,
        updates: &serde_json::Value,
    ) -> Result<WpPage, ProviderError> {
        self.send(
            self.client
                .post(self.url(&format!("/wp/v2/pages/{page_id}")))
                .json(updates),
        )
        .await
    }

    pub async fn update_settings(
        &self,
        settings: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        self.send(self.client.post(self.url("/wp/v2/settings")).json(settings))
            .await
    }

    /// Download an external asset and re-upload it into the media library.
    pub async fn upload_media_from_url(
        &self,
        source_url: &str,
        filename: &str,
    ) -> Result<WpMedia, ProviderError> {
        let download = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;
        if !download.status().is_success() {
            return Err(ProviderError::from_status(
                PROVIDER,
                download.status().as_u16(),
                format!("asset download failed: {source_url}"),
            ));
        }
        let bytes = download
            .bytes()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        self.send(
            self.client
                .post(self.url("/wp/v2/media"))
                .header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{filename}\""),
                )
                .header("Content-Type", "application/octet-stream")
                .body(bytes.to_vec()),
        )
        .await
    }

    pub async fn set_custom_css(&self, css: &str) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url("/wp/v2/custom_css"))
                    .json(&serde_json::json!({ "css": css })),
            )
            .await?;
        Ok(())
    }

    /// Install and activate in one call; `already installed` from the site
    /// downgrades to an activation attempt.
    pub async fn install_plugin(&self, slug: &str) -> Result<(), ProviderError> {
        let install: Result<serde_json::Value, ProviderError> = self
            .send(
                self.client
                    .post(self.url("/wp/v2/plugins"))
                    .json(&serde_json::json!({ "slug": slug, "status": "active" })),
            )
            .await;

        match install {
            Ok(_) => Ok(()),
            Err(e) if plugin_already_present(&e.vendor_message) => self.activate_plugin(slug).await,
            Err(e) => Err(e),
        }
    }

    pub async fn activate_plugin(&self, slug: &str) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url(&format!("/wp/v2/plugins/{slug}/{slug}")))
                    .json(&serde_json::json!({ "status": "active" })),
            )
            .await?;
        Ok(())
    }
}

pub(super) fn plugin_already_present(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already installed") || lower.contains("exists")
}
