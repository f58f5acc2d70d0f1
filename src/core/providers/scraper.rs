use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::core::error::{ProviderError, ProviderErrorKind};

const PROVIDER: &str = "firecrawl";
const API_BASE: &str = "https://api.firecrawl.dev/v1";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s+[^>]*(?:name|property)\s*=\s*["']([^"']+)["'][^>]*content\s*=\s*["']([^"']*)["'][^>]*>"#)
        .unwrap()
});
static ICON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\s+[^>]*rel\s*=\s*["'][^"']*icon[^"']*["'][^>]*href\s*=\s*["']([^"']+)["']"#)
        .unwrap()
});
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["'](https?://[^"']+)["']"#).unwrap());
static SCRIPT_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static BLANK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ScrapeMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_image: Option<String>,
    pub favicon: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScrapeResult {
    pub markdown: String,
    pub html: Option<String>,
    pub metadata: ScrapeMetadata,
    pub links: Vec<String>,
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeOptions {
    pub include_html: bool,
    pub include_screenshot: bool,
}

#[async_trait]
pub trait ScraperApi: Send + Sync {
    async fn scrape(&self, url: &str, options: ScrapeOptions) -> Result<ScrapeResult, ProviderError>;
}

// ── Firecrawl wire shapes ──

#[derive(Deserialize)]
struct FirecrawlEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<FirecrawlData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirecrawlData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    screenshot: Option<String>,
    #[serde(default)]
    metadata: Option<FirecrawlMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirecrawlMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    og_image: Option<String>,
    #[serde(default)]
    favicon: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Scraper client: Firecrawl when a key is configured, otherwise a native
/// HTTP fetch with regex extraction (metadata + stripped-text markdown).
pub struct Scraper {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl Scraper {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: API_BASE.to_string(),
            client: super::http_client(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: super::http_client(),
        }
    }

    async fn scrape_firecrawl(
        &self,
        api_key: &str,
        url: &str,
        options: ScrapeOptions,
    ) -> Result<ScrapeResult, ProviderError> {
        let mut formats = vec!["markdown", "links"];
        if options.include_html {
            formats.push("html");
        }
        if options.include_screenshot {
            formats.push("screenshot");
        }

        let res = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&serde_json::json!({ "url": url, "formats": formats }))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }

        let envelope: FirecrawlEnvelope = res.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, ProviderErrorKind::UpstreamInvalid, e.to_string())
        })?;

        if !envelope.success {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamFailure,
                envelope.error.unwrap_or_else(|| "scrape failed".to_string()),
            ));
        }

        let data = envelope.data.ok_or_else(|| {
            ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamInvalid,
                "successful envelope with no data",
            )
        })?;

        let metadata = data.metadata.map(|m| ScrapeMetadata {
            title: m.title,
            description: m.description,
            og_image: m.og_image,
            favicon: m.favicon,
            language: m.language,
        });

        Ok(ScrapeResult {
            markdown: data.markdown.unwrap_or_default(),
            html: data.html,
            metadata: metadata.unwrap_or_default(),
            links: data.links,
            screenshot: data.screenshot,
        })
    }

    async fn scrape_native(
        &self,
        url: &str,
        options: ScrapeOptions,
    ) -> Result<ScrapeResult, ProviderError> {
        debug!(url, "scraping with native fallback");
        let res = self
            .client
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (compatible; webtosite/0.4)")
            .send()
            .await
            .map_err(|e| ProviderError::from_transport("native-scraper", e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                "native-scraper",
                status.as_u16(),
                format!("fetch of {url} failed"),
            ));
        }

        let html = res
            .text()
            .await
            .map_err(|e| ProviderError::from_transport("native-scraper", e))?;

        let result = extract_native(&html, options.include_html);
        Ok(result)
    }
}

/// Pure extraction used by the native path: metadata from head tags,
/// markdown from tag-stripped visible text.
fn extract_native(html: &str, include_html: bool) -> ScrapeResult {
    let title = TITLE_RE
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty());

    let mut description = None;
    let mut og_image = None;
    let mut language = None;
    for caps in META_RE.captures_iter(html) {
        let key = caps[1].to_lowercase();
        let value = caps[2].trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "description" | "og:description" if description.is_none() => {
                description = Some(value);
            }
            "og:image" if og_image.is_none() => og_image = Some(value),
            "og:locale" if language.is_none() => language = Some(value),
            _ => {}
        }
    }

    let favicon = ICON_RE.captures(html).map(|c| c[1].trim().to_string());

    let links: Vec<String> = {
        let mut seen = std::collections::BTreeSet::new();
        HREF_RE
            .captures_iter(html)
            .map(|c| c[1].to_string())
            .filter(|l| seen.insert(l.clone()))
            .collect()
    };

    let stripped = SCRIPT_STYLE_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&stripped, "\n");
    let text = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let text = BLANK_RE.replace_all(&text, "\n\n").to_string();

    let mut markdown = String::new();
    if let Some(t) = &title {
        markdown.push_str(&format!("# {t}\n\n"));
    }
    if let Some(d) = &description {
        markdown.push_str(&format!("{d}\n\n"));
    }
    markdown.push_str(&text);

    ScrapeResult {
        markdown,
        html: include_html.then(|| html.to_string()),
        metadata: ScrapeMetadata {
            title,
            description,
            og_image,
            favicon,
            language,
        },
        links,
        screenshot: None,
    }
}

#[async_trait]
impl ScraperApi for Scraper {
    async fn scrape(&self, url: &str, options: ScrapeOptions) -> Result<ScrapeResult, ProviderError> {
        match &self.api_key {
            Some(key) => self.scrape_firecrawl(key, url, options).await,
            None => {
                info!(url, "no scraper key configured, using native fallback");
                self.scrape_native(url, options).await
            }
        }
    }
}
