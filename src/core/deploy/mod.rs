pub mod content;
pub mod wp;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::context::{ContentContext, DeploymentContext};
use crate::core::error::ProviderError;
use crate::core::providers::ai::AiVendor;
use crate::core::providers::host::HostedSite;

use content::GeneratedPage;
use wp::WpClient;

/// Accumulated result of one applicator task. Failures accumulate in the
/// report instead of aborting the pass.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed {
        task: String,
        #[serde(skip_serializing_if = "serde_json::Value::is_null")]
        data: serde_json::Value,
    },
    Failed {
        task: String,
        error: String,
    },
}

impl StepOutcome {
    pub fn completed(task: impl Into<String>, data: serde_json::Value) -> Self {
        StepOutcome::Completed {
            task: task.into(),
            data,
        }
    }

    pub fn failed(task: impl Into<String>, error: impl ToString) -> Self {
        StepOutcome::Failed {
            task: task.into(),
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ApplyReport {
    pub outcomes: Vec<StepOutcome>,
}

impl ApplyReport {
    pub fn push(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn record_result<T>(&mut self, task: &str, result: Result<T, ProviderError>)
    where
        T: serde::Serialize,
    {
        match result {
            Ok(value) => self.push(StepOutcome::completed(
                task,
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            )),
            Err(e) => {
                warn!(task, "applicator task failed: {e}");
                self.push(StepOutcome::failed(task, e));
            }
        }
    }
}

/// Applies deployment/content artifacts to a live provisioned site.
#[async_trait]
pub trait SiteApplicator: Send + Sync {
    /// Branding, customizer assets, and plugins. Sub-task failures are
    /// collected, never fatal.
    async fn apply_deployment(
        &self,
        site: &HostedSite,
        deployment: &DeploymentContext,
        content: Option<&ContentContext>,
    ) -> ApplyReport;

    /// AI page generation with per-page template fallback; always produces
    /// one page per `content.pages` entry.
    async fn generate_pages(&self, context: &ContentContext) -> Vec<GeneratedPage>;

    /// Create the generated pages and point the front page at `home`.
    /// Re-application creates duplicates; the core does not deduplicate.
    async fn push_pages(&self, site: &HostedSite, pages: &[GeneratedPage]) -> ApplyReport;
}

pub struct WpApplicator {
    ai: Option<Arc<dyn AiVendor>>,
    content_model: String,
}

impl WpApplicator {
    pub fn new(ai: Option<Arc<dyn AiVendor>>, content_model: String) -> Self {
        Self { ai, content_model }
    }

    async fn apply_branding(
        &self,
        wp: &WpClient,
        deployment: &DeploymentContext,
        report: &mut ApplyReport,
    ) {
        let branding = &deployment.branding;

        if let Some(logo_url) = &branding.logo_url {
            let outcome = async {
                let media = wp.upload_media_from_url(logo_url, "site-logo.png").await?;
                wp.update_settings(&serde_json::json!({ "site_logo": media.id }))
                    .await?;
                Ok::<_, ProviderError>(serde_json::json!({ "mediaId": media.id }))
            }
            .await;
            report.record_result("logo", outcome);
        }

        if let Some(favicon_url) = &branding.favicon_url {
            let outcome = async {
                let media = wp.upload_media_from_url(favicon_url, "site-icon.png").await?;
                wp.update_settings(&serde_json::json!({ "site_icon": media.id }))
                    .await?;
                Ok::<_, ProviderError>(serde_json::json!({ "mediaId": media.id }))
            }
            .await;
            report.record_result("favicon", outcome);
        }

        if let Some(primary) = &branding.primary_color {
            let mut css = format!(":root {{ --primary-color: {primary};");
            if let Some(secondary) = &branding.secondary_color {
                css.push_str(&format!(" --secondary-color: {secondary};"));
            }
            css.push_str(" }");
            report.record_result("brand_css", wp.set_custom_css(&css).await);
        }
    }
}

#[async_trait]
impl SiteApplicator for WpApplicator {
    async fn apply_deployment(
        &self,
        site: &HostedSite,
        deployment: &DeploymentContext,
        content: Option<&ContentContext>,
    ) -> ApplyReport {
        let wp = WpClient::for_site(site);
        let mut report = ApplyReport::default();

        // 1. Site identity from the business info when present.
        if let Some(content) = content {
            let mut settings = serde_json::json!({ "title": content.business.name });
            if let Some(tagline) = &content.business.tagline {
                settings["description"] = serde_json::json!(tagline);
            }
            report.record_result("site_settings", wp.update_settings(&settings).await);
        }

        // 2. Customizer assets; each sub-task records its own result.
        self.apply_branding(&wp, deployment, &mut report).await;

        // 3. Plugins.
        for plugin in &deployment.plugins {
            let result = wp.install_plugin(&plugin.slug).await;
            report.record_result(&format!("plugin:{}", plugin.slug), result);
        }

        info!(
            site_id = %site.id,
            ok = report.succeeded(),
            failed = report.failed(),
            "deployment applied"
        );
        report
    }

    async fn generate_pages(&self, context: &ContentContext) -> Vec<GeneratedPage> {
        let pages = if context.pages.is_empty() {
            crate::core::context::default_pages()
        } else {
            context.pages.clone()
        };

        let mut generated = Vec::with_capacity(pages.len());
        for page in &pages {
            generated
                .push(content::generate_page(self.ai.as_deref(), &self.content_model, context, page).await);
        }
        generated
    }

    async fn push_pages(&self, site: &HostedSite, pages: &[GeneratedPage]) -> ApplyReport {
        let wp = WpClient::for_site(site);
        let mut report = ApplyReport::default();
        let mut home_id: Option<i64> = None;

        for page in pages {
            match wp
                .create_page(&page.title, &page.html, Some(&page.slug), "publish")
                .await
            {
                Ok(created) => {
                    if page.slug == "home" {
                        home_id = Some(created.id);
                    }
                    report.push(StepOutcome::completed(
                        format!("page:{}", page.slug),
                        serde_json::json!({ "id": created.id }),
                    ));
                }
                Err(e) => {
                    warn!(slug = %page.slug, "page creation failed: {e}");
                    report.push(StepOutcome::failed(format!("page:{}", page.slug), e));
                }
            }
        }

        if let Some(id) = home_id {
            let result = wp
                .update_settings(&serde_json::json!({
                    "show_on_front": "page",
                    "page_on_front": id,
                }))
                .await;
            report.record_result("front_page", result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_successes_and_failures() {
        let mut report = ApplyReport::default();
        report.push(StepOutcome::completed("a", serde_json::Value::Null));
        report.push(StepOutcome::failed("b", "nope"));
        report.push(StepOutcome::completed("c", serde_json::json!({"id": 1})));
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = StepOutcome::failed("plugin:seo", "upstream 500");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["task"], "plugin:seo");
    }
}
