use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::core::context::{
    Branding, BusinessInfo, ContentContext, DeploymentContext, PageSpec, SeoSpec, TemplateChoice,
    Tone, default_pages, is_valid_hex_color,
};
use crate::core::error::AppError;
use crate::core::progress::{ProgressSink, WorkflowState};
use crate::core::providers::ai::{AiVendor, ChatMessage, CompletionRequest};
use crate::core::providers::scraper::{ScrapeOptions, ScrapeResult, ScraperApi};

use super::brand::{BrandElements, extract_brand};
use super::brief::{Brief, build_brief};
use super::templates::{CatalogCache, TemplateMatch, match_template};
use super::{StepId, StepRecord, WorkflowKind, WorkflowRun};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingOptions {
    /// Page slugs overriding the default set.
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default)]
    pub tone: Option<Tone>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OnboardingResult {
    pub run: WorkflowRun,
    pub template_match: Option<TemplateMatch>,
    pub deployment_context: Option<DeploymentContext>,
    pub content_context: Option<ContentContext>,
}

/// Structured analysis a vision/text model produces for a scraped site.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", default)]
struct SiteAnalysis {
    industry: Option<String>,
    tagline: Option<String>,
    services: Vec<String>,
    summary: Option<String>,
}

/// Derive a business name from a page title: the prefix before the first
/// separator token.
pub(super) fn business_name_from_title(title: &str) -> String {
    for separator in ["|", "—", "–", " - "] {
        if let Some((prefix, _)) = title.split_once(separator) {
            let trimmed = prefix.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    title.trim().to_string()
}

fn pages_from_option(pages: &Option<Vec<String>>) -> Vec<PageSpec> {
    match pages {
        Some(slugs) if !slugs.is_empty() => slugs
            .iter()
            .map(|slug| PageSpec {
                slug: slug.clone(),
                title: title_case(slug),
                sections: Vec::new(),
            })
            .collect(),
        _ => default_pages(),
    }
}

fn title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Two-variant onboarding: copy an existing site or build from a guided
/// interview. Both share the template-matching + context-building tail.
pub struct OnboardingEngine {
    scraper: Arc<dyn ScraperApi>,
    ai: Option<Arc<dyn AiVendor>>,
    model: String,
    catalog: Arc<CatalogCache>,
    default_favicon_url: String,
}

impl OnboardingEngine {
    pub fn new(
        scraper: Arc<dyn ScraperApi>,
        ai: Option<Arc<dyn AiVendor>>,
        model: String,
        catalog: Arc<CatalogCache>,
        default_favicon_url: String,
    ) -> Self {
        Self {
            scraper,
            ai,
            model,
            catalog,
            default_favicon_url,
        }
    }

    pub async fn run_copy(
        &self,
        url: &str,
        options: OnboardingOptions,
        sink: &ProgressSink,
    ) -> OnboardingResult {
        let mut run = WorkflowRun::with_params(
            WorkflowKind::DomainSiteCopy,
            serde_json::json!({ "url": url }),
        );

        let built = self.copy_inner(url, &options, sink, &mut run).await;
        self.finish(built, sink, run).await
    }

    pub async fn run_voice(
        &self,
        answers: &BTreeMap<String, String>,
        options: OnboardingOptions,
        sink: &ProgressSink,
    ) -> OnboardingResult {
        let mut run = WorkflowRun::with_params(
            WorkflowKind::DomainSiteVoice,
            serde_json::json!({ "answerCount": answers.len() }),
        );

        let built = self.voice_inner(answers, &options, sink, &mut run).await;
        self.finish(built, sink, run).await
    }

    async fn finish(
        &self,
        built: Result<(TemplateMatch, DeploymentContext, ContentContext), AppError>,
        sink: &ProgressSink,
        mut run: WorkflowRun,
    ) -> OnboardingResult {
        match built {
            Ok((template_match, deployment, content)) => {
                run.success = true;
                run.result = serde_json::json!({
                    "templateMatch": template_match,
                    "deploymentContext": deployment,
                    "contentContext": content,
                });
                sink.emit(WorkflowState::Complete, "Onboarding complete", run.result.clone())
                    .await;
                OnboardingResult {
                    run,
                    template_match: Some(template_match),
                    deployment_context: Some(deployment),
                    content_context: Some(content),
                }
            }
            Err(AppError::Canceled) => {
                run.record(StepRecord::failed(StepId::Cancelled, "caller disconnected"));
                run.fail("operation canceled by caller");
                OnboardingResult {
                    run,
                    template_match: None,
                    deployment_context: None,
                    content_context: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                run.fail(&message);
                sink.emit(
                    WorkflowState::Error,
                    &message,
                    serde_json::json!({ "error": message }),
                )
                .await;
                OnboardingResult {
                    run,
                    template_match: None,
                    deployment_context: None,
                    content_context: None,
                }
            }
        }
    }

    async fn copy_inner(
        &self,
        url: &str,
        options: &OnboardingOptions,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
    ) -> Result<(TemplateMatch, DeploymentContext, ContentContext), AppError> {
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        if url.trim().is_empty() {
            return Err(AppError::Validation("source URL is required".into()));
        }

        // ── scraping ──
        sink.emit(
            WorkflowState::Scraping,
            "Scraping source site",
            serde_json::json!({ "url": url }),
        )
        .await;
        let scrape = self
            .scraper
            .scrape(
                url,
                ScrapeOptions {
                    include_html: true,
                    include_screenshot: false,
                },
            )
            .await
            .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::SourceScraped,
            serde_json::json!({ "title": scrape.metadata.title }),
        ));

        // ── analyzing ──
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        sink.emit(
            WorkflowState::Analyzing,
            "Analyzing source content",
            serde_json::Value::Null,
        )
        .await;
        let analysis = self.analyze_site(&scrape).await;
        run.record(StepRecord::ok(
            StepId::SiteAnalyzed,
            serde_json::json!({ "industry": analysis.industry }),
        ));

        // ── extracting_brand ──
        sink.emit(
            WorkflowState::ExtractingBrand,
            "Extracting brand elements",
            serde_json::Value::Null,
        )
        .await;
        let brand = extract_brand(scrape.html.as_deref().unwrap_or(&scrape.markdown));
        run.record(StepRecord::ok(
            StepId::BrandExtracted,
            serde_json::json!({
                "palette": brand.palette,
                "logoFound": brand.logo_url.is_some(),
            }),
        ));

        // ── matching_template ──
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        sink.emit(
            WorkflowState::MatchingTemplate,
            "Matching template",
            serde_json::Value::Null,
        )
        .await;
        let catalog = self.catalog.get().await;
        let summary = analysis
            .summary
            .clone()
            .unwrap_or_else(|| scrape.markdown.chars().take(600).collect());
        let template_match = match_template(
            self.ai.as_deref(),
            &self.model,
            &summary,
            analysis.industry.as_deref(),
            &catalog,
        )
        .await;
        run.record(StepRecord::ok(
            StepId::TemplateMatched,
            serde_json::json!({ "slug": template_match.slug, "method": template_match.method }),
        ));

        // ── building_contexts ──
        sink.emit(
            WorkflowState::BuildingContexts,
            "Building deployment and content contexts",
            serde_json::Value::Null,
        )
        .await;
        let business_name = scrape
            .metadata
            .title
            .as_deref()
            .map(business_name_from_title)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "My Business".to_string());

        let business = BusinessInfo {
            name: business_name,
            tagline: analysis
                .tagline
                .clone()
                .or_else(|| scrape.metadata.description.clone()),
            industry: analysis.industry.clone(),
            services: analysis.services.clone(),
            ..Default::default()
        };

        let content = ContentContext {
            business,
            tone: options.tone.unwrap_or_default(),
            pages: pages_from_option(&options.pages),
            seo: SeoSpec {
                meta_title: scrape.metadata.title.clone().map(|t| truncate(&t, 60)),
                meta_description: scrape.metadata.description.clone().map(|d| truncate(&d, 160)),
                keywords: Vec::new(),
            },
            source_analysis: Some(
                serde_json::to_value(&analysis).unwrap_or(serde_json::Value::Null),
            ),
            ..Default::default()
        };

        let deployment =
            self.build_deployment(&template_match, &brand.palette, &brand, &scrape);
        run.record(StepRecord::ok(StepId::ContextsBuilt, serde_json::Value::Null));

        self.validate_contexts(sink, run, template_match, deployment, content)
            .await
    }

    async fn voice_inner(
        &self,
        answers: &BTreeMap<String, String>,
        options: &OnboardingOptions,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
    ) -> Result<(TemplateMatch, DeploymentContext, ContentContext), AppError> {
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        if answers.is_empty() {
            return Err(AppError::Validation("interview answers are required".into()));
        }

        // ── building_brief ──
        sink.emit(
            WorkflowState::BuildingBrief,
            "Structuring interview answers",
            serde_json::json!({ "answers": answers.len() }),
        )
        .await;
        let mut brief = build_brief(answers);
        if brief.business_name.is_empty() {
            brief.business_name = "My Business".to_string();
        }
        run.record(StepRecord::ok(
            StepId::BriefBuilt,
            serde_json::json!({ "businessName": brief.business_name }),
        ));

        // ── matching_template ──
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        sink.emit(
            WorkflowState::MatchingTemplate,
            "Matching template",
            serde_json::Value::Null,
        )
        .await;
        let catalog = self.catalog.get().await;
        let summary = brief_summary(&brief);
        let template_match = match_template(
            self.ai.as_deref(),
            &self.model,
            &summary,
            brief.industry.as_deref(),
            &catalog,
        )
        .await;
        run.record(StepRecord::ok(
            StepId::TemplateMatched,
            serde_json::json!({ "slug": template_match.slug, "method": template_match.method }),
        ));

        // ── building_contexts ──
        sink.emit(
            WorkflowState::BuildingContexts,
            "Building deployment and content contexts",
            serde_json::Value::Null,
        )
        .await;
        let content = ContentContext {
            business: BusinessInfo {
                name: brief.business_name.clone(),
                tagline: brief.tagline.clone(),
                industry: brief.industry.clone(),
                services: brief.services.clone(),
                target_audience: brief.target_audience.clone(),
                unique_selling_points: brief.unique_selling_points.clone(),
                location: brief.location.clone(),
                contact_info: brief.contact.clone(),
            },
            language: match brief.languages.split_first() {
                Some((primary, rest)) => crate::core::context::LanguageSpec {
                    primary: primary.clone(),
                    additional: rest.to_vec(),
                },
                None => Default::default(),
            },
            tone: options.tone.unwrap_or(brief.tone),
            pages: pages_from_option(&options.pages),
            seo: SeoSpec::default(),
            voice_interview: Some(
                serde_json::to_value(&brief).unwrap_or(serde_json::Value::Null),
            ),
            ..Default::default()
        };

        let mut colors = brief.colors.iter().filter(|c| is_valid_hex_color(c));
        let deployment = DeploymentContext {
            template: TemplateChoice {
                slug: template_match.slug.clone(),
                ..Default::default()
            },
            branding: Branding {
                primary_color: colors.next().cloned(),
                secondary_color: colors.next().cloned(),
                logo_url: None,
                favicon_url: Some(self.default_favicon_url.clone()),
            },
            ..Default::default()
        };
        run.record(StepRecord::ok(StepId::ContextsBuilt, serde_json::Value::Null));

        self.validate_contexts(sink, run, template_match, deployment, content)
            .await
    }

    /// Shared tail: validation aborts the run with the aggregated error
    /// list.
    async fn validate_contexts(
        &self,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
        template_match: TemplateMatch,
        deployment: DeploymentContext,
        content: ContentContext,
    ) -> Result<(TemplateMatch, DeploymentContext, ContentContext), AppError> {
        sink.emit(
            WorkflowState::ValidatingContexts,
            "Validating contexts",
            serde_json::Value::Null,
        )
        .await;

        let mut errors = Vec::new();
        if let Err(mut e) = deployment.validate() {
            errors.append(&mut e);
        }
        if let Err(mut e) = content.validate() {
            errors.append(&mut e);
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join("; ")));
        }

        run.record(StepRecord::ok(
            StepId::ContextsValidated,
            serde_json::Value::Null,
        ));
        Ok((template_match, deployment, content))
    }

    fn build_deployment(
        &self,
        template_match: &TemplateMatch,
        palette: &[String],
        brand: &BrandElements,
        scrape: &ScrapeResult,
    ) -> DeploymentContext {
        let mut colors = palette.iter().filter(|c| is_valid_hex_color(c));
        // Favicon must always resolve to something servable.
        let favicon = brand
            .favicon_url
            .clone()
            .or_else(|| scrape.metadata.favicon.clone())
            .unwrap_or_else(|| self.default_favicon_url.clone());

        DeploymentContext {
            template: TemplateChoice {
                slug: template_match.slug.clone(),
                ..Default::default()
            },
            branding: Branding {
                primary_color: colors.next().cloned(),
                secondary_color: colors.next().cloned(),
                logo_url: brand
                    .logo_url
                    .clone()
                    .or_else(|| scrape.metadata.og_image.clone()),
                favicon_url: Some(favicon),
            },
            ..Default::default()
        }
    }

    async fn analyze_site(&self, scrape: &ScrapeResult) -> SiteAnalysis {
        if let Some(vendor) = &self.ai {
            let excerpt: String = scrape.markdown.chars().take(4000).collect();
            let request = CompletionRequest {
                messages: vec![
                    ChatMessage::new(
                        "system",
                        "You analyze a scraped website and reply with JSON only: \
                         {\"industry\":\"...\",\"tagline\":\"...\",\"services\":[\"...\"],\"summary\":\"...\"}.",
                    ),
                    ChatMessage::new("user", excerpt),
                ],
                max_tokens: Some(512),
                temperature: Some(0.2),
            };
            match vendor.complete(&self.model, &request).await {
                Ok(completion) => {
                    let raw = strip_code_fences(&completion.content);
                    match serde_json::from_str::<SiteAnalysis>(raw) {
                        Ok(analysis) => return analysis,
                        Err(e) => warn!("unparseable site analysis: {e}"),
                    }
                }
                Err(e) => warn!("site analysis call failed: {e}"),
            }
        }

        // Heuristic analysis when no model is available.
        SiteAnalysis {
            industry: None,
            tagline: scrape.metadata.description.clone(),
            services: Vec::new(),
            summary: Some(scrape.markdown.chars().take(600).collect()),
        }
    }
}

fn brief_summary(brief: &Brief) -> String {
    format!(
        "{} ({}). Services: {}. Audience: {}. USPs: {}.",
        brief.business_name,
        brief.industry.as_deref().unwrap_or("unspecified industry"),
        brief.services.join(", "),
        brief.target_audience.as_deref().unwrap_or("unspecified"),
        brief.unique_selling_points.join(", "),
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_name_takes_title_prefix() {
        assert_eq!(
            business_name_from_title("Acme Plumbing | Trusted since 1998"),
            "Acme Plumbing"
        );
        assert_eq!(
            business_name_from_title("Beta Co — Home"),
            "Beta Co"
        );
        assert_eq!(business_name_from_title("Gamma Studio"), "Gamma Studio");
    }

    #[test]
    fn title_case_handles_hyphenated_slugs() {
        assert_eq!(title_case("our-services"), "Our Services");
        assert_eq!(title_case("home"), "Home");
    }

    #[test]
    fn truncate_respects_char_budget() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
    }

    #[test]
    fn brief_summary_is_single_line() {
        let brief = Brief {
            business_name: "Acme".into(),
            industry: Some("plumbing".into()),
            services: vec!["repairs".into()],
            ..Default::default()
        };
        let summary = brief_summary(&brief);
        assert!(summary.contains("Acme (plumbing)"));
        assert!(summary.contains("repairs"));
    }
}
