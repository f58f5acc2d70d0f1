use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::providers::ai::{AiVendor, ChatMessage, CompletionRequest};

const CATALOG_TTL: Duration = Duration::from_secs(3600);
const CATALOG_PATH: &str = "/wp-json/wts/v1/templates";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateCatalog {
    pub templates: Vec<TemplateDef>,
}

/// Served whenever the base-site endpoint is unreachable or returns junk.
pub fn fallback_catalog() -> TemplateCatalog {
    TemplateCatalog {
        templates: vec![TemplateDef {
            slug: "flexify".to_string(),
            name: "Flexify".to_string(),
            industries: vec!["general".to_string()],
            description: "Versatile multi-purpose starter".to_string(),
            skins: vec!["light".to_string(), "dark".to_string()],
        }],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateMatch {
    pub slug: String,
    pub confidence: f64,
    pub method: &'static str,
}

/// Process-scoped catalog cache: init at first use, 1 h TTL, one in-flight
/// refresh at a time (the refresh runs under the cache lock).
pub struct CatalogCache {
    base_site_url: String,
    client: reqwest::Client,
    state: Mutex<Option<(Instant, TemplateCatalog)>>,
}

impl CatalogCache {
    pub fn new(base_site_url: String) -> Self {
        Self {
            base_site_url,
            client: crate::core::providers::http_client(),
            state: Mutex::new(None),
        }
    }

    /// Tests and onboarding stubs inject a pre-seeded catalog.
    pub fn pre_seeded(catalog: TemplateCatalog) -> Self {
        Self {
            base_site_url: String::new(),
            client: crate::core::providers::http_client(),
            state: Mutex::new(Some((Instant::now(), catalog))),
        }
    }

    pub async fn get(&self) -> TemplateCatalog {
        let mut state = self.state.lock().await;
        if let Some((fetched_at, catalog)) = state.as_ref()
            && fetched_at.elapsed() < CATALOG_TTL
        {
            return catalog.clone();
        }

        let catalog = match self.fetch().await {
            Ok(catalog) if !catalog.templates.is_empty() => {
                info!(templates = catalog.templates.len(), "template catalog refreshed");
                catalog
            }
            Ok(_) => {
                warn!("template catalog endpoint returned an empty list, using fallback");
                fallback_catalog()
            }
            Err(e) => {
                warn!("template catalog fetch failed ({e}), using fallback");
                fallback_catalog()
            }
        };

        *state = Some((Instant::now(), catalog.clone()));
        catalog
    }

    async fn fetch(&self) -> anyhow::Result<TemplateCatalog> {
        if self.base_site_url.is_empty() {
            anyhow::bail!("no base site configured");
        }
        let url = format!("{}{}", self.base_site_url.trim_end_matches('/'), CATALOG_PATH);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            anyhow::bail!("catalog endpoint returned {}", res.status());
        }
        Ok(res.json().await?)
    }
}

#[derive(Deserialize)]
struct AiScore {
    slug: String,
    #[serde(default)]
    confidence: f64,
}

fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

fn industry_matches(template: &TemplateDef, industry: &str) -> bool {
    let needle = industry.to_lowercase();
    template
        .industries
        .iter()
        .any(|i| i.to_lowercase().contains(&needle) || needle.contains(&i.to_lowercase()))
}

/// Pick the highest-confidence scored candidate that exists in the catalog.
/// Confidence ties break toward the candidate whose industries cover the
/// brief's industry token.
fn pick_best(
    scores: &[AiScore],
    catalog: &TemplateCatalog,
    industry: Option<&str>,
) -> Option<TemplateMatch> {
    let mut best: Option<(&AiScore, &TemplateDef)> = None;
    for score in scores {
        let Some(template) = catalog.templates.iter().find(|t| t.slug == score.slug) else {
            continue;
        };
        best = match best {
            None => Some((score, template)),
            Some((current, current_t)) => {
                if score.confidence > current.confidence {
                    Some((score, template))
                } else if score.confidence == current.confidence {
                    let current_hits = industry
                        .map(|i| industry_matches(current_t, i))
                        .unwrap_or(false);
                    let candidate_hits = industry
                        .map(|i| industry_matches(template, i))
                        .unwrap_or(false);
                    if candidate_hits && !current_hits {
                        Some((score, template))
                    } else {
                        Some((current, current_t))
                    }
                } else {
                    Some((current, current_t))
                }
            }
        };
    }
    best.map(|(score, template)| TemplateMatch {
        slug: template.slug.clone(),
        confidence: score.confidence,
        method: "ai",
    })
}

/// Keyword fallback: first template whose industries cover the token.
fn keyword_match(catalog: &TemplateCatalog, industry: Option<&str>) -> Option<TemplateMatch> {
    let industry = industry?;
    catalog
        .templates
        .iter()
        .find(|t| industry_matches(t, industry))
        .map(|t| TemplateMatch {
            slug: t.slug.clone(),
            confidence: 0.5,
            method: "keyword",
        })
}

fn default_match(catalog: &TemplateCatalog) -> TemplateMatch {
    let slug = catalog
        .templates
        .first()
        .map(|t| t.slug.clone())
        .unwrap_or_else(|| "flexify".to_string());
    TemplateMatch {
        slug,
        confidence: 0.0,
        method: "default",
    }
}

/// Match a template for the described business: AI scoring first, keyword
/// matching on industry second, catalog default last.
pub async fn match_template(
    ai: Option<&dyn AiVendor>,
    model: &str,
    summary: &str,
    industry: Option<&str>,
    catalog: &TemplateCatalog,
) -> TemplateMatch {
    if let Some(vendor) = ai {
        let menu: Vec<String> = catalog
            .templates
            .iter()
            .map(|t| format!("- {} ({}): {}", t.slug, t.industries.join("/"), t.description))
            .collect();
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::new(
                    "system",
                    "You score website templates against a business description. \
                     Reply with JSON only: [{\"slug\":\"...\",\"confidence\":0.0-1.0}].",
                ),
                ChatMessage::new(
                    "user",
                    format!("Business:\n{summary}\n\nTemplates:\n{}", menu.join("\n")),
                ),
            ],
            max_tokens: Some(512),
            temperature: Some(0.2),
        };

        match vendor.complete(model, &request).await {
            Ok(completion) => {
                let raw = strip_code_fences(&completion.content);
                match serde_json::from_str::<Vec<AiScore>>(raw) {
                    Ok(scores) => {
                        if let Some(matched) = pick_best(&scores, catalog, industry) {
                            return matched;
                        }
                        warn!("model scored no known template slugs");
                    }
                    Err(e) => warn!("unparseable template scores: {e}"),
                }
            }
            Err(e) => warn!("template scoring call failed: {e}"),
        }
    }

    keyword_match(catalog, industry).unwrap_or_else(|| default_match(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TemplateCatalog {
        TemplateCatalog {
            templates: vec![
                TemplateDef {
                    slug: "flexify".into(),
                    name: "Flexify".into(),
                    industries: vec!["general".into()],
                    description: "general".into(),
                    skins: vec![],
                },
                TemplateDef {
                    slug: "tradecraft".into(),
                    name: "Tradecraft".into(),
                    industries: vec!["plumbing".into(), "construction".into()],
                    description: "trades".into(),
                    skins: vec![],
                },
            ],
        }
    }

    #[test]
    fn highest_confidence_wins() {
        let scores = vec![
            AiScore { slug: "flexify".into(), confidence: 0.4 },
            AiScore { slug: "tradecraft".into(), confidence: 0.9 },
        ];
        let matched = pick_best(&scores, &catalog(), None).unwrap();
        assert_eq!(matched.slug, "tradecraft");
    }

    #[test]
    fn confidence_tie_breaks_toward_industry_hit() {
        let scores = vec![
            AiScore { slug: "flexify".into(), confidence: 0.7 },
            AiScore { slug: "tradecraft".into(), confidence: 0.7 },
        ];
        let matched = pick_best(&scores, &catalog(), Some("Plumbing")).unwrap();
        assert_eq!(matched.slug, "tradecraft");
    }

    #[test]
    fn unknown_slugs_are_ignored() {
        let scores = vec![AiScore { slug: "ghost".into(), confidence: 1.0 }];
        assert!(pick_best(&scores, &catalog(), None).is_none());
    }

    #[test]
    fn keyword_fallback_matches_industry_substring() {
        let matched = keyword_match(&catalog(), Some("construction")).unwrap();
        assert_eq!(matched.slug, "tradecraft");
        assert_eq!(matched.method, "keyword");
    }

    #[test]
    fn default_match_takes_first_catalog_entry() {
        let matched = default_match(&catalog());
        assert_eq!(matched.slug, "flexify");
        assert_eq!(matched.method, "default");
    }

    #[test]
    fn fallback_catalog_is_single_flexify_entry() {
        let catalog = fallback_catalog();
        assert_eq!(catalog.templates.len(), 1);
        assert_eq!(catalog.templates[0].slug, "flexify");
    }

    #[tokio::test]
    async fn pre_seeded_cache_serves_without_fetching() {
        let cache = CatalogCache::pre_seeded(catalog());
        let served = cache.get().await;
        assert_eq!(served.templates.len(), 2);
    }

    #[tokio::test]
    async fn empty_base_url_serves_fallback() {
        let cache = CatalogCache::new(String::new());
        let served = cache.get().await;
        assert_eq!(served.templates[0].slug, "flexify");
    }

    #[tokio::test]
    async fn ai_miss_falls_back_to_keyword_then_default() {
        let matched = match_template(None, "gpt-4o-mini", "a plumbing firm", Some("plumbing"), &catalog()).await;
        assert_eq!(matched.slug, "tradecraft");
        let matched = match_template(None, "gpt-4o-mini", "a bakery", Some("bakery"), &catalog()).await;
        assert_eq!(matched.slug, "flexify");
        assert_eq!(matched.method, "default");
    }
}
