use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static HEX_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

pub fn is_valid_hex_color(value: &str) -> bool {
    HEX_COLOR_RE.is_match(value)
}

// ── Deployment context ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateChoice {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub slug: String,
    #[serde(default)]
    pub activate: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoContent {
    #[serde(default)]
    pub import: bool,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub content_slots: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

/// Structured spec of template + branding + plugins driving host
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentContext {
    pub template: TemplateChoice,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub demo_content: DemoContent,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub features: Vec<String>,
}

impl DeploymentContext {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.template.slug.trim().is_empty() {
            errors.push("template.slug must not be empty".to_string());
        }
        for (field, value) in [
            ("branding.primaryColor", &self.branding.primary_color),
            ("branding.secondaryColor", &self.branding.secondary_color),
        ] {
            if let Some(color) = value
                && !is_valid_hex_color(color)
            {
                errors.push(format!("{field} must match #RRGGBB, got {color:?}"));
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Overlay merge: `overlay`'s populated fields win, collections are merged
/// with overlay entries replacing base entries of the same key. Merging a
/// context onto itself is the identity.
pub fn merge_deployment_contexts(
    base: &DeploymentContext,
    overlay: &DeploymentContext,
) -> DeploymentContext {
    let mut plugins = base.plugins.clone();
    for plugin in &overlay.plugins {
        match plugins.iter_mut().find(|p| p.slug == plugin.slug) {
            Some(existing) => *existing = plugin.clone(),
            None => plugins.push(plugin.clone()),
        }
    }

    let mut features = base.features.clone();
    for feature in &overlay.features {
        if !features.contains(feature) {
            features.push(feature.clone());
        }
    }

    let mut content_slots = base.demo_content.content_slots.clone();
    content_slots.extend(
        overlay
            .demo_content
            .content_slots
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    let mut pages = base.demo_content.pages.clone();
    for page in &overlay.demo_content.pages {
        if !pages.contains(page) {
            pages.push(page.clone());
        }
    }

    DeploymentContext {
        template: TemplateChoice {
            slug: if overlay.template.slug.is_empty() {
                base.template.slug.clone()
            } else {
                overlay.template.slug.clone()
            },
            skin: overlay.template.skin.clone().or_else(|| base.template.skin.clone()),
            variation: overlay
                .template
                .variation
                .clone()
                .or_else(|| base.template.variation.clone()),
        },
        plugins,
        demo_content: DemoContent {
            import: base.demo_content.import || overlay.demo_content.import,
            pages,
            content_slots,
        },
        branding: Branding {
            primary_color: overlay
                .branding
                .primary_color
                .clone()
                .or_else(|| base.branding.primary_color.clone()),
            secondary_color: overlay
                .branding
                .secondary_color
                .clone()
                .or_else(|| base.branding.secondary_color.clone()),
            logo_url: overlay
                .branding
                .logo_url
                .clone()
                .or_else(|| base.branding.logo_url.clone()),
            favicon_url: overlay
                .branding
                .favicon_url
                .clone()
                .or_else(|| base.branding.favicon_url.clone()),
        },
        features,
    }
}

// ── Content context ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Casual,
    Formal,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
            Tone::Casual => "casual",
            Tone::Formal => "formal",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub unique_selling_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub contact_info: ContactInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageSpec {
    pub primary: String,
    #[serde(default)]
    pub additional: Vec<String>,
}

impl Default for LanguageSpec {
    fn default() -> Self {
        Self {
            primary: "en".to_string(),
            additional: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpec {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Structured spec of business info + pages + tone + SEO driving content
/// generation. Exactly one of `source_analysis` / `voice_interview` is set
/// depending on the onboarding variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentContext {
    pub business: BusinessInfo,
    #[serde(default)]
    pub language: LanguageSpec,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub pages: Vec<PageSpec>,
    #[serde(default)]
    pub seo: SeoSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_analysis: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_interview: Option<serde_json::Value>,
}

impl ContentContext {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.business.name.trim().is_empty() {
            errors.push("business.name is required".to_string());
        }
        for page in &self.pages {
            if page.slug.trim().is_empty() {
                errors.push(format!("page {:?} is missing a slug", page.title));
            }
            if page.title.trim().is_empty() {
                errors.push(format!("page {:?} is missing a title", page.slug));
            }
        }
        if let Some(title) = &self.seo.meta_title
            && title.chars().count() > 60
        {
            errors.push("seo.metaTitle exceeds 60 characters".to_string());
        }
        if let Some(desc) = &self.seo.meta_description
            && desc.chars().count() > 160
        {
            errors.push("seo.metaDescription exceeds 160 characters".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Default page set when neither scrape nor brief supplies one.
pub fn default_pages() -> Vec<PageSpec> {
    [
        ("home", "Home"),
        ("about", "About"),
        ("services", "Services"),
        ("contact", "Contact"),
        ("blog", "Blog"),
    ]
    .into_iter()
    .map(|(slug, title)| PageSpec {
        slug: slug.to_string(),
        title: title.to_string(),
        sections: Vec::new(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_deployment() -> DeploymentContext {
        DeploymentContext {
            template: TemplateChoice {
                slug: "flexify".into(),
                skin: Some("dark".into()),
                variation: None,
            },
            plugins: vec![PluginSpec {
                slug: "seo-toolkit".into(),
                activate: true,
                config: serde_json::Value::Null,
            }],
            demo_content: DemoContent::default(),
            branding: Branding {
                primary_color: Some("#1A2B3C".into()),
                secondary_color: None,
                logo_url: None,
                favicon_url: Some("https://cdn.example/fav.png".into()),
            },
            features: vec!["contact-form".into()],
        }
    }

    #[test]
    fn hex_color_validation() {
        assert!(is_valid_hex_color("#1A2B3C"));
        assert!(is_valid_hex_color("#abcdef"));
        assert!(!is_valid_hex_color("1A2B3C"));
        assert!(!is_valid_hex_color("#1A2B3"));
        assert!(!is_valid_hex_color("#1A2B3G"));
        assert!(!is_valid_hex_color("#1A2B3C00"));
    }

    #[test]
    fn deployment_requires_template_slug() {
        let mut ctx = valid_deployment();
        ctx.template.slug = "".into();
        let errors = ctx.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("template.slug")));
    }

    #[test]
    fn deployment_rejects_malformed_colors() {
        let mut ctx = valid_deployment();
        ctx.branding.primary_color = Some("blue".into());
        let errors = ctx.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("primaryColor")));
    }

    #[test]
    fn merge_with_self_is_identity() {
        let ctx = valid_deployment();
        assert_eq!(merge_deployment_contexts(&ctx, &ctx), ctx);
    }

    #[test]
    fn merge_overlay_fields_win() {
        let base = valid_deployment();
        let mut overlay = valid_deployment();
        overlay.branding.primary_color = Some("#FF0000".into());
        overlay.plugins[0].activate = false;
        let merged = merge_deployment_contexts(&base, &overlay);
        assert_eq!(merged.branding.primary_color.as_deref(), Some("#FF0000"));
        assert!(!merged.plugins[0].activate);
        assert_eq!(merged.plugins.len(), 1);
    }

    #[test]
    fn merge_unions_features_without_duplicates() {
        let base = valid_deployment();
        let mut overlay = valid_deployment();
        overlay.features = vec!["contact-form".into(), "newsletter".into()];
        let merged = merge_deployment_contexts(&base, &overlay);
        assert_eq!(merged.features, vec!["contact-form", "newsletter"]);
    }

    #[test]
    fn content_requires_business_name() {
        let ctx = ContentContext::default();
        let errors = ctx.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("business.name")));
    }

    #[test]
    fn content_enforces_seo_length_limits() {
        let ctx = ContentContext {
            business: BusinessInfo {
                name: "Acme".into(),
                ..Default::default()
            },
            seo: SeoSpec {
                meta_title: Some("x".repeat(61)),
                meta_description: Some("y".repeat(161)),
                keywords: vec![],
            },
            ..Default::default()
        };
        let errors = ctx.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn default_pages_cover_the_standard_five() {
        let slugs: Vec<String> = default_pages().into_iter().map(|p| p.slug).collect();
        assert_eq!(slugs, vec!["home", "about", "services", "contact", "blog"]);
    }

    #[test]
    fn context_json_uses_camel_case() {
        let ctx = valid_deployment();
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json["branding"].get("primaryColor").is_some());
        assert!(json.get("demoContent").is_some());
    }
}
