use serde::Deserialize;
use tracing::warn;

use crate::core::context::{ContentContext, PageSpec};
use crate::core::providers::ai::{AiVendor, ChatMessage, CompletionRequest};

/// Known section taxonomy for AI-structured page content. Unknown types
/// degrade to `Generic` rather than dropping the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Hero,
    Features,
    About,
    Services,
    Contact,
    Testimonials,
    Cta,
    Generic,
}

impl SectionKind {
    fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "hero" => SectionKind::Hero,
            "features" => SectionKind::Features,
            "about" => SectionKind::About,
            "services" => SectionKind::Services,
            "contact" => SectionKind::Contact,
            "testimonials" => SectionKind::Testimonials,
            "cta" | "call_to_action" => SectionKind::Cta,
            _ => SectionKind::Generic,
        }
    }

    fn css_class(self) -> &'static str {
        match self {
            SectionKind::Hero => "hero",
            SectionKind::Features => "features",
            SectionKind::About => "about",
            SectionKind::Services => "services",
            SectionKind::Contact => "contact",
            SectionKind::Testimonials => "testimonials",
            SectionKind::Cta => "cta",
            SectionKind::Generic => "content",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedPage {
    pub slug: String,
    pub title: String,
    pub html: String,
}

#[derive(Deserialize)]
struct AiPagePayload {
    #[serde(default)]
    sections: Vec<AiSection>,
}

#[derive(Deserialize)]
struct AiSection {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    heading: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    items: Vec<String>,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Serialise structured sections into the HTML block form the site theme
/// understands.
fn sections_to_html(sections: &[AiSection]) -> String {
    let mut html = String::new();
    for section in sections {
        let kind = SectionKind::from_tag(&section.kind);
        html.push_str(&format!("<section class=\"wts-{}\">\n", kind.css_class()));
        if let Some(heading) = &section.heading {
            let tag = if kind == SectionKind::Hero { "h1" } else { "h2" };
            html.push_str(&format!("<{tag}>{}</{tag}>\n", escape_html(heading)));
        }
        if let Some(body) = &section.body {
            html.push_str(&format!("<p>{}</p>\n", escape_html(body)));
        }
        if !section.items.is_empty() {
            html.push_str("<ul>\n");
            for item in &section.items {
                html.push_str(&format!("<li>{}</li>\n", escape_html(item)));
            }
            html.push_str("</ul>\n");
        }
        html.push_str("</section>\n");
    }
    html
}

/// Model replies often wrap JSON in a fenced code block.
fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

fn content_prompt(context: &ContentContext, page: &PageSpec) -> String {
    let business = &context.business;
    format!(
        "Write website copy for the \"{}\" page of {business_name}.\n\
         Industry: {industry}. Tone: {tone}. Services: {services}.\n\
         Target audience: {audience}.\n\
         Respond with a single JSON object: {{\"sections\":[{{\"type\":\"hero|features|about|services|contact|testimonials|cta\",\
         \"heading\":\"...\",\"body\":\"...\",\"items\":[\"...\"]}}]}}.\n\
         No prose outside the JSON.",
        page.title,
        business_name = business.name,
        industry = business.industry.as_deref().unwrap_or("general"),
        tone = context.tone.as_str(),
        services = business.services.join(", "),
        audience = business.target_audience.as_deref().unwrap_or("local customers"),
    )
}

/// Generate one page with the text model; any failure (call, parse, empty
/// reply) falls back to the fixed per-slug template.
pub async fn generate_page(
    ai: Option<&dyn AiVendor>,
    model: &str,
    context: &ContentContext,
    page: &PageSpec,
) -> GeneratedPage {
    if let Some(vendor) = ai {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::new(
                    "system",
                    "You are a copywriter producing structured website content as JSON.",
                ),
                ChatMessage::new("user", content_prompt(context, page)),
            ],
            max_tokens: Some(2048),
            temperature: Some(0.7),
        };
        match vendor.complete(model, &request).await {
            Ok(completion) => {
                let raw = strip_code_fences(&completion.content);
                match serde_json::from_str::<AiPagePayload>(raw) {
                    Ok(payload) if !payload.sections.is_empty() => {
                        return GeneratedPage {
                            slug: page.slug.clone(),
                            title: page.title.clone(),
                            html: sections_to_html(&payload.sections),
                        };
                    }
                    Ok(_) => warn!(slug = %page.slug, "model returned no sections, using template"),
                    Err(e) => warn!(slug = %page.slug, "unparseable model content: {e}"),
                }
            }
            Err(e) => warn!(slug = %page.slug, "content generation failed: {e}"),
        }
    }

    fallback_page(context, page)
}

/// Fixed per-slug template used when AI generation is unavailable or fails.
pub fn fallback_page(context: &ContentContext, page: &PageSpec) -> GeneratedPage {
    let business = &context.business;
    let name = escape_html(&business.name);
    let tagline = business
        .tagline
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| format!("Welcome to {name}"));

    let html = match page.slug.as_str() {
        "home" => format!(
            "<section class=\"wts-hero\">\n<h1>{name}</h1>\n<p>{tagline}</p>\n</section>\n\
             <section class=\"wts-services\">\n<h2>What we do</h2>\n{}\n</section>\n",
            services_list(&business.services)
        ),
        "about" => format!(
            "<section class=\"wts-about\">\n<h2>About {name}</h2>\n<p>{}</p>\n</section>\n",
            business
                .location
                .as_deref()
                .map(|l| format!("{tagline} Based in {}.", escape_html(l)))
                .unwrap_or(tagline.clone())
        ),
        "services" => format!(
            "<section class=\"wts-services\">\n<h2>Our services</h2>\n{}\n</section>\n",
            services_list(&business.services)
        ),
        "contact" => {
            let contact = &business.contact_info;
            let mut lines = Vec::new();
            if let Some(phone) = &contact.phone {
                lines.push(format!("<li>Phone: {}</li>", escape_html(phone)));
            }
            if let Some(email) = &contact.email {
                lines.push(format!("<li>Email: {}</li>", escape_html(email)));
            }
            if let Some(address) = &contact.address {
                lines.push(format!("<li>Address: {}</li>", escape_html(address)));
            }
            format!(
                "<section class=\"wts-contact\">\n<h2>Contact {name}</h2>\n<ul>\n{}\n</ul>\n</section>\n",
                lines.join("\n")
            )
        }
        "blog" => format!(
            "<section class=\"wts-content\">\n<h2>News from {name}</h2>\n<p>Updates and stories coming soon.</p>\n</section>\n"
        ),
        _ => format!(
            "<section class=\"wts-content\">\n<h2>{}</h2>\n<p>{tagline}</p>\n</section>\n",
            escape_html(&page.title)
        ),
    };

    GeneratedPage {
        slug: page.slug.clone(),
        title: page.title.clone(),
        html,
    }
}

fn services_list(services: &[String]) -> String {
    if services.is_empty() {
        return "<p>Get in touch to learn what we can do for you.</p>".to_string();
    }
    let items: Vec<String> = services
        .iter()
        .map(|s| format!("<li>{}</li>", escape_html(s)))
        .collect();
    format!("<ul>\n{}\n</ul>", items.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::BusinessInfo;

    fn context() -> ContentContext {
        ContentContext {
            business: BusinessInfo {
                name: "Acme Plumbing".into(),
                tagline: Some("Pipes done right".into()),
                services: vec!["Repairs".into(), "Installations".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn page(slug: &str, title: &str) -> PageSpec {
        PageSpec {
            slug: slug.into(),
            title: title.into(),
            sections: vec![],
        }
    }

    #[test]
    fn unknown_section_type_degrades_to_generic() {
        assert_eq!(SectionKind::from_tag("sparkles"), SectionKind::Generic);
        assert_eq!(SectionKind::from_tag("HERO"), SectionKind::Hero);
    }

    #[test]
    fn sections_serialize_to_classed_html() {
        let sections = vec![AiSection {
            kind: "hero".into(),
            heading: Some("Hello".into()),
            body: Some("World".into()),
            items: vec!["a".into()],
        }];
        let html = sections_to_html(&sections);
        assert!(html.contains("class=\"wts-hero\""));
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<li>a</li>"));
    }

    #[test]
    fn html_is_escaped_in_generated_sections() {
        let sections = vec![AiSection {
            kind: "about".into(),
            heading: Some("<script>".into()),
            body: None,
            items: vec![],
        }];
        let html = sections_to_html(&sections);
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn code_fences_are_stripped_before_parse() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn fallback_home_page_uses_hero_and_services() {
        let generated = fallback_page(&context(), &page("home", "Home"));
        assert!(generated.html.contains("wts-hero"));
        assert!(generated.html.contains("Acme Plumbing"));
        assert!(generated.html.contains("<li>Repairs</li>"));
    }

    #[test]
    fn fallback_contact_page_lists_known_channels() {
        let mut ctx = context();
        ctx.business.contact_info.email = Some("hi@acme.example".into());
        let generated = fallback_page(&ctx, &page("contact", "Contact"));
        assert!(generated.html.contains("Email: hi@acme.example"));
    }

    #[test]
    fn fallback_unknown_slug_uses_generic_section() {
        let generated = fallback_page(&context(), &page("pricing", "Pricing"));
        assert!(generated.html.contains("wts-content"));
        assert!(generated.html.contains("<h2>Pricing</h2>"));
    }

    #[tokio::test]
    async fn generation_without_vendor_uses_fallback() {
        let generated = generate_page(None, "gpt-4o-mini", &context(), &page("home", "Home")).await;
        assert!(generated.html.contains("wts-hero"));
    }
}
