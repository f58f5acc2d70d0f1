use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::context::{ContactInfo, Tone};

static LIST_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,;]").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?[0-9][0-9 ().\-]{6,}[0-9]").unwrap());

/// Normalised interview output used to build a Content Context.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    pub business_name: String,
    pub tagline: Option<String>,
    pub industry: Option<String>,
    pub services: Vec<String>,
    pub target_audience: Option<String>,
    pub unique_selling_points: Vec<String>,
    pub contact: ContactInfo,
    pub team: Vec<String>,
    pub location: Option<String>,
    pub languages: Vec<String>,
    pub tone: Tone,
    /// Brand colors as answered, in preference order; validated later.
    pub colors: Vec<String>,
}

fn answer<'a>(answers: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| answers.get(*k))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Split a free-text enumeration on commas and semicolons.
pub fn split_list(raw: &str) -> Vec<String> {
    LIST_SPLIT_RE
        .split(raw)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_tone(raw: &str) -> Tone {
    let lower = raw.to_lowercase();
    if lower.contains("friendly") {
        Tone::Friendly
    } else if lower.contains("casual") {
        Tone::Casual
    } else if lower.contains("formal") {
        Tone::Formal
    } else {
        Tone::Professional
    }
}

/// Process interview answers into a structured brief. Recognised question
/// ids have aliases because the interview UI evolved; unknown ids are
/// ignored.
pub fn build_brief(answers: &BTreeMap<String, String>) -> Brief {
    let contact_raw = answer(answers, &["contact", "contact_info", "contact_details"]);

    let email = answer(answers, &["contact_email", "email"])
        .map(str::to_string)
        .or_else(|| {
            contact_raw.and_then(|raw| EMAIL_RE.find(raw).map(|m| m.as_str().to_string()))
        });
    let phone = answer(answers, &["contact_phone", "phone"])
        .map(str::to_string)
        .or_else(|| {
            contact_raw.and_then(|raw| PHONE_RE.find(raw).map(|m| m.as_str().to_string()))
        });
    let address = answer(answers, &["contact_address", "address"]).map(str::to_string);

    Brief {
        business_name: answer(answers, &["business_name", "company_name", "name"])
            .unwrap_or("")
            .to_string(),
        tagline: answer(answers, &["tagline", "slogan"]).map(str::to_string),
        industry: answer(answers, &["industry", "business_type"]).map(str::to_string),
        services: answer(answers, &["services", "offerings", "products"])
            .map(split_list)
            .unwrap_or_default(),
        target_audience: answer(answers, &["target_audience", "audience", "customers"])
            .map(str::to_string),
        unique_selling_points: answer(answers, &["unique_selling_points", "usps", "strengths"])
            .map(split_list)
            .unwrap_or_default(),
        contact: ContactInfo {
            phone,
            email,
            address,
        },
        team: answer(answers, &["team", "team_members"])
            .map(split_list)
            .unwrap_or_default(),
        location: answer(answers, &["location", "city", "area"]).map(str::to_string),
        languages: answer(answers, &["languages", "language"])
            .map(split_list)
            .unwrap_or_default(),
        tone: answer(answers, &["tone", "style"])
            .map(parse_tone)
            .unwrap_or_default(),
        colors: answer(answers, &["brand_colors", "colors"])
            .map(split_list)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn splits_services_on_commas_and_semicolons() {
        assert_eq!(
            split_list("plumbing, heating; gas safety checks"),
            vec!["plumbing", "heating", "gas safety checks"]
        );
    }

    #[test]
    fn split_list_drops_empty_segments() {
        assert_eq!(split_list("a,, b;"), vec!["a", "b"]);
    }

    #[test]
    fn builds_brief_from_canonical_question_ids() {
        let brief = build_brief(&answers(&[
            ("business_name", "Acme Plumbing"),
            ("industry", "plumbing"),
            ("services", "repairs, installations"),
            ("target_audience", "homeowners"),
            ("unique_selling_points", "24/7; fixed pricing"),
            ("location", "Springfield"),
            ("tone", "friendly and warm"),
        ]));
        assert_eq!(brief.business_name, "Acme Plumbing");
        assert_eq!(brief.services, vec!["repairs", "installations"]);
        assert_eq!(brief.unique_selling_points, vec!["24/7", "fixed pricing"]);
        assert_eq!(brief.tone, Tone::Friendly);
        assert_eq!(brief.location.as_deref(), Some("Springfield"));
    }

    #[test]
    fn contact_details_are_extracted_from_free_text() {
        let brief = build_brief(&answers(&[(
            "contact",
            "Call +1 (555) 010-2233 or write to hello@acme.example",
        )]));
        assert_eq!(brief.contact.email.as_deref(), Some("hello@acme.example"));
        assert!(brief.contact.phone.as_deref().unwrap().contains("555"));
    }

    #[test]
    fn alias_question_ids_are_recognised() {
        let brief = build_brief(&answers(&[("company_name", "Beta LLC")]));
        assert_eq!(brief.business_name, "Beta LLC");
    }

    #[test]
    fn tone_defaults_to_professional() {
        let brief = build_brief(&answers(&[("tone", "serious business")]));
        assert_eq!(brief.tone, Tone::Professional);
        let brief = build_brief(&answers(&[]));
        assert_eq!(brief.tone, Tone::Professional);
    }
}
