use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static LOGO_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img[^>]*?(?:class|id|alt|src)\s*=\s*["'][^"']*logo[^"']*["'][^>]*>"#)
        .unwrap()
});
static SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)src\s*=\s*["']([^"']+)["']"#).unwrap());
static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([0-9A-Fa-f]{6}|[0-9A-Fa-f]{3})\b").unwrap());
static NAV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<nav[^>]*>(.*?)</nav>").unwrap());
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
});
static ICON_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\s+[^>]*rel\s*=\s*["'][^"']*icon[^"']*["'][^>]*href\s*=\s*["']([^"']+)["']"#)
        .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct NavLink {
    pub label: String,
    pub href: String,
}

/// Brand elements pattern-matched out of a scraped page.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BrandElements {
    pub logo_url: Option<String>,
    /// Most frequent page colors, `#RRGGBB` uppercase, pure white/black
    /// excluded.
    pub palette: Vec<String>,
    pub nav_links: Vec<NavLink>,
    pub social_links: Vec<String>,
    pub favicon_url: Option<String>,
}

/// Expand shorthand `#abc` to `#AABBCC`; pass 6-digit forms through
/// uppercased.
fn normalize_hex(raw: &str) -> String {
    let hex = raw.trim_start_matches('#');
    let expanded: String = if hex.len() == 3 {
        hex.chars().flat_map(|c| [c, c]).collect()
    } else {
        hex.to_string()
    };
    format!("#{}", expanded.to_uppercase())
}

fn is_neutral(color: &str) -> bool {
    color == "#FFFFFF" || color == "#000000"
}

pub fn extract_brand(html: &str) -> BrandElements {
    let logo_url = LOGO_IMG_RE
        .find(html)
        .and_then(|m| SRC_RE.captures(m.as_str()))
        .map(|c| c[1].to_string());

    // Frequency-ranked palette from every inline hex occurrence.
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for caps in HEX_RE.captures_iter(html) {
        let color = normalize_hex(&caps[0]);
        if !is_neutral(&color) {
            *counts.entry(color).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let palette: Vec<String> = ranked.into_iter().take(5).map(|(c, _)| c).collect();

    let mut nav_links = Vec::new();
    for nav in NAV_RE.captures_iter(html) {
        for anchor in ANCHOR_RE.captures_iter(&nav[1]) {
            let label = TAG_RE.replace_all(&anchor[2], "").trim().to_string();
            if !label.is_empty() {
                nav_links.push(NavLink {
                    label,
                    href: anchor[1].to_string(),
                });
            }
        }
    }

    let mut social_links = Vec::new();
    for anchor in ANCHOR_RE.captures_iter(html) {
        let href = anchor[1].to_string();
        if SOCIAL_HOSTS.iter().any(|h| href.contains(h)) && !social_links.contains(&href) {
            social_links.push(href);
        }
    }

    let favicon_url = ICON_LINK_RE.captures(html).map(|c| c[1].to_string());

    BrandElements {
        logo_url,
        palette,
        nav_links,
        social_links,
        favicon_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><head>
        <link rel="icon" href="/favicon.ico">
        <style>.btn { background: #1a73e8; } .btn:hover { background: #1a73e8; } h1 { color: #333a40; } body { background: #ffffff; color: #000; }</style>
      </head><body>
        <header><img class="site-logo" src="/img/logo.svg" alt="Acme logo"></header>
        <nav><a href="/">Home</a><a href="/about"><span>About</span></a></nav>
        <footer>
          <a href="https://facebook.com/acme">Facebook</a>
          <a href="https://instagram.com/acme">Instagram</a>
          <a href="https://acme.example/terms">Terms</a>
        </footer>
      </body></html>"#;

    #[test]
    fn finds_logo_by_class_hint() {
        let brand = extract_brand(SAMPLE);
        assert_eq!(brand.logo_url.as_deref(), Some("/img/logo.svg"));
    }

    #[test]
    fn palette_excludes_pure_white_and_black() {
        let brand = extract_brand(SAMPLE);
        assert!(brand.palette.contains(&"#1A73E8".to_string()));
        assert!(!brand.palette.contains(&"#FFFFFF".to_string()));
        assert!(!brand.palette.contains(&"#000000".to_string()));
    }

    #[test]
    fn palette_orders_by_frequency() {
        let brand = extract_brand(SAMPLE);
        assert_eq!(brand.palette.first().map(String::as_str), Some("#1A73E8"));
    }

    #[test]
    fn shorthand_hex_expands() {
        assert_eq!(normalize_hex("#abc"), "#AABBCC");
        assert_eq!(normalize_hex("#1a2b3c"), "#1A2B3C");
    }

    #[test]
    fn nav_links_strip_inner_markup() {
        let brand = extract_brand(SAMPLE);
        let labels: Vec<&str> = brand.nav_links.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["Home", "About"]);
    }

    #[test]
    fn social_links_are_recognised_by_host() {
        let brand = extract_brand(SAMPLE);
        assert_eq!(brand.social_links.len(), 2);
        assert!(brand.social_links[0].contains("facebook.com"));
    }

    #[test]
    fn favicon_comes_from_link_rel() {
        let brand = extract_brand(SAMPLE);
        assert_eq!(brand.favicon_url.as_deref(), Some("/favicon.ico"));
    }
}
