use std::sync::LazyLock;

use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;

pub const KEY_PREFIX: &str = "wts_";
const KEY_RANDOM_LEN: usize = 40;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^wts_[A-Za-z0-9]{40}$").unwrap());

/// Mint a tenant API key. The raw value is shown once at registration and
/// stored verbatim for bearer lookup.
pub fn generate_api_key() -> String {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{KEY_PREFIX}{random}")
}

pub fn is_valid_api_key(candidate: &str) -> bool {
    KEY_RE.is_match(candidate)
}

/// Pull a well-formed key out of an `Authorization: Bearer ...` header.
pub fn bearer_key(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    is_valid_api_key(token).then_some(token)
}
