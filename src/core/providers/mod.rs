pub mod ai;
pub mod dns;
pub mod host;
pub mod registrar;
pub mod scraper;

use std::time::Duration;

/// Default deadline for outbound provider calls. AI vendors carry their own
/// longer deadline (see `ai::AI_CALL_TIMEOUT`).
pub const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_CALL_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}
