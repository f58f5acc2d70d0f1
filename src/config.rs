use std::env;

/// Registrar contact record used for all four contact roles when the
/// caller does not supply one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegistrantDefaults {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct NamecheapConfig {
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub client_ip: Option<String>,
    pub sandbox: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CloudflareConfig {
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureGates {
    pub ai_proxy: bool,
    pub plugin_api: bool,
    pub user_auth: bool,
    pub voice_flow: bool,
}

/// Process-wide configuration, read once from the environment at startup.
/// Missing credentials are not an error here; each workflow validates the
/// credentials for the path it exercises before any external call.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_host: String,
    pub api_port: u16,

    pub insta_wp_api_key: Option<String>,
    pub namecheap: NamecheapConfig,
    pub cloudflare: CloudflareConfig,

    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub firecrawl_api_key: Option<String>,

    pub proxy_admin_secret: Option<String>,
    pub database_url: Option<String>,

    /// Base site serving the template catalog endpoint.
    pub base_site_url: String,
    /// Favicon applied when neither scrape nor brief provides one.
    pub default_favicon_url: String,
    pub registrant_defaults: Option<RegistrantDefaults>,

    pub features: FeatureGates,
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let registrant_defaults = env_opt("REGISTRANT_DEFAULTS_JSON")
            .and_then(|raw| serde_json::from_str::<RegistrantDefaults>(&raw).ok());

        Self {
            api_host: env_opt("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port: env_opt("API_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            insta_wp_api_key: env_opt("INSTA_WP_API_KEY"),
            namecheap: NamecheapConfig {
                api_key: env_opt("NAMECHEAP_API_KEY"),
                username: env_opt("NAMECHEAP_USERNAME"),
                client_ip: env_opt("NAMECHEAP_CLIENT_IP"),
                sandbox: env_bool("NAMECHEAP_SANDBOX", false),
            },
            cloudflare: CloudflareConfig {
                api_key: env_opt("CLOUDFLARE_API_KEY"),
                email: env_opt("CLOUDFLARE_EMAIL"),
                account_id: env_opt("CLOUDFLARE_ACCOUNT_ID"),
            },

            openai_api_key: env_opt("OPENAI_API_KEY"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            firecrawl_api_key: env_opt("FIRECRAWL_API_KEY"),

            proxy_admin_secret: env_opt("PROXY_ADMIN_SECRET"),
            database_url: env_opt("DATABASE_URL"),

            base_site_url: env_opt("BASE_SITE_URL")
                .unwrap_or_else(|| "https://base.webtosite.app".to_string()),
            default_favicon_url: env_opt("DEFAULT_FAVICON_URL")
                .unwrap_or_else(|| "https://base.webtosite.app/assets/default-favicon.png".to_string()),
            registrant_defaults,

            features: FeatureGates {
                ai_proxy: env_bool("ENABLE_AI_PROXY", true),
                plugin_api: env_bool("ENABLE_PLUGIN_API", true),
                user_auth: env_bool("ENABLE_USER_AUTH", true),
                voice_flow: env_bool("ENABLE_VOICE_FLOW", true),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        unsafe {
            env::set_var("WTS_TEST_FLAG_A", "true");
            env::set_var("WTS_TEST_FLAG_B", "1");
            env::set_var("WTS_TEST_FLAG_C", "off");
        }
        assert!(env_bool("WTS_TEST_FLAG_A", false));
        assert!(env_bool("WTS_TEST_FLAG_B", false));
        assert!(!env_bool("WTS_TEST_FLAG_C", true));
    }

    #[test]
    fn env_bool_falls_back_to_default_when_unset() {
        assert!(env_bool("WTS_TEST_FLAG_MISSING", true));
        assert!(!env_bool("WTS_TEST_FLAG_MISSING", false));
    }

    #[test]
    fn env_opt_treats_blank_as_missing() {
        unsafe {
            env::set_var("WTS_TEST_BLANK", "   ");
        }
        assert_eq!(env_opt("WTS_TEST_BLANK"), None);
    }
}
