pub(crate) mod auth;
mod handlers;
mod router;
pub(crate) mod sse;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::info;

use crate::config::AppConfig;
use crate::core::deploy::WpApplicator;
use crate::core::editor::{EditorService, SiteDirectory, StaticSiteDirectory};
use crate::core::providers::ai::{
    AiVendor, anthropic::AnthropicClient, google::GoogleClient, openai::OpenAiClient,
};
use crate::core::providers::dns::CloudflareClient;
use crate::core::providers::host::InstaWpClient;
use crate::core::providers::registrar::NamecheapClient;
use crate::core::providers::scraper::Scraper;
use crate::core::proxy::ProxyService;
use crate::core::store::Store;
use crate::core::store::pg::PgStore;
use crate::core::workflow::domain_site::DomainSiteWorkflow;
use crate::core::workflow::onboarding::OnboardingEngine;
use crate::core::workflow::templates::CatalogCache;

/// Default text model for onboarding analysis, content generation, and the
/// editor transcript.
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone)]
pub struct AppState {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) domain_site: Arc<DomainSiteWorkflow>,
    pub(crate) onboarding: Arc<OnboardingEngine>,
    pub(crate) applicator: Arc<WpApplicator>,
    pub(crate) proxy: Option<Arc<ProxyService>>,
    pub(crate) editor: Option<Arc<EditorService>>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
}

/// Wire every service from configuration. Providers whose credentials are
/// absent stay unconfigured; the workflows surface that as a
/// ConfigurationError on the paths that need them.
pub async fn build_state(
    config: AppConfig,
    log_tx: tokio::sync::broadcast::Sender<String>,
) -> Result<AppState> {
    let config = Arc::new(config);

    let registrar = NamecheapClient::from_config(&config.namecheap)
        .map(|c| Arc::new(c) as Arc<dyn crate::core::providers::registrar::RegistrarApi>);
    let dns = CloudflareClient::from_config(&config.cloudflare)
        .map(|c| Arc::new(c) as Arc<dyn crate::core::providers::dns::DnsApi>);
    let host = config
        .insta_wp_api_key
        .clone()
        .map(|key| Arc::new(InstaWpClient::new(key)) as Arc<dyn crate::core::providers::host::HostApi>);
    let scraper = Arc::new(Scraper::new(config.firecrawl_api_key.clone()))
        as Arc<dyn crate::core::providers::scraper::ScraperApi>;

    let openai = config
        .openai_api_key
        .clone()
        .map(|key| Arc::new(OpenAiClient::new(key)) as Arc<dyn AiVendor>);
    let google = config
        .gemini_api_key
        .clone()
        .map(|key| Arc::new(GoogleClient::new(key)) as Arc<dyn AiVendor>);
    let anthropic = config
        .anthropic_api_key
        .clone()
        .map(|key| Arc::new(AnthropicClient::new(key)) as Arc<dyn AiVendor>);

    let applicator = Arc::new(WpApplicator::new(
        openai.clone(),
        DEFAULT_TEXT_MODEL.to_string(),
    ));

    let domain_site = Arc::new(DomainSiteWorkflow::new(
        registrar,
        dns,
        host,
        Some(applicator.clone() as Arc<dyn crate::core::deploy::SiteApplicator>),
        config.registrant_defaults.clone(),
    ));

    let catalog = Arc::new(CatalogCache::new(config.base_site_url.clone()));
    let onboarding = Arc::new(OnboardingEngine::new(
        scraper,
        openai.clone(),
        DEFAULT_TEXT_MODEL.to_string(),
        catalog,
        config.default_favicon_url.clone(),
    ));

    let store: Option<Arc<dyn Store>> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url).await?;
            pg.migrate().await?;
            Some(Arc::new(pg))
        }
        None => {
            info!("DATABASE_URL not set; proxy and editor surfaces disabled");
            None
        }
    };

    let proxy = store.as_ref().map(|store| {
        Arc::new(ProxyService::new(
            store.clone(),
            openai.clone(),
            google,
            anthropic,
        ))
    });

    let editor = store.as_ref().map(|store| {
        let sites: Arc<dyn SiteDirectory> = Arc::new(StaticSiteDirectory::new());
        Arc::new(EditorService::new(
            store.clone(),
            sites,
            openai.clone(),
            DEFAULT_TEXT_MODEL.to_string(),
        ))
    });

    Ok(AppState {
        config,
        domain_site,
        onboarding,
        applicator,
        proxy,
        editor,
        log_tx,
    })
}

/// Bind and serve the API until the process exits.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.api_host, state.config.api_port);
    let app = router::build_api_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- SSE log stream (used by router) ---

pub(crate) async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("log stream lagged")),
    });
    Sse::new(stream)
}
