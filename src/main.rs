use webtosite::config::AppConfig;
use webtosite::interfaces::web;
use webtosite::logging;

#[tokio::main]
async fn main() {
    let log_tx = logging::init();
    let config = AppConfig::from_env();

    let state = match web::build_state(config, log_tx).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("startup failed: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = web::serve(state).await {
        tracing::error!("server crashed: {e:#}");
        std::process::exit(1);
    }
}
