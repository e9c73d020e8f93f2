use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use webfic_searcher::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting webfic searcher");
    if let Err(e) = webfic_searcher::run(config).await {
        error!(error = %e, "bot stopped");
        std::process::exit(1);
    }
}
