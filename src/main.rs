use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let config = teamsync::config::AppConfig::from_env();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "teamsync",
        "Teamsync starting: RUST_LOG='{}', port={}, mode={:?}, base_path='{}', frontend_origin='{}'",
        rust_log, config.port, config.mode, config.base_path, config.frontend_origin
    );

    teamsync::server::run(config).await
}
