use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use agent::assets::InMemoryAssetStorage;
use agent::config::AgentConfig;
use agent::state::AppState;
use mtc_filecache::FileCache;
use mtc_model::DeviceModel;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = AgentConfig::default();
    let bind_addr: SocketAddr = format!("{}:{}", config.server_ip, config.port)
        .parse()
        .expect("server_ip/port must form a valid socket address");

    // The device model and static file tree are deployment-specific (a
    // devices.xml path and a schema/stylesheet directory); an empty model
    // and cache are what a freshly started agent serves until loaded.
    let devices = DeviceModel::default();
    let assets: Arc<dyn agent::assets::AssetStorage> = Arc::new(InMemoryAssetStorage::default());
    let files = FileCache::new(config.max_cached_file_size, config.min_compress_file_size);

    let state = AppState::new(config, devices, assets, files);
    let router = agent::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "mtconnect agent listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("agent shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
