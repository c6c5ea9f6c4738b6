use fallback_proxy::config::load_config;
use fallback_proxy::http_proxy::HttpProxy;
use fallback_proxy::logging::init_logging;
use fallback_proxy::session::{KvStore, MemoryKvStore};
use fallback_proxy::shutdown::ShutdownCoordinator;
use fallback_proxy::Result;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(load_config()?);
    let _log_guard = init_logging(&config.logging)?;

    info!(
        version = env!("BUILD_VERSION"),
        built = env!("BUILD_TIMESTAMP"),
        "starting fallback-proxy"
    );
    info!(
        primary = %config.primary.base_url,
        backup = %config.secondary.base_url,
        "configured origins"
    );

    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let proxy = HttpProxy::new(Arc::clone(&config), store)?;

    let coordinator = ShutdownCoordinator::new();
    let shutdown_signal = coordinator.subscribe();
    tokio::spawn(async move {
        if let Err(e) = coordinator.listen_for_signals().await {
            error!("Shutdown signal listener failed: {}", e);
        }
    });

    proxy.start(shutdown_signal).await?;

    info!("fallback-proxy stopped");
    Ok(())
}
