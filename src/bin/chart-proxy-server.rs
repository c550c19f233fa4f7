use chart_proxy::{start_server, Config};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    tracing::info!("Upstream repository: {}", config.upstream.repository_url);
    if let Some(source) = &config.upstream.repository_source {
        tracing::info!("Repository source: {}", source);
    }
    tracing::info!("Server endpoints:");
    tracing::info!("  Index: /index.yaml (upstream copy: /upstream_index.yaml)");
    tracing::info!("  Charts: /charts/<name>-<version>.tgz");
    tracing::info!("  Health: /healthz");

    let (addr, handle) = start_server(config).await?;
    tracing::info!("chart-proxy listening on http://{}", addr);

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
        result = handle => {
            if let Err(e) = result {
                tracing::error!("Server task failed: {:?}", e);
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
