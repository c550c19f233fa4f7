pub mod cache;
pub mod config;
pub mod error;
pub mod helm;
pub mod server;
pub mod upstream;

pub use cache::CacheStorage;
pub use config::Config;
pub use error::{ChartProxyError, Result};
pub use server::{build_router, AppState};

/// Start the chart proxy with the given configuration
pub async fn start_server(
    config: Config,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    server::start_server(config).await
}
