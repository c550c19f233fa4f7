use crate::error::{ChartProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default upstream Helm repository
pub const DEFAULT_REPOSITORY_URL: &str = "https://charts.helm.sh/stable";

/// Index artifacts are refreshed after 10 minutes
pub const INDEX_TTL_SECS: u64 = 600;

/// Chart archives are refreshed after 7 days
pub const CHART_TTL_SECS: u64 = 604_800;

/// Total timeout for the upstream index.yaml request
pub const INDEX_FETCH_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_INDEX_CACHE_DIR: &str = "/app/static/index_cache";
pub const DEFAULT_CHART_CACHE_DIR: &str = "/app/static/chart_cache";

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Port 0 binds an ephemeral port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub index_dir: PathBuf,
    pub chart_dir: PathBuf,
    #[serde(default = "default_index_ttl_secs")]
    pub index_ttl_secs: u64,
    #[serde(default = "default_chart_ttl_secs")]
    pub chart_ttl_secs: u64,
}

fn default_index_ttl_secs() -> u64 {
    INDEX_TTL_SECS
}

fn default_chart_ttl_secs() -> u64 {
    CHART_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from(DEFAULT_INDEX_CACHE_DIR),
            chart_dir: PathBuf::from(DEFAULT_CHART_CACHE_DIR),
            index_ttl_secs: INDEX_TTL_SECS,
            chart_ttl_secs: CHART_TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }

    pub fn chart_ttl(&self) -> Duration {
        Duration::from_secs(self.chart_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub repository_url: String,
    /// Free-form label shown on the listing page
    #[serde(default)]
    pub repository_source: Option<String>,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_index_timeout_secs() -> u64 {
    INDEX_FETCH_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            repository_source: None,
            index_timeout_secs: INDEX_FETCH_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl UpstreamConfig {
    /// URL of the upstream index.yaml
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.repository_url.trim_end_matches('/'))
    }

    /// Resolve a chart URL taken from the upstream index.
    ///
    /// Absolute URLs are returned as-is, relative ones are joined onto the
    /// repository URL.
    pub fn resolve_chart_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.repository_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }
}

impl Config {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `REPOSITORY_URL`, `REPOSITORY_SOURCE`, `BIND_ADDRESS`,
    /// `PORT`, `INDEX_CACHE_DIR`, `CHART_CACHE_DIR`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = lookup("REPOSITORY_URL") {
            config.upstream.repository_url = url.trim().trim_end_matches('/').to_string();
        }
        config.upstream.repository_source =
            lookup("REPOSITORY_SOURCE").filter(|s| !s.trim().is_empty());

        if let Some(bind_address) = lookup("BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = lookup("PORT") {
            config.server.port = port
                .trim()
                .parse()
                .map_err(|e| ChartProxyError::Config(format!("Invalid PORT '{}': {}", port, e)))?;
        }

        if let Some(dir) = lookup("INDEX_CACHE_DIR") {
            config.cache.index_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CHART_CACHE_DIR") {
            config.cache.chart_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.repository_url.is_empty() {
            return Err(ChartProxyError::Config(
                "Repository URL must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
