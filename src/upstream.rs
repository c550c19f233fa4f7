use crate::config::UpstreamConfig;
use crate::error::{ChartProxyError, Result};
use reqwest::Client;
use std::time::Duration;

/// HTTP clients for the upstream chart repository
#[derive(Clone)]
pub struct UpstreamClient {
    index_client: Client,
    chart_client: Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let index_client = Self::builder(config)
            .timeout(Duration::from_secs(config.index_timeout_secs))
            .build()
            .map_err(ChartProxyError::Http)?;

        // Chart downloads may be large, so only the connect phase is bounded
        let chart_client = Self::builder(config)
            .build()
            .map_err(ChartProxyError::Http)?;

        Ok(Self {
            index_client,
            chart_client,
        })
    }

    fn builder(config: &UpstreamConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
    }

    /// Client used for index.yaml requests
    pub fn index(&self) -> &Client {
        &self.index_client
    }

    /// Client used for streamed chart downloads
    pub fn charts(&self) -> &Client {
        &self.chart_client
    }
}
