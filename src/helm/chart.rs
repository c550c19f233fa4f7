// Helm chart tarball cache

use crate::cache::CacheStorage;
use crate::config::UpstreamConfig;
use crate::error::{ChartProxyError, Result};
use crate::helm::index::{find_chart_url, IndexArtifact};
use reqwest::Client;
use serde_yaml::Value as YamlValue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;

const CHART_SUFFIX: &str = ".tgz";

/// A chart archive identified by entry name and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRef {
    pub name: String,
    pub version: String,
}

impl ChartRef {
    /// Parse `{name}-{version}.tgz`, splitting on the last hyphen
    pub fn parse(filename: &str) -> Result<Self> {
        let stem = filename.strip_suffix(CHART_SUFFIX).ok_or_else(|| {
            ChartProxyError::InvalidRequest(
                "Invalid filename format. Must end with .tgz".to_string(),
            )
        })?;

        if stem.contains('/') || stem.contains('\\') || stem.starts_with('.') {
            return Err(ChartProxyError::InvalidRequest(format!(
                "Invalid filename {}",
                filename
            )));
        }

        match stem.rsplit_once('-') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(Self {
                name: name.to_string(),
                version: version.to_string(),
            }),
            _ => Err(ChartProxyError::InvalidRequest(
                "Invalid filename format. Cannot determine entry and version".to_string(),
            )),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}{}", self.name, self.version, CHART_SUFFIX)
    }
}

/// Where a served chart came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh local copy
    Hit,
    /// Downloaded from upstream for this request
    Miss,
    /// Expired local copy served because upstream failed
    Stale,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
        }
    }
}

/// An opened cached chart ready to be streamed to a client
#[derive(Debug)]
pub struct CachedChart {
    pub chart: ChartRef,
    pub path: PathBuf,
    pub file: File,
    pub size: u64,
    pub status: CacheStatus,
}

/// Serves chart archives from disk, fetching them from upstream on miss.
///
/// Upstream URLs are resolved from the cached upstream index only; this type
/// never refreshes the index itself.
pub struct ChartCache {
    cache: Arc<CacheStorage>,
    client: Client,
    upstream: UpstreamConfig,
    ttl: Duration,
}

impl ChartCache {
    pub fn new(
        cache: Arc<CacheStorage>,
        client: Client,
        upstream: UpstreamConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            client,
            upstream,
            ttl,
        }
    }

    pub async fn get_chart(&self, filename: &str) -> Result<CachedChart> {
        let chart = ChartRef::parse(filename)?;
        tracing::info!(
            chart = %chart.name,
            version = %chart.version,
            "Chart request parsed"
        );

        let chart_url = self.resolve_upstream_url(&chart).await?;
        let path = self.cache.chart_path(&chart.file_name());

        if self.cache.is_fresh(&path, self.ttl).await {
            return self.open(chart, path, CacheStatus::Hit).await;
        }

        tracing::info!(chart = %chart.file_name(), url = %chart_url, "Fetching chart");
        let error = match self.download(&chart_url, &path).await {
            Ok(size) => {
                tracing::info!(
                    chart = %chart.file_name(),
                    url = %chart_url,
                    size = size,
                    "Cached Helm chart successfully"
                );
                return self.open(chart, path, CacheStatus::Miss).await;
            }
            Err(e) => e,
        };

        if self.cache.exists(&path).await {
            tracing::warn!(
                chart = %chart.file_name(),
                url = %chart_url,
                error = %error,
                "Upstream fetch failed, serving stale cached chart"
            );
            return self.open(chart, path, CacheStatus::Stale).await;
        }

        tracing::error!(
            chart = %chart.file_name(),
            url = %chart_url,
            error = %error,
            "Unable to fetch chart and no cached copy exists"
        );
        Err(error)
    }

    /// Look up the upstream URL of a chart in the cached upstream index
    pub async fn resolve_upstream_url(&self, chart: &ChartRef) -> Result<String> {
        let index_path = self
            .cache
            .index_path(IndexArtifact::Upstream.file_name());

        if !self.cache.exists(&index_path).await {
            tracing::error!(path = %index_path.display(), "Upstream index unavailable");
            return Err(ChartProxyError::ManifestUnavailable(
                "Upstream index cache not found. Cannot determine external chart URL".to_string(),
            ));
        }

        let raw = self.cache.read(&index_path).await?;
        let index: YamlValue = serde_yaml::from_slice(&raw)?;

        let url = find_chart_url(&index, &chart.name, &chart.version).map_err(|e| {
            tracing::error!(
                chart = %chart.name,
                version = %chart.version,
                error = %e,
                "Chart not found in upstream index"
            );
            e
        })?;

        Ok(self.upstream.resolve_chart_url(&url))
    }

    async fn download(&self, url: &str, path: &std::path::Path) -> Result<u64> {
        let response = self.client.get(url).send().await.map_err(|e| {
            ChartProxyError::UpstreamUnreachable(format!("Failed to fetch {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChartProxyError::UpstreamUnreachable(format!(
                "Upstream repository error: HTTP {}",
                status
            )));
        }

        self.cache.write_stream(path, response.bytes_stream()).await
    }

    async fn open(&self, chart: ChartRef, path: PathBuf, status: CacheStatus) -> Result<CachedChart> {
        let (file, size) = self.cache.open(&path).await?;
        tracing::info!(
            path = %path.display(),
            size = size,
            cache = status.as_str(),
            "Serving cached chart"
        );
        Ok(CachedChart {
            chart,
            path,
            file,
            size,
            status,
        })
    }
}
