// Helm repository index.yaml caching and URL rewriting

use crate::cache::CacheStorage;
use crate::error::{ChartProxyError, Result};
use reqwest::Client;
use serde_yaml::Value as YamlValue;
use std::sync::Arc;
use std::time::Duration;

/// Version used for releases that carry no version field
pub const MISSING_VERSION: &str = "null";

/// Path prefix under which rewritten chart URLs are served
pub const CHARTS_PREFIX: &str = "charts";

/// The two index artifacts derived from one upstream index.yaml
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexArtifact {
    /// Index exactly as fetched (re-serialized)
    Upstream,
    /// Index with every release's urls pointing back through this proxy
    Rewritten,
}

impl IndexArtifact {
    pub fn file_name(self) -> &'static str {
        match self {
            IndexArtifact::Upstream => "upstream_index.yaml",
            IndexArtifact::Rewritten => "index.yaml",
        }
    }
}

/// Serialized artifacts produced by one upstream fetch
#[derive(Debug, Clone)]
pub struct FetchedIndex {
    pub upstream: String,
    pub rewritten: String,
}

impl FetchedIndex {
    pub fn into_artifact(self, artifact: IndexArtifact) -> String {
        match artifact {
            IndexArtifact::Upstream => self.upstream,
            IndexArtifact::Rewritten => self.rewritten,
        }
    }
}

/// Render a YAML scalar the way it appears in chart filenames
pub fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Null => Some(MISSING_VERSION.to_string()),
        _ => None,
    }
}

/// Version of a release entry, defaulting to `"null"` when absent
pub fn release_version(release: &YamlValue) -> String {
    release
        .get("version")
        .and_then(scalar_to_string)
        .unwrap_or_else(|| MISSING_VERSION.to_string())
}

/// Proxy-relative URL of a chart archive
pub fn proxy_chart_url(entry: &str, version: &str) -> String {
    format!("{}/{}-{}.tgz", CHARTS_PREFIX, entry, version)
}

/// Replace the urls of every release with a single proxy-relative path.
///
/// Entries or releases that are not shaped like a Helm index are left as
/// they are.
pub fn rewrite_index_urls(index: &mut YamlValue) {
    let Some(entries) = index.get_mut("entries").and_then(|e| e.as_mapping_mut()) else {
        return;
    };

    for (entry_name, releases) in entries.iter_mut() {
        let Some(entry_name) = scalar_to_string(entry_name) else {
            continue;
        };
        let Some(releases) = releases.as_sequence_mut() else {
            continue;
        };

        for release in releases.iter_mut() {
            let version = release_version(release);
            if let Some(release) = release.as_mapping_mut() {
                release.insert(
                    YamlValue::String("urls".to_string()),
                    YamlValue::Sequence(vec![YamlValue::String(proxy_chart_url(
                        &entry_name,
                        &version,
                    ))]),
                );
            }
        }
    }
}

/// Find the first upstream URL of `entry` at `version`
pub fn find_chart_url(index: &YamlValue, entry: &str, version: &str) -> Result<String> {
    let releases = index
        .get("entries")
        .and_then(|e| e.get(entry))
        .ok_or_else(|| ChartProxyError::NotFound(format!("Chart entry {} not found", entry)))?;

    let releases = releases.as_sequence().ok_or_else(|| {
        ChartProxyError::NotFound(format!("Chart entry {} is not a list of releases", entry))
    })?;

    // Duplicate versions without urls are skipped; the first non-empty list decides
    releases
        .iter()
        .filter(|release| release.is_mapping() && release_version(release) == version)
        .find_map(|release| {
            release
                .get("urls")
                .and_then(|urls| urls.as_sequence())
                .and_then(|urls| urls.first())
        })
        .and_then(|url| url.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ChartProxyError::NotFound(format!(
                "Version {} for the chart {} not found or has no valid URL",
                version, entry
            ))
        })
}

/// Fetches the upstream index and persists both artifacts
pub struct IndexFetcher {
    client: Client,
    index_url: String,
    cache: Arc<CacheStorage>,
}

impl IndexFetcher {
    pub fn new(client: Client, index_url: String, cache: Arc<CacheStorage>) -> Self {
        Self {
            client,
            index_url,
            cache,
        }
    }

    /// Fetch index.yaml, regenerate both artifacts and persist them.
    ///
    /// Persistence failures are logged only; the returned artifacts are the
    /// in-memory serializations.
    pub async fn fetch(&self) -> Result<FetchedIndex> {
        tracing::info!(url = %self.index_url, "Fetching upstream index");

        let body = self.download().await?;

        let mut index: YamlValue = serde_yaml::from_str(&body).map_err(|e| {
            tracing::error!(url = %self.index_url, error = %e, "Failed to parse upstream index");
            ChartProxyError::Parse(e)
        })?;

        let upstream = serde_yaml::to_string(&index)?;
        self.persist(IndexArtifact::Upstream, &upstream).await;

        rewrite_index_urls(&mut index);
        let rewritten = serde_yaml::to_string(&index)?;
        self.persist(IndexArtifact::Rewritten, &rewritten).await;

        Ok(FetchedIndex {
            upstream,
            rewritten,
        })
    }

    async fn download(&self) -> Result<String> {
        let response = self.client.get(&self.index_url).send().await.map_err(|e| {
            tracing::error!(url = %self.index_url, error = %e, "Failed to fetch upstream index");
            ChartProxyError::UpstreamUnreachable(format!(
                "Failed to fetch {}: {}",
                self.index_url, e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                url = %self.index_url,
                status = %status,
                "Upstream repository returned error status"
            );
            return Err(ChartProxyError::UpstreamUnreachable(format!(
                "Upstream repository error: HTTP {}",
                status
            )));
        }

        response.text().await.map_err(|e| {
            tracing::error!(url = %self.index_url, error = %e, "Failed to read upstream index");
            ChartProxyError::UpstreamUnreachable(format!("Failed to read upstream response: {}", e))
        })
    }

    async fn persist(&self, artifact: IndexArtifact, content: &str) {
        let path = self.cache.index_path(artifact.file_name());
        match self.cache.write(&path, content.as_bytes()).await {
            Ok(()) => tracing::info!(path = %path.display(), "Saved index artifact"),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to save index artifact"
            ),
        }
    }
}

/// Serves index artifacts from disk, refreshing them once they expire
pub struct IndexCache {
    cache: Arc<CacheStorage>,
    fetcher: IndexFetcher,
    ttl: Duration,
}

impl IndexCache {
    pub fn new(cache: Arc<CacheStorage>, fetcher: IndexFetcher, ttl: Duration) -> Self {
        Self {
            cache,
            fetcher,
            ttl,
        }
    }

    pub fn fetcher(&self) -> &IndexFetcher {
        &self.fetcher
    }

    /// Return the requested artifact, re-fetching upstream when it is stale.
    ///
    /// A read failure on a fresh artifact is returned as-is instead of
    /// falling back to a fetch. A failed fetch is not masked by a stale copy.
    pub async fn get_index(&self, artifact: IndexArtifact) -> Result<String> {
        let path = self.cache.index_path(artifact.file_name());

        if self.cache.is_fresh(&path, self.ttl).await {
            let bytes = self.cache.read(&path).await?;
            return String::from_utf8(bytes).map_err(|e| {
                ChartProxyError::Cache(format!(
                    "Cached index {} is not valid UTF-8: {}",
                    path.display(),
                    e
                ))
            });
        }

        match self.fetcher.fetch().await {
            Ok(fetched) => Ok(fetched.into_artifact(artifact)),
            Err(e) => Err(ChartProxyError::ManifestUnavailable(format!(
                "Failed to retrieve or process index: {}",
                e
            ))),
        }
    }
}
