use crate::error::{ChartProxyError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Distinguishes temp files of concurrent writers targeting the same path
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-based cache for index artifacts and chart archives.
///
/// All cache files are written through a temp file and renamed into place,
/// so readers only ever see complete files. Concurrent writers to the same
/// path are not coordinated: the last rename wins.
pub struct CacheStorage {
    index_dir: PathBuf,
    charts_dir: PathBuf,
}

impl CacheStorage {
    pub fn new(index_dir: PathBuf, charts_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&index_dir)
            .map_err(|e| ChartProxyError::Cache(format!("Failed to create index dir: {}", e)))?;
        std::fs::create_dir_all(&charts_dir)
            .map_err(|e| ChartProxyError::Cache(format!("Failed to create charts dir: {}", e)))?;

        Ok(Self {
            index_dir,
            charts_dir,
        })
    }

    /// Path of an index artifact, e.g. `index_cache/index.yaml`
    pub fn index_path(&self, file_name: &str) -> PathBuf {
        self.index_dir.join(file_name)
    }

    /// Path of a chart archive, e.g. `chart_cache/nginx-1.2.3.tgz`
    pub fn chart_path(&self, file_name: &str) -> PathBuf {
        self.charts_dir.join(file_name)
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn charts_dir(&self) -> &Path {
        &self.charts_dir
    }

    /// Age of a cached file based on its mtime.
    ///
    /// Returns `None` when the file is missing or cannot be stat'ed. An mtime
    /// in the future counts as age zero.
    pub async fn age(&self, path: &Path) -> Option<Duration> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to stat cache file"
                );
                return None;
            }
        };

        match metadata.modified() {
            Ok(modified) => Some(
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO),
            ),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cache file has no modification time"
                );
                None
            }
        }
    }

    /// True iff the file exists and is younger than `ttl`
    pub async fn is_fresh(&self, path: &Path, ttl: Duration) -> bool {
        match self.age(path).await {
            Some(age) if age < ttl => {
                tracing::info!(
                    path = %path.display(),
                    age_secs = age.as_secs_f64(),
                    ttl_secs = ttl.as_secs(),
                    "Cache hit"
                );
                true
            }
            Some(age) => {
                tracing::info!(
                    path = %path.display(),
                    age_secs = age.as_secs_f64(),
                    ttl_secs = ttl.as_secs(),
                    "Cache expired"
                );
                false
            }
            None => {
                tracing::info!(path = %path.display(), "Cache file not found");
                false
            }
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(|e| {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to read cache file"
            );
            ChartProxyError::Io(e)
        })
    }

    /// Open a cached file for streaming, returning it with its length
    pub async fn open(&self, path: &Path) -> Result<(fs::File, u64)> {
        let file = fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Write a whole file (atomic write)
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = temp_path_for(path);

        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ChartProxyError::Io(e));
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ChartProxyError::Io(e));
        }

        tracing::debug!(
            path = %path.display(),
            data_len = data.len(),
            "Cache file written"
        );
        Ok(())
    }

    /// Write a file from a stream of chunks (atomic write).
    ///
    /// Errors yielded by the stream are reported as
    /// [`ChartProxyError::UpstreamUnreachable`]; local filesystem failures as
    /// [`ChartProxyError::Io`]. On any error the target path is left untouched.
    pub async fn write_stream<S, E>(&self, path: &Path, stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let temp_path = temp_path_for(path);
        let result = write_chunks(&temp_path, stream).await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ChartProxyError::Io(e));
        }

        Ok(written)
    }
}

async fn write_chunks<S, E>(temp_path: &Path, stream: S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut file = fs::File::create(temp_path).await?;
    let mut written = 0u64;

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            ChartProxyError::UpstreamUnreachable(format!("Transfer interrupted: {}", e))
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        seq
    ))
}
