//! Shared helpers: a mock Helm repository served by axum

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use chart_proxy::config::{CacheConfig, Config, ServerConfig, UpstreamConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_stream::wrappers::ReceiverStream;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log lines written by a subscriber installed with [`capture_logs`]
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Record WARN and above on the current thread until the guard is dropped.
///
/// Works with `#[tokio::test]`, whose runtime polls everything on the test thread.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

/// Mutable behaviour and hit counters of the mock repository
#[derive(Clone, Default)]
pub struct MockRepo {
    /// index.yaml body; `None` answers 500
    pub index: Arc<Mutex<Option<String>>>,
    /// Archives served under /dl/{file}
    pub charts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// Answer every archive request with 503
    pub fail_charts: Arc<AtomicBool>,
    /// Send part of the archive, then abort the connection
    pub truncate_charts: Arc<AtomicBool>,
    pub index_hits: Arc<AtomicUsize>,
    pub chart_hits: Arc<AtomicUsize>,
}

impl MockRepo {
    pub fn set_index(&self, body: Option<String>) {
        *self.index.lock().unwrap() = body;
    }

    pub fn add_chart(&self, file: &str, data: &[u8]) {
        self.charts
            .lock()
            .unwrap()
            .insert(file.to_string(), data.to_vec());
    }

    pub fn index_hits(&self) -> usize {
        self.index_hits.load(Ordering::SeqCst)
    }

    pub fn chart_hits(&self) -> usize {
        self.chart_hits.load(Ordering::SeqCst)
    }
}

async fn serve_index(State(repo): State<MockRepo>) -> Response {
    repo.index_hits.fetch_add(1, Ordering::SeqCst);
    match repo.index.lock().unwrap().clone() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response(),
    }
}

async fn serve_chart(State(repo): State<MockRepo>, Path(file): Path<String>) -> Response {
    repo.chart_hits.fetch_add(1, Ordering::SeqCst);

    if repo.fail_charts.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response();
    }

    let Some(data) = repo.charts.lock().unwrap().get(&file).cloned() else {
        return (StatusCode::NOT_FOUND, "no such chart").into_response();
    };

    if repo.truncate_charts.load(Ordering::SeqCst) {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
        tokio::spawn(async move {
            let half = data.len() / 2;
            let _ = tx.send(Ok(Bytes::from(data[..half].to_vec()))).await;
            let _ = tx
                .send(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "Connection closed prematurely",
                )))
                .await;
        });
        return Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/octet-stream")
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .unwrap();
    }

    (StatusCode::OK, data).into_response()
}

/// Start the mock repository on an ephemeral port
pub async fn spawn_mock_repo(repo: MockRepo) -> SocketAddr {
    let app = Router::new()
        .route("/index.yaml", get(serve_index))
        .route("/dl/:file", get(serve_chart))
        .with_state(repo);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Mock server failed");
    });

    addr
}

/// Index listing `foo` 1.0.0 and 0.9.0 plus a relative-URL entry `bar-chart` 2.0.0
pub fn sample_index(addr: SocketAddr) -> String {
    format!(
        r#"apiVersion: v1
entries:
  foo:
  - version: 1.0.0
    name: foo
    urls:
    - http://{addr}/dl/foo-1.0.0.tgz
  - version: 0.9.0
    name: foo
    urls:
    - http://{addr}/dl/foo-0.9.0.tgz
  bar-chart:
  - version: 2.0.0
    name: bar-chart
    urls:
    - dl/bar-chart-2.0.0.tgz
generated: "2024-01-01T00:00:00Z"
"#
    )
}

pub fn test_config(temp_dir: &TempDir, upstream: SocketAddr) -> Config {
    Config {
        server: ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
        },
        cache: CacheConfig {
            index_dir: temp_dir.path().join("index_cache"),
            chart_dir: temp_dir.path().join("chart_cache"),
            ..CacheConfig::default()
        },
        upstream: UpstreamConfig {
            repository_url: format!("http://{}", upstream),
            repository_source: Some("mock".to_string()),
            ..UpstreamConfig::default()
        },
    }
}
