use crate::cache::CacheStorage;
use crate::config::Config;
use crate::error::{ChartProxyError, Result};
use crate::helm::index::IndexFetcher;
use crate::helm::listing::build_listing;
use crate::helm::{ChartCache, IndexArtifact, IndexCache, ListingRenderer};
use crate::upstream::UpstreamClient;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::io::ReaderStream;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<CacheStorage>,
    pub index: Arc<IndexCache>,
    pub charts: Arc<ChartCache>,
    pub listing: Arc<ListingRenderer>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(CacheStorage::new(
            config.cache.index_dir.clone(),
            config.cache.chart_dir.clone(),
        )?);
        let upstream = UpstreamClient::new(&config.upstream)?;

        let fetcher = IndexFetcher::new(
            upstream.index().clone(),
            config.upstream.index_url(),
            cache.clone(),
        );
        let index = IndexCache::new(cache.clone(), fetcher, config.cache.index_ttl());
        let charts = ChartCache::new(
            cache.clone(),
            upstream.charts().clone(),
            config.upstream.clone(),
            config.cache.chart_ttl(),
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            index: Arc::new(index),
            charts: Arc::new(charts),
            listing: Arc::new(ListingRenderer::new()?),
        })
    }
}

fn error_response(status: StatusCode, error: &ChartProxyError) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Browsers get text/plain so the YAML is displayed instead of downloaded
fn index_content_type(headers: &HeaderMap) -> &'static str {
    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .map(|accept| accept.to_lowercase().contains("text/html"))
        .unwrap_or(false);

    if wants_html {
        "text/plain"
    } else {
        "application/x-yaml"
    }
}

async fn serve_index(state: &AppState, artifact: IndexArtifact, headers: &HeaderMap) -> Response {
    match state.index.get_index(artifact).await {
        Ok(yaml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, index_content_type(headers))],
            yaml,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(
                artifact = artifact.file_name(),
                error = %e,
                "Failed to serve index"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// GET /upstream_index.yaml
async fn upstream_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_index(&state, IndexArtifact::Upstream, &headers).await
}

/// GET /index.yaml
async fn rewritten_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_index(&state, IndexArtifact::Rewritten, &headers).await
}

/// GET /charts/{filename}
async fn get_chart(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    tracing::info!(chart = %filename, "Chart request received");

    let cached = match state.charts.get_chart(&filename).await {
        Ok(cached) => cached,
        Err(e) => return error_response(e.status_code(), &e),
    };

    let file_name = cached.chart.file_name();
    let stream = ReaderStream::new(BufReader::with_capacity(64 * 1024, cached.file));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/gzip"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(cached.size));
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    headers.insert("X-Cache", HeaderValue::from_static(cached.status.as_str()));

    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

/// GET /
async fn listing_page(State(state): State<AppState>) -> Response {
    let page = async {
        let yaml = state.index.get_index(IndexArtifact::Rewritten).await?;
        let entries = build_listing(&yaml, &state.cache).await?;
        state.listing.render(
            &state.config.upstream.repository_url,
            state.config.upstream.repository_source.as_deref(),
            &entries,
        )
    };

    match page.await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render listing page");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// GET /healthz
async fn health() -> impl IntoResponse {
    tracing::debug!("GET /healthz - Health check request");
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(listing_page))
        .route("/index.yaml", get(rewritten_index))
        .route("/upstream_index.yaml", get(upstream_index))
        .route("/charts/*filename", get(get_chart))
        .route("/healthz", get(health))
        .with_state(app_state)
}

/// Bind the listener and serve in a background task.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn start_server(config: Config) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    tracing::info!(
        index_dir = %config.cache.index_dir.display(),
        chart_dir = %config.cache.chart_dir.display(),
        upstream = %config.upstream.repository_url,
        "Initializing chart proxy"
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let app_state = AppState::new(config)?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ChartProxyError::Config(format!("Failed to bind to {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Listening on {}", local_addr);

    let app = build_router(app_state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error after startup: {}", e);
        } else {
            tracing::info!("HTTP server stopped");
        }
    });

    Ok((local_addr, handle))
}
