use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChartProxyError>;

#[derive(Error, Debug)]
pub enum ChartProxyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

impl ChartProxyError {
    /// HTTP status used when this error reaches a client
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChartProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChartProxyError::NotFound(_) | ChartProxyError::ManifestUnavailable(_) => {
                StatusCode::NOT_FOUND
            }
            ChartProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
