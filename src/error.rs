use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockError {
    #[error("sqlite error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("{0}")]
    Fetch(String),
    #[error("drag consistency failure: {0}")]
    Consistency(String),
    #[error("invalid operation target: {0}")]
    InvalidTarget(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = DockError> = std::result::Result<T, E>;
