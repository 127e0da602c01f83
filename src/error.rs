use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch source page {url}: {reason}")]
    PageFetch { url: String, reason: String },

    #[error("no arXiv entries found on source page {0}")]
    NoEntries(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("API error for {0}: {1}")]
    Api(String, String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("cache error at {}: {reason}", path.display())]
    Cache { path: PathBuf, reason: String },

    #[error("failed to render {format}: {reason}")]
    Render { format: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Process exit code for a fatal run failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::PageFetch { .. } => 2,
            SyncError::NoEntries(_) => 3,
            SyncError::Render { .. } => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
