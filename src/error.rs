//! Crate-wide error type.
//!
//! Variants follow the failure classes the pipeline distinguishes:
//! missing entities, bad source descriptors, fetch failures, undecodable
//! payloads or partition files, and failures of the optional collaborators
//! (page renderer, LLM).

/// Errors produced by collectors, the store and the services.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("page rendering failed: {0}")]
    Render(String),

    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
