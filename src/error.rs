use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CantoError {
    #[error("invalid filter term: {0}")]
    #[diagnostic(help("terms look like `tag:value`, e.g. `en:Robin` or `cnt:\"United States\"`"))]
    InvalidFilterTerm(String),

    #[error("invalid record identifier: {0}")]
    InvalidRecordId(String),

    #[error("filter must contain at least one term")]
    EmptyFilter,

    #[error("unsupported predicate for local matching: {0}")]
    #[diagnostic(help("only equality terms (`tag:value`) can be matched against the library"))]
    UnsupportedPredicate(String),

    #[error("invalid category size threshold: {0}")]
    InvalidThreshold(usize),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("asset transfer from {url} failed: {message}")]
    AssetTransfer { url: String, message: String },

    #[error("query page {path} is unreadable: {message}")]
    CorruptPage { path: String, message: String },

    #[error("query page missing: {path}")]
    MissingPage { path: String },

    #[error("recovery protocol violated: {0}")]
    Consistency(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CantoError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CantoError::CatalogHttp(_)
                | CantoError::CatalogStatus { .. }
                | CantoError::AssetTransfer { .. }
        )
    }

    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            CantoError::InvalidFilterTerm(_)
                | CantoError::InvalidRecordId(_)
                | CantoError::EmptyFilter
                | CantoError::UnsupportedPredicate(_)
                | CantoError::InvalidThreshold(_)
        )
    }
}
