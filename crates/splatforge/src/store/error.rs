use std::path::PathBuf;
use thiserror::Error;

/// Error raised by a bucket backend; wrapped with the key and operation by
/// [`super::ArtifactStore`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unsupported artifact format for '{key}' (expected .mp4 or .splat)")]
    UnsupportedFormat { key: String },

    #[error("Invalid object key '{key}'")]
    InvalidKey { key: String },

    #[error("Object '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    #[error("Store {op} failed for '{key}': {source}")]
    Transport {
        op: &'static str,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Staging {op} failed for '{key}' at '{path}': {source}")]
    Staging {
        op: &'static str,
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid store endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
