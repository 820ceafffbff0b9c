//! Artifact storage: a bucket of large binary objects behind an
//! [`ObjectStore`] backend, plus the [`ArtifactStore`] client the pipeline
//! talks to.

pub mod artifact;
pub mod error;
pub mod http;
pub mod kind;
pub mod local;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use artifact::{ArtifactStore, StagedObject};
pub use error::{BackendError, StoreError};
pub use http::HttpBucket;
pub use kind::ArtifactKind;
pub use local::LocalBucket;

use crate::config::{AppConfig, StorageBackend};

/// A readable object body.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Raw bucket operations. Implementations stream; none buffer a whole
/// object in memory.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key`. `size` is `None` when the length is unknown.
    async fn put(
        &self,
        key: &str,
        body: ObjectReader,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<(), BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    async fn open_read(&self, key: &str) -> Result<ObjectReader, BackendError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Builds the configured backend.
pub fn backend_from_config(config: &AppConfig) -> crate::Result<Arc<dyn ObjectStore>> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Local => {
            let root = storage.root.as_deref().unwrap_or_else(|| Path::new("."));
            Ok(Arc::new(LocalBucket::new(root, &storage.bucket)))
        }
        StorageBackend::Http => {
            let endpoint = storage.endpoint.as_deref().unwrap_or_default();
            let token = crate::secrets::resolve_secret_optional(
                storage.token.as_deref(),
                storage.token_file.as_deref(),
                storage.token_env.as_deref(),
            )?;
            let bucket = HttpBucket::new(endpoint, &storage.bucket, token, storage.part_size)?;
            Ok(Arc::new(bucket))
        }
    }
}
