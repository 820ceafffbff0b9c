//! Client the pipeline uses for every large object.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, instrument};

use super::kind::ArtifactKind;
use super::{backend_from_config, ObjectStore, StoreError};
use crate::config::AppConfig;

/// An object copied into a private staging directory. The directory and
/// everything in it is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedObject {
    dir: TempDir,
    path: PathBuf,
}

impl StagedObject {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the staging directory now, reporting any error.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

pub struct ArtifactStore {
    backend: Arc<dyn ObjectStore>,
    bucket: String,
    staging_root: PathBuf,
    copy_buffer_size: usize,
}

impl ArtifactStore {
    pub fn new(
        backend: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        staging_root: impl Into<PathBuf>,
        copy_buffer_size: usize,
    ) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            staging_root: staging_root.into(),
            copy_buffer_size: copy_buffer_size.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        let backend = backend_from_config(config)?;
        info!(backend = %backend.describe(), bucket = %config.storage.bucket, "Artifact store ready");
        Ok(Self::new(
            backend,
            config.storage.bucket.clone(),
            config.staging_dir(),
            config.storage.copy_buffer_size,
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads `body` under `key`. The key's extension must name a
    /// recognized [`ArtifactKind`]; anything else is rejected before the
    /// backend is contacted.
    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    pub async fn put<R>(&self, key: &str, body: R, size: Option<u64>) -> Result<(), StoreError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let kind = ArtifactKind::from_name(key).ok_or_else(|| StoreError::UnsupportedFormat {
            key: key.to_string(),
        })?;
        validate_key(key)?;

        self.backend
            .put(key, Box::new(body), size, kind.content_type())
            .await
            .map_err(|source| StoreError::Transport {
                op: "put",
                key: key.to_string(),
                source,
            })?;
        info!(kind = %kind, size = ?size, "Stored object");
        Ok(())
    }

    /// Uploads a local file, sending its length as the size hint.
    pub async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let staging = |op, source| StoreError::Staging {
            op,
            key: key.to_string(),
            path: path.to_path_buf(),
            source,
        };
        let file = fs::File::open(path).await.map_err(|e| staging("open", e))?;
        let len = file.metadata().await.map_err(|e| staging("stat", e))?.len();
        self.put(key, file, Some(len)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        self.backend
            .exists(key)
            .await
            .map_err(|source| StoreError::Transport {
                op: "stat",
                key: key.to_string(),
                source,
            })
    }

    /// Copies an object into a fresh, uniquely named staging directory.
    ///
    /// A missing object fails with [`StoreError::NotFound`] before any
    /// download starts. The returned [`StagedObject`] owns the directory.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn get(&self, key: &str) -> Result<StagedObject, StoreError> {
        if !self.exists(key).await? {
            return Err(StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }

        let staging = |op, path: &Path, source| StoreError::Staging {
            op,
            key: key.to_string(),
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| staging("create", &self.staging_root, e))?;
        let dir = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.staging_root)
            .map_err(|e| staging("create", &self.staging_root, e))?;
        let path = dir.path().join(key);

        let reader = self
            .backend
            .open_read(key)
            .await
            .map_err(|source| StoreError::Transport {
                op: "get",
                key: key.to_string(),
                source,
            })?;
        let file = fs::File::create(&path)
            .await
            .map_err(|e| staging("create", &path, e))?;

        let mut reader = BufReader::with_capacity(self.copy_buffer_size, reader);
        let mut writer = BufWriter::with_capacity(self.copy_buffer_size, file);
        let copied = tokio::io::copy_buf(&mut reader, &mut writer)
            .await
            .map_err(|e| staging("copy", &path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| staging("flush", &path, e))?;

        debug!(bytes = copied, "Staged object");
        Ok(StagedObject { dir, path })
    }
}

/// Keys are flat object names: no separators, no leading dot.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.chars().any(char::is_control);
    if bad {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}
