//! Bucket backed by a directory on the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BackendError, ObjectReader, ObjectStore};

/// Objects live at `<root>/<bucket>/<key>`.
pub struct LocalBucket {
    dir: PathBuf,
}

impl LocalBucket {
    pub fn new<P: AsRef<Path>>(root: P, bucket: &str) -> Self {
        Self {
            dir: root.as_ref().join(bucket),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalBucket {
    async fn put(
        &self,
        key: &str,
        mut body: ObjectReader,
        _size: Option<u64>,
        _content_type: &str,
    ) -> Result<(), BackendError> {
        fs::create_dir_all(&self.dir).await?;

        // Readers never observe a partially written object: write aside, then rename.
        let part = self.dir.join(format!(".{}.part", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&part).await?;
            tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&part, self.object_path(key)).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&part).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn open_read(&self, key: &str) -> Result<ObjectReader, BackendError> {
        let file = fs::File::open(self.object_path(key)).await?;
        Ok(Box::new(file))
    }

    fn describe(&self) -> String {
        format!("local:{}", crate::sanitize::redact_path(&self.dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path(), "splats");

        bucket
            .put("work1.splat", Box::new(&b"splat-bytes"[..]), Some(11), "x")
            .await
            .unwrap();
        assert!(bucket.exists("work1.splat").await.unwrap());
        assert!(dir.path().join("splats").join("work1.splat").is_file());

        let mut reader = bucket.open_read("work1.splat").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"splat-bytes");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path(), "splats");
        assert!(!bucket.exists("nope.splat").await.unwrap());
        assert!(bucket.open_read("nope.splat").await.is_err());
    }

    #[tokio::test]
    async fn test_put_leaves_no_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path(), "b");
        bucket
            .put("video1.mp4", Box::new(&b"abc"[..]), None, "video/mp4")
            .await
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(bucket.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["video1.mp4".to_string()]);
    }
}
