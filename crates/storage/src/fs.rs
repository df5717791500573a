use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::BlobStore;
use quarry_common::error::{QuarryError, QuarryResult};

/// Filesystem-backed blob store rooted at a data directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> QuarryResult<PathBuf> {
        // Reject traversal; keys are internally generated but cheap to check.
        if key.split('/').any(|part| part == ".." || part.is_empty()) || bucket.contains("..") {
            return Err(QuarryError::Validation(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

async fn ensure_parent(path: &Path) -> QuarryResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> QuarryResult<()> {
        let path = self.path_for(bucket, key)?;
        ensure_parent(&path).await?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        tracing::debug!(bucket, key, size = bytes.len(), "blob written");
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> QuarryResult<Vec<u8>> {
        let path = self.path_for(bucket, key)?;
        fs::read(&path)
            .await
            .map_err(|e| QuarryError::Storage(format!("{key}: {e}")))
    }

    async fn exists(&self, bucket: &str, key: &str) -> QuarryResult<bool> {
        let path = self.path_for(bucket, key)?;
        Ok(fs::try_exists(&path)
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?)
    }

    async fn delete(&self, bucket: &str, key: &str) -> QuarryResult<()> {
        let path = self.path_for(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuarryError::Storage(e.to_string())),
        }
    }
}
