use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::BlobStore;
use quarry_common::error::{QuarryError, QuarryResult};

/// In-memory blob store for tests and local development.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> QuarryResult<()> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> QuarryResult<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| QuarryError::Storage(format!("no such blob: {bucket}/{key}")))
    }

    async fn exists(&self, bucket: &str, key: &str) -> QuarryResult<bool> {
        Ok(self
            .blobs
            .lock()
            .expect("blob map poisoned")
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn delete(&self, bucket: &str, key: &str) -> QuarryResult<()> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
