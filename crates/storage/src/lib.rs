pub mod fs;
pub mod memory;

use async_trait::async_trait;
use quarry_common::error::QuarryResult;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Content-addressed blob storage consumed by the sync engine.
///
/// Keys are connector-scoped paths built by the caller; the store itself is
/// dumb bucket+key I/O.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> QuarryResult<()>;
    async fn download(&self, bucket: &str, key: &str) -> QuarryResult<Vec<u8>>;
    async fn exists(&self, bucket: &str, key: &str) -> QuarryResult<bool>;
    async fn delete(&self, bucket: &str, key: &str) -> QuarryResult<()>;
}

/// Storage key for a document blob.
///
/// Two-level hash prefix keeps directories small on filesystem-backed
/// stores: `{connector_id}/{hash[0..2]}/{hash}`.
pub fn blob_key(connector_id: &str, content_hash: &str) -> String {
    let prefix = if content_hash.len() >= 2 {
        &content_hash[..2]
    } else {
        content_hash
    };
    format!("{connector_id}/{prefix}/{content_hash}")
}
