//! Blob store port.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Stored object with its entity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub etag: String,
}

/// Condition a write must satisfy to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally.
    None,
    /// Only create; fail if the key exists.
    Absent,
    /// Only overwrite the version carrying this etag.
    Matches(String),
}

/// Durable object storage.
///
/// `put` with a precondition is the only coordination primitive the pipeline
/// needs: leases and checkpoints are read-modify-write cycles guarded by the
/// etag of the version that was read. A failed precondition surfaces as
/// `StorageError::PreconditionFailed`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object, `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Blob>>;

    /// Store an object, returning the new etag.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        precondition: Precondition,
    ) -> StorageResult<String>;

    /// Remove an object. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> StorageResult<Option<Blob>> {
        (**self).get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        precondition: Precondition,
    ) -> StorageResult<String> {
        (**self).put(key, data, content_type, precondition).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).list(prefix).await
    }
}
