//! In-process blob store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::blob::{Blob, BlobStore, Precondition};
use crate::error::{StorageError, StorageResult};

/// Blob store held in memory, used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Blob>>,
    version: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Blob>> {
        // A poisoned map is still structurally valid.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Blob>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
        precondition: Precondition,
    ) -> StorageResult<String> {
        let mut objects = self.lock();
        let current = objects.get(key).map(|b| b.etag.as_str());
        let allowed = match (&precondition, current) {
            (Precondition::None, _) => true,
            (Precondition::Absent, existing) => existing.is_none(),
            (Precondition::Matches(expected), Some(existing)) => expected == existing,
            (Precondition::Matches(_), None) => false,
        };
        if !allowed {
            return Err(StorageError::PreconditionFailed(key.to_string()));
        }

        let etag = format!("\"v{}\"", self.version.fetch_add(1, Ordering::SeqCst) + 1);
        objects.insert(
            key.to_string(),
            Blob {
                data,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_only_once() {
        let store = MemoryBlobStore::new();
        store
            .put("a", b"1".to_vec(), "text/plain", Precondition::Absent)
            .await
            .unwrap();
        let err = store
            .put("a", b"2".to_vec(), "text/plain", Precondition::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_matches_rejects_stale_etag() {
        let store = MemoryBlobStore::new();
        let first = store
            .put("a", b"1".to_vec(), "text/plain", Precondition::None)
            .await
            .unwrap();
        let second = store
            .put("a", b"2".to_vec(), "text/plain", Precondition::Matches(first.clone()))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert!(store
            .put("a", b"3".to_vec(), "text/plain", Precondition::Matches(first))
            .await
            .is_err());
        assert_eq!(store.get("a").await.unwrap().unwrap().data, b"2");
    }

    #[tokio::test]
    async fn test_list_prefix_sorted() {
        let store = MemoryBlobStore::new();
        for key in ["p/b", "p/a", "q/a"] {
            store
                .put(key, Vec::new(), "text/plain", Precondition::None)
                .await
                .unwrap();
        }
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/a", "p/b"]);
        store.delete("p/a").await.unwrap();
        store.delete("p/a").await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
