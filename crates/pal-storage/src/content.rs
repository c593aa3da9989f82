//! Content-addressed payload storage held in memory.
//!
//! Payloads are stored as canonical JSON bytes under the SHA-256 of those
//! bytes, so uploading the same payload twice yields the same hash and a
//! single stored object.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use pal_contracts::error::{PalError, PalResult};
use pal_core::traits::ContentStorage;

/// Compute the content hash of `bytes`: `0x` followed by 64 lowercase hex
/// characters.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// A `ContentStorage` that keeps objects in process memory.
///
/// Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.objects.lock().contains_key(content_hash)
    }
}

#[async_trait]
impl ContentStorage for InMemoryContentStorage {
    async fn upload(&self, payload: &Value) -> PalResult<String> {
        let bytes = serde_json::to_vec(payload).map_err(|e| PalError::StorageUpload {
            reason: format!("payload is not serializable: {e}"),
        })?;
        let hash = content_hash(&bytes);
        debug!(content_hash = %hash, bytes = bytes.len(), "storing object");
        self.objects.lock().insert(hash.clone(), bytes);
        Ok(hash)
    }

    async fn download(&self, content_hash: &str) -> PalResult<Value> {
        let bytes = self
            .objects
            .lock()
            .get(content_hash)
            .cloned()
            .ok_or_else(|| PalError::StorageDownload {
                reason: format!("no object stored under {content_hash}"),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| PalError::StorageDownload {
            reason: format!("stored object is not valid JSON: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hash_is_prefixed_hex_sha256() {
        let hash = content_hash(b"abc");
        assert_eq!(
            hash,
            "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn upload_then_download_returns_payload() {
        let storage = InMemoryContentStorage::new();
        let payload = json!({ "type": "agent_logs", "entries": [1, 2, 3] });

        let hash = storage.upload(&payload).await.unwrap();
        assert!(storage.contains(&hash));
        assert_eq!(storage.download(&hash).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn identical_payloads_share_one_object() {
        let storage = InMemoryContentStorage::new();
        let a = storage.upload(&json!({ "k": 1 })).await.unwrap();
        let b = storage.upload(&json!({ "k": 1 })).await.unwrap();
        let c = storage.upload(&json!({ "k": 2 })).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn unknown_hash_is_a_download_error() {
        let storage = InMemoryContentStorage::new();
        let err = storage.download("0xmissing").await.unwrap_err();
        assert!(matches!(err, PalError::StorageDownload { .. }));
    }
}
