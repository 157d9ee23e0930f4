//! Map-backed object store with failure injection.

use super::store::{ObjectData, ObjectStore, ObjectSummary, RemoteHealth};
use crate::error::{AssetError, Result};
use crate::models::{public_url_for, Tier};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// An object store that keeps everything in process memory.
///
/// Failure injection covers the two behaviours the retrieval service reacts
/// to: a store that errors (`set_unavailable`) and a store that is slow
/// (`set_delay`, which composes with tier timeouts).
pub struct InMemoryObjectStore {
    public_base_url: String,
    objects: Mutex<BTreeMap<String, ObjectData>>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    get_calls: AtomicU64,
    put_calls: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
            delay: Mutex::new(None),
            get_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, ObjectData>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every call fail with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleep before answering each call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects().len()
    }

    /// Seed an object without counting a put.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>, content_type: &str) {
        let bytes = bytes.into();
        self.objects()
            .insert(key.into(), object_data(bytes, content_type));
    }

    async fn gate(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AssetError::unavailable(
                Tier::Remote,
                "in-memory store marked unavailable",
            ));
        }
        Ok(())
    }
}

fn object_data(bytes: Bytes, content_type: &str) -> ObjectData {
    ObjectData {
        size: bytes.len() as u64,
        etag: Some(hex::encode(&Sha256::digest(&bytes)[..16])),
        bytes,
        content_type: content_type.to_string(),
        last_modified: Utc::now(),
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<ObjectData> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| AssetError::NotFound {
                tier: Tier::Remote,
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.objects()
            .insert(key.to_string(), object_data(bytes, content_type));
        Ok(self.public_url(key))
    }

    async fn exists(&self, key: &str) -> bool {
        if self.gate().await.is_err() {
            return false;
        }
        self.objects().contains_key(key)
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>> {
        self.gate().await?;
        Ok(self
            .objects()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .take(max_keys)
            .map(|(key, data)| ObjectSummary {
                key: key.clone(),
                size: data.size,
                etag: data.etag.clone(),
                last_modified: Some(data.last_modified),
            })
            .collect())
    }

    async fn health(&self) -> RemoteHealth {
        let started = tokio::time::Instant::now();
        match self.gate().await {
            Ok(()) => RemoteHealth::from_latency(started.elapsed()),
            Err(e) => RemoteHealth::failed(started.elapsed(), e.to_string()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = InMemoryObjectStore::new("https://cdn.example.com/");
        let url = store
            .put("imgs/a.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/imgs/a.png");
        store.insert("other/b.png", &b"x"[..], "image/png");

        let object = store.get("imgs/a.png").await.unwrap();
        assert_eq!(object.bytes, Bytes::from_static(b"png"));
        assert_eq!(object.size, 3);
        assert!(store.exists("imgs/a.png").await);

        let listed = store.list("imgs/", 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "imgs/a.png");
        assert_eq!(store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = InMemoryObjectStore::new("https://cdn.example.com");
        let err = store.get("imgs/none.png").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryObjectStore::new("https://cdn.example.com");
        store.insert("imgs/a.png", &b"png"[..], "image/png");
        store.set_unavailable(true);

        assert!(matches!(
            store.get("imgs/a.png").await,
            Err(AssetError::StorageUnavailable { .. })
        ));
        assert!(!store.exists("imgs/a.png").await);
        assert_eq!(store.health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_reports_degraded() {
        let store = InMemoryObjectStore::new("https://cdn.example.com");
        store.set_delay(Some(Duration::from_millis(1500)));
        assert_eq!(store.health().await.status, HealthStatus::Degraded);
    }
}
