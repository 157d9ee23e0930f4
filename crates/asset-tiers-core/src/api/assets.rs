//! Asset retrieval, storage and tier health.

use crate::error::{AssetError, Result};
use crate::models::{
    content_type_for, remote_key_for, AssetPayload, ExistsReport, HealthReport, PutOutcome,
    MAX_ASSET_BYTES,
};
use crate::AssetDelivery;
use bytes::Bytes;
use std::path::Path;

impl AssetDelivery {
    /// Fetch an asset through the tier chain (remote, cache, local).
    pub async fn get_asset(&self, key: &str) -> Result<AssetPayload> {
        let payload = self.service.get_asset(key).await?;
        self.pipeline.registry().touch(key);
        Ok(payload)
    }

    /// Serve from cache, refreshing near-expiry entries in the background.
    pub async fn get_asset_with_refresh(&self, key: &str) -> Result<AssetPayload> {
        let payload = self.service.get_asset_with_refresh(key).await?;
        self.pipeline.registry().touch(key);
        Ok(payload)
    }

    /// Store an asset under `key` (`imgs/<filename>`).
    pub async fn put_asset(
        &self,
        key: &str,
        bytes: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<PutOutcome> {
        self.service.put_asset(key, bytes.into(), content_type).await
    }

    /// Store a file from disk under the key derived from its filename.
    pub async fn put_file(&self, path: impl AsRef<Path>) -> Result<PutOutcome> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AssetError::Validation {
                field: "path".to_string(),
                message: format!("{} has no usable filename", path.display()),
            })?;
        let key = remote_key_for(filename)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AssetError::io_with_path(e, path))?;
        if bytes.len() as u64 > MAX_ASSET_BYTES {
            return Err(AssetError::Validation {
                field: "size".to_string(),
                message: format!(
                    "{} is {} bytes, limit is {}",
                    path.display(),
                    bytes.len(),
                    MAX_ASSET_BYTES
                ),
            });
        }

        self.service
            .put_asset(&key, Bytes::from(bytes), content_type_for(filename))
            .await
    }

    /// Which tiers currently hold `key`.
    pub async fn exists(&self, key: &str) -> ExistsReport {
        self.service.image_exists(key).await
    }

    /// Drop a cached copy. Returns whether one was present.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        self.service.invalidate(key)
    }

    /// Check every enabled tier.
    pub async fn health(&self) -> HealthReport {
        self.service.get_health_status().await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DeliveryConfig;
    use crate::error::AssetError;
    use crate::models::Tier;
    use crate::{AssetDelivery, AssetDeliveryBuilder};
    use tempfile::TempDir;

    async fn delivery(dir: &TempDir) -> AssetDelivery {
        AssetDeliveryBuilder::new(DeliveryConfig {
            local_root: dir.path().join("imgs"),
            ..DeliveryConfig::default()
        })
        .auto_create_dirs(true)
        .build()
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_file_then_get() {
        let dir = TempDir::new().unwrap();
        let delivery = delivery(&dir).await;
        let source = dir.path().join("hero.png");
        std::fs::write(&source, b"png bytes").unwrap();

        let outcome = delivery.put_file(&source).await.unwrap();
        assert_eq!(outcome.key, "imgs/hero.png");
        assert!(outcome.tiers_written.contains(&Tier::Local));

        let payload = delivery.get_asset("imgs/hero.png").await.unwrap();
        assert_eq!(&payload.bytes[..], b"png bytes");
        assert_eq!(payload.content_type, "image/png");
        assert!(delivery.exists("imgs/hero.png").await.local);
    }

    #[tokio::test]
    async fn test_put_file_rejects_bad_filename() {
        let dir = TempDir::new().unwrap();
        let delivery = delivery(&dir).await;
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"text").unwrap();

        let err = delivery.put_file(&source).await.unwrap_err();
        assert!(matches!(err, AssetError::Validation { .. }));
    }
}
