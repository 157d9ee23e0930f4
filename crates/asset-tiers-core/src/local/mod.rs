//! Local filesystem tier.
//!
//! Assets live under one root directory. A key `imgs/<filename>` resolves to
//! `<root>/<filename>`, or to wherever the last inventory scan found that
//! filename in a subdirectory.

mod inventory;

pub use inventory::{InventoryScan, RejectedFile};

use crate::error::{AssetError, Result};
use crate::models::{content_type_for, filename_from_key, AssetPayload, HealthStatus, Tier, TierHealth};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Reads and writes assets under a local root.
#[derive(Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    /// filename -> path, from the last inventory scan.
    index: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root. Keys that escape the root are
    /// rejected.
    pub async fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(filename_from_key(key));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(AssetError::Validation {
                field: "key".into(),
                message: format!("'{}' does not name a file under the asset root", key),
            });
        }

        let direct = self.root.join(relative);
        let is_file = tokio::fs::metadata(&direct)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            return Ok(direct);
        }
        let indexed = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(relative.to_string_lossy().as_ref())
            .cloned();
        Ok(indexed.unwrap_or(direct))
    }

    /// Read an asset by key.
    pub async fn get(&self, key: &str) -> Result<AssetPayload> {
        let path = self.resolve(key).await?;
        let bytes = self.read_path(&path).await.map_err(|e| match e {
            AssetError::NotFound { .. } => AssetError::NotFound {
                tier: Tier::Local,
                key: key.to_string(),
            },
            other => other,
        })?;

        let last_modified = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        debug!(key, path = %path.display(), size = bytes.len(), "Read local asset");
        Ok(AssetPayload {
            key: key.to_string(),
            size: bytes.len() as u64,
            content_type: content_type_for(key).to_string(),
            bytes,
            last_modified,
            etag: None,
            source: Tier::Local,
        })
    }

    /// Read a file by path.
    pub async fn read_path(&self, path: &Path) -> Result<Bytes> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AssetError::NotFound {
                tier: Tier::Local,
                key: path.display().to_string(),
            }),
            Err(e) => Err(AssetError::io_with_path(e, path)),
        }
    }

    /// Write an asset by key, replacing any existing file atomically.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resolve(key).await?;
        self.write_path(&path, bytes).await?;
        info!(key, path = %path.display(), size = bytes.len(), "Wrote local asset");
        Ok(path)
    }

    /// Write to an explicit path. Goes through a temp file and a rename.
    pub async fn write_path(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AssetError::io_with_path(e, parent))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| AssetError::io_with_path(e, &temp))?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AssetError::io_with_path(e, path));
        }
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.resolve(key).await {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Healthy when the root directory is reachable.
    pub async fn health(&self) -> TierHealth {
        let started = Instant::now();
        let (status, message) = match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => (HealthStatus::Healthy, None),
            Ok(_) => (
                HealthStatus::Unhealthy,
                Some(format!("{} is not a directory", self.root.display())),
            ),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("{}: {}", self.root.display(), e)),
            ),
        };
        TierHealth {
            tier: Tier::Local,
            status,
            response_time_ms: started.elapsed().as_millis() as u64,
            message,
        }
    }

    /// Walk the root and build the asset inventory.
    ///
    /// Also refreshes the filename index used by [`resolve`](Self::resolve).
    pub async fn scan_inventory(&self) -> Result<InventoryScan> {
        let root = self.root.clone();
        let scan = tokio::task::spawn_blocking(move || inventory::scan(&root))
            .await
            .map_err(|e| AssetError::Io {
                message: format!("inventory scan task failed: {}", e),
                path: Some(self.root.clone()),
            })??;

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index.clear();
        for asset in &scan.assets {
            index.insert(asset.filename.clone(), asset.local_path.clone());
        }
        drop(index);

        info!(
            root = %self.root.display(),
            assets = scan.assets.len(),
            rejected = scan.rejected.len(),
            "Scanned local inventory"
        );
        Ok(scan)
    }
}
