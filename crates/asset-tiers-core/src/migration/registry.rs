//! In-process table of asset records keyed by remote key.
//!
//! Every state change goes through the [`Asset`] transition methods, so the
//! `local -> migrating -> {remote | error}` order and the remote-key
//! invariant hold for every record in the table.

use crate::error::{AssetError, Result};
use crate::models::{Asset, MigrationState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Number of assets per migration state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub local: usize,
    pub migrating: usize,
    pub remote: usize,
    pub error: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.local + self.migrating + self.remote + self.error
    }
}

#[derive(Default)]
pub struct AssetRegistry {
    assets: RwLock<BTreeMap<String, Asset>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Asset>> {
        self.assets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Asset>> {
        self.assets.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a new record. Fails if its remote key is already taken.
    pub fn register(&self, asset: Asset) -> Result<String> {
        asset.validate()?;
        let key = asset.target_remote_key()?;
        let mut assets = self.write();
        if let Some(existing) = assets.get(&key) {
            return Err(AssetError::Validation {
                field: "filename".into(),
                message: format!(
                    "{} and {} both map to {}",
                    existing.local_path.display(),
                    asset.local_path.display(),
                    key
                ),
            });
        }
        assets.insert(key.clone(), asset);
        Ok(key)
    }

    /// Merge a fresh inventory scan.
    ///
    /// Known keys keep their migration state; new keys are added as
    /// `local`. Returns the conflicts that could not be registered.
    pub fn merge_inventory(&self, scanned: Vec<Asset>) -> Vec<AssetError> {
        let mut conflicts = Vec::new();
        for asset in scanned {
            let key = match asset.target_remote_key() {
                Ok(key) => key,
                Err(e) => {
                    conflicts.push(e);
                    continue;
                }
            };
            let known = self
                .read()
                .get(&key)
                .map(|existing| existing.local_path == asset.local_path);
            match known {
                Some(true) => continue,
                Some(false) | None => {
                    if let Err(e) = self.register(asset) {
                        warn!(key = %key, error = %e, "Skipping conflicting asset");
                        conflicts.push(e);
                    }
                }
            }
        }
        conflicts
    }

    pub fn get(&self, key: &str) -> Option<Asset> {
        self.read().get(key).cloned()
    }

    /// Stamp `last_accessed` on a served asset. Unregistered keys are ignored.
    pub fn touch(&self, key: &str) -> bool {
        match self.write().get_mut(key) {
            Some(asset) => {
                asset.touch();
                true
            }
            None => false,
        }
    }

    /// All records, ordered by key.
    pub fn all(&self) -> Vec<Asset> {
        self.read().values().cloned().collect()
    }

    pub fn keys_in_state(&self, state: MigrationState) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, asset)| asset.migration_state == state)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn counts(&self) -> StateCounts {
        self.read()
            .values()
            .fold(StateCounts::default(), |mut counts, asset| {
                match asset.migration_state {
                    MigrationState::Local => counts.local += 1,
                    MigrationState::Migrating => counts.migrating += 1,
                    MigrationState::Remote => counts.remote += 1,
                    MigrationState::Error => counts.error += 1,
                }
                counts
            })
    }

    fn update<T>(&self, key: &str, f: impl FnOnce(&mut Asset) -> Result<T>) -> Result<T> {
        let mut assets = self.write();
        let asset = assets.get_mut(key).ok_or_else(|| AssetError::MigrationItem {
            key: key.to_string(),
            message: "asset is not registered".into(),
        })?;
        f(asset)
    }

    /// `local -> migrating`.
    pub fn begin_migration(&self, key: &str) -> Result<()> {
        self.update(key, |asset| asset.begin_migration(key.to_string()))?;
        debug!(key, "Asset migrating");
        Ok(())
    }

    /// `migrating -> remote`.
    pub fn complete_migration(&self, key: &str, remote_url: String) -> Result<()> {
        self.update(key, |asset| asset.complete_migration(remote_url))
    }

    /// `migrating -> error`.
    pub fn fail_migration(&self, key: &str) -> Result<()> {
        self.update(key, |asset| asset.fail_migration())
    }

    /// Explicit reset to `local`. Returns the record as it was before.
    pub fn rollback(&self, key: &str) -> Result<Asset> {
        self.update(key, |asset| {
            let before = asset.clone();
            asset.rollback();
            Ok(before)
        })
    }
}
