//! Local inventory scanning.

use crate::error::{AssetError, Result};
use crate::models::{Asset, ASSET_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A file with an asset extension that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of walking the local root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryScan {
    /// Valid assets, sorted by logical path.
    pub assets: Vec<Asset>,
    pub rejected: Vec<RejectedFile>,
}

fn has_asset_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ASSET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn logical_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root`, keeping only files with a recognised extension.
pub(crate) fn scan(root: &Path) -> Result<InventoryScan> {
    if !root.is_dir() {
        return Err(AssetError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::NotFound, "asset root is not a directory"),
            root,
        ));
    }

    let mut scan = InventoryScan::default();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !has_asset_extension(path) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                scan.rejected.push(RejectedFile {
                    path: path.to_path_buf(),
                    reason: format!("cannot stat: {}", e),
                });
                continue;
            }
        };

        let (width, height) = match image::image_dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable image header");
                scan.rejected.push(RejectedFile {
                    path: path.to_path_buf(),
                    reason: format!("unreadable image: {}", e),
                });
                continue;
            }
        };

        match Asset::new_local(path, logical_path(root, path), size, width, height) {
            Ok(asset) => scan.assets.push(asset),
            Err(e) => scan.rejected.push(RejectedFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    scan.assets
        .sort_by(|a, b| a.logical_path.cmp(&b.logical_path));
    debug!(
        root = %root.display(),
        assets = scan.assets.len(),
        rejected = scan.rejected.len(),
        "Inventory walk complete"
    );
    Ok(scan)
}
