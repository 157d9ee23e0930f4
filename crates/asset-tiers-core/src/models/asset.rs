//! Asset identity, naming conventions and the migration state machine.

use crate::error::{AssetError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Prefix every remote object key carries.
pub const REMOTE_KEY_PREFIX: &str = "imgs/";

/// Largest accepted asset payload (10 MiB).
pub const MAX_ASSET_BYTES: u64 = 10 * 1024 * 1024;

/// Largest accepted width or height in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Extensions recognised as assets.
pub const ASSET_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+\.(jpg|jpeg|png|webp)$").expect("asset filename regex must compile")
});

/// Image encoding of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Jpeg,
    Png,
    Webp,
}

impl AssetFormat {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(AssetFormat::Jpeg),
            "png" => Some(AssetFormat::Png),
            "webp" => Some(AssetFormat::Webp),
            _ => None,
        }
    }

    /// Detect the format from a path or key.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AssetFormat::Jpeg => "image/jpeg",
            AssetFormat::Png => "image/png",
            AssetFormat::Webp => "image/webp",
        }
    }
}

/// Content type for a key, falling back to `application/octet-stream`.
pub fn content_type_for(key: &str) -> &'static str {
    AssetFormat::from_path(key)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream")
}

/// Check a bare filename against the asset naming convention.
pub fn is_valid_filename(filename: &str) -> bool {
    FILENAME_PATTERN.is_match(filename)
}

/// Build the remote object key (`imgs/<filename>`) for a filename.
pub fn remote_key_for(filename: &str) -> Result<String> {
    if !is_valid_filename(filename) {
        return Err(AssetError::Validation {
            field: "filename".into(),
            message: format!("'{}' does not match the asset naming convention", filename),
        });
    }
    Ok(format!("{}{}", REMOTE_KEY_PREFIX, filename))
}

/// Strip the remote prefix from a key, leaving the bare filename.
pub fn filename_from_key(key: &str) -> &str {
    key.strip_prefix(REMOTE_KEY_PREFIX).unwrap_or(key)
}

/// Public URL for an object key under a public base URL.
pub fn public_url_for(public_base_url: &str, key: &str) -> String {
    format!("{}/{}", public_base_url.trim_end_matches('/'), key)
}

/// Migration lifecycle of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Local,
    Migrating,
    Remote,
    Error,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Local => "local",
            MigrationState::Migrating => "migrating",
            MigrationState::Remote => "remote",
            MigrationState::Error => "error",
        }
    }

    /// Forward transitions only: `local -> migrating -> {remote | error}`.
    ///
    /// Rollback to `local` is not a forward transition and goes through
    /// [`Asset::rollback`].
    pub fn can_transition_to(&self, next: MigrationState) -> bool {
        matches!(
            (self, next),
            (MigrationState::Local, MigrationState::Migrating)
                | (MigrationState::Migrating, MigrationState::Remote)
                | (MigrationState::Migrating, MigrationState::Error)
        )
    }

    /// Whether a remote key must be present in this state.
    pub fn has_remote_key(&self) -> bool {
        matches!(self, MigrationState::Migrating | MigrationState::Remote)
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity and location of one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub filename: String,
    /// Path relative to the local inventory root.
    pub logical_path: String,
    pub format: AssetFormat,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub alt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub local_path: PathBuf,
    pub migration_state: MigrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Create a `local` asset record, validating naming, size and dimensions.
    pub fn new_local(
        local_path: impl Into<PathBuf>,
        logical_path: impl Into<String>,
        size: u64,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let local_path = local_path.into();
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AssetError::Validation {
                field: "filename".into(),
                message: format!("{} has no usable file name", local_path.display()),
            })?
            .to_string();

        let format = AssetFormat::from_path(&filename).ok_or_else(|| AssetError::Validation {
            field: "format".into(),
            message: format!("unsupported extension on {}", filename),
        })?;

        let now = Utc::now();
        let asset = Self {
            id: uuid::Uuid::new_v4().to_string(),
            alt_text: alt_text_from_filename(&filename),
            filename,
            logical_path: logical_path.into(),
            format,
            size,
            width,
            height,
            remote_key: None,
            remote_url: None,
            local_path,
            migration_state: MigrationState::Local,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        };
        asset.validate()?;
        Ok(asset)
    }

    /// Check the data-model constraints.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_filename(&self.filename) {
            return Err(AssetError::Validation {
                field: "filename".into(),
                message: format!("'{}' does not match the asset naming convention", self.filename),
            });
        }
        if self.size == 0 || self.size > MAX_ASSET_BYTES {
            return Err(AssetError::Validation {
                field: "size".into(),
                message: format!("{} bytes is outside 1..={}", self.size, MAX_ASSET_BYTES),
            });
        }
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(AssetError::Validation {
                    field: field.into(),
                    message: format!("{} is outside 1..={}", value, MAX_DIMENSION),
                });
            }
        }
        if self.remote_key.is_some() != self.migration_state.has_remote_key() {
            return Err(AssetError::Validation {
                field: "remoteKey".into(),
                message: format!(
                    "remote key presence does not match state {}",
                    self.migration_state
                ),
            });
        }
        Ok(())
    }

    /// Remote object key this asset migrates to.
    pub fn target_remote_key(&self) -> Result<String> {
        remote_key_for(&self.filename)
    }

    /// `local -> migrating`, assigning the remote key.
    pub fn begin_migration(&mut self, remote_key: String) -> Result<()> {
        self.transition(MigrationState::Migrating)?;
        self.remote_key = Some(remote_key);
        Ok(())
    }

    /// `migrating -> remote`, recording the public URL.
    pub fn complete_migration(&mut self, remote_url: String) -> Result<()> {
        self.transition(MigrationState::Remote)?;
        self.remote_url = Some(remote_url);
        Ok(())
    }

    /// `migrating -> error`; the remote key is dropped with the state.
    pub fn fail_migration(&mut self) -> Result<()> {
        self.transition(MigrationState::Error)?;
        self.remote_key = None;
        self.remote_url = None;
        Ok(())
    }

    /// Explicit rollback to `local`. Never touches remote data.
    pub fn rollback(&mut self) {
        self.migration_state = MigrationState::Local;
        self.remote_key = None;
        self.remote_url = None;
        self.updated_at = Utc::now();
    }

    /// Record an access for bookkeeping.
    pub fn touch(&mut self) {
        self.last_accessed = Some(Utc::now());
    }

    fn transition(&mut self, next: MigrationState) -> Result<()> {
        if !self.migration_state.can_transition_to(next) {
            return Err(AssetError::InvalidTransition {
                key: self.filename.clone(),
                from: self.migration_state.to_string(),
                to: next.to_string(),
            });
        }
        self.migration_state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Derive readable alt text from a file name (`team-photo_2.jpg` -> `team photo 2`).
fn alt_text_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    stem.replace(['-', '_', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        Asset::new_local("/srv/images/hero-banner.jpg", "hero-banner.jpg", 2048, 800, 600).unwrap()
    }

    #[test]
    fn test_filename_pattern() {
        assert!(is_valid_filename("hero.jpg"));
        assert!(is_valid_filename("team_photo-2.webp"));
        assert!(!is_valid_filename("hero.gif"));
        assert!(!is_valid_filename("nested/hero.png"));
        assert!(!is_valid_filename("with space.png"));
    }

    #[test]
    fn test_remote_key_convention() {
        assert_eq!(remote_key_for("hero.png").unwrap(), "imgs/hero.png");
        assert!(remote_key_for("../hero.png").is_err());
        assert_eq!(filename_from_key("imgs/hero.png"), "hero.png");
        assert_eq!(
            public_url_for("https://cdn.example.com/", "imgs/hero.png"),
            "https://cdn.example.com/imgs/hero.png"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("imgs/a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("imgs/a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("imgs/a.webp"), "image/webp");
        assert_eq!(content_type_for("imgs/a.bin"), "application/octet-stream");
    }

    #[test]
    fn test_new_local_validates_bounds() {
        assert!(Asset::new_local("/x/a.png", "a.png", 0, 10, 10).is_err());
        assert!(Asset::new_local("/x/a.png", "a.png", MAX_ASSET_BYTES + 1, 10, 10).is_err());
        assert!(Asset::new_local("/x/a.png", "a.png", 10, 0, 10).is_err());
        assert!(Asset::new_local("/x/a.png", "a.png", 10, 10, MAX_DIMENSION + 1).is_err());
        assert!(Asset::new_local("/x/a.png", "a.png", MAX_ASSET_BYTES, 1, MAX_DIMENSION).is_ok());
    }

    #[test]
    fn test_alt_text() {
        assert_eq!(sample_asset().alt_text, "hero banner");
        assert_eq!(alt_text_from_filename("team_photo--2.png"), "team photo 2");
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut asset = sample_asset();
        asset.begin_migration("imgs/hero-banner.jpg".into()).unwrap();
        assert_eq!(asset.migration_state, MigrationState::Migrating);
        assert!(asset.validate().is_ok());

        asset
            .complete_migration("https://cdn.example.com/imgs/hero-banner.jpg".into())
            .unwrap();
        assert_eq!(asset.migration_state, MigrationState::Remote);
        assert!(asset.validate().is_ok());
    }

    #[test]
    fn test_state_machine_rejects_skips_and_reversals() {
        let mut asset = sample_asset();
        assert!(asset.complete_migration("u".into()).is_err());
        assert!(asset.fail_migration().is_err());

        asset.begin_migration("imgs/hero-banner.jpg".into()).unwrap();
        assert!(asset.begin_migration("imgs/hero-banner.jpg".into()).is_err());

        asset.fail_migration().unwrap();
        assert_eq!(asset.migration_state, MigrationState::Error);
        assert!(asset.remote_key.is_none());
        assert!(asset.validate().is_ok());
        assert!(asset.complete_migration("u".into()).is_err());
    }

    #[test]
    fn test_rollback_resets_to_local() {
        let mut asset = sample_asset();
        asset.begin_migration("imgs/hero-banner.jpg".into()).unwrap();
        asset.complete_migration("u".into()).unwrap();
        asset.rollback();
        assert_eq!(asset.migration_state, MigrationState::Local);
        assert!(asset.remote_key.is_none());
        assert!(asset.validate().is_ok());
    }
}
