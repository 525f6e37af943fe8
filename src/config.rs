use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::storage::quota::DEFAULT_BLOCK_SIZE;

/// Crate-wide configuration for the storage engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the directory under which all isolation roots live.
    /// `None` falls back to a per-user default.
    pub root: Option<PathBuf>,
    /// Name of the isolation folder created under the user root.
    pub folder_name: String,
    /// Granularity to which quota and usage figures are rounded.
    pub block_size: u64,
    /// Quota applied to newly seen groups. `None` means unbounded.
    pub default_quota: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            folder_name: "IsolatedStore".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            default_quota: None,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let mut config = Self::default();

        if let Ok(root) = std::env::var("ISOSTORE_ROOT") {
            config.root = Some(PathBuf::from(root));
        }
        if let Ok(name) = std::env::var("ISOSTORE_FOLDER") {
            config.folder_name = name;
        }
        if let Ok(block) = std::env::var("ISOSTORE_BLOCK_SIZE") {
            config.block_size = block
                .parse()
                .map_err(|_| StoreError::config(format!("Invalid ISOSTORE_BLOCK_SIZE: {block}")))?;
        }
        if let Ok(quota) = std::env::var("ISOSTORE_QUOTA") {
            config.default_quota = Some(
                quota
                    .parse()
                    .map_err(|_| StoreError::config(format!("Invalid ISOSTORE_QUOTA: {quota}")))?,
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file (isostore.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StorageConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(StoreError::config("Block size cannot be 0"));
        }

        if self.folder_name.is_empty() {
            return Err(StoreError::config("Folder name cannot be empty"));
        }

        if self.folder_name.contains(|c| c == '/' || c == '\\') {
            return Err(StoreError::config(
                "Folder name cannot contain path separators",
            ));
        }

        if let Some(quota) = self.default_quota {
            if quota < self.block_size {
                return Err(StoreError::config(format!(
                    "Default quota {quota} is below one block ({})",
                    self.block_size
                )));
            }
        }

        Ok(())
    }
}
