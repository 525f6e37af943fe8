use std::path::PathBuf;

use parking_lot::RwLock;

use crate::config::StorageConfig;
use crate::error::Result;

/// External authority consulted when a sandbox root is resolved or a quota
/// change is negotiated. Ordinary file I/O never goes through the resolver;
/// it is authorized against the path scope cached at store-open time.
pub trait SecurityResolver: Send + Sync {
    /// Absolute directory under which all isolation roots live.
    fn root_user_directory(&self) -> Result<PathBuf>;

    /// Group identity and application id for the calling application.
    fn group_and_id(&self) -> Result<(String, String)>;

    /// Authoritative quota for a group, in bytes. `None` means unbounded.
    fn quota(&self, group: &str) -> Result<Option<u64>>;

    /// Ask the host to raise a group's quota. Returns whether it was granted.
    fn increase_quota(&self, group: &str, new_quota: u64, used_size: u64) -> Result<bool>;

    /// Free space the host has already computed, if it tracks one.
    fn available_free_space(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Override for the isolation folder name.
    fn storage_folder_name(&self) -> Option<String> {
        None
    }
}

/// Host-side resolver: root directory from the configuration, identity fixed
/// at construction, quota kept in memory. Tests substitute their own
/// [`SecurityResolver`] with a temporary root.
pub struct HostResolver {
    root: PathBuf,
    group: String,
    application_id: String,
    quota: RwLock<Option<u64>>,
}

impl HostResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        group: impl Into<String>,
        application_id: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            group: group.into(),
            application_id: application_id.into(),
            quota: RwLock::new(None),
        }
    }

    pub fn from_config(
        config: &StorageConfig,
        group: impl Into<String>,
        application_id: impl Into<String>,
    ) -> Self {
        let root = config.root.clone().unwrap_or_else(Self::default_root);
        let resolver = Self::new(root, group, application_id);
        *resolver.quota.write() = config.default_quota;
        resolver
    }

    pub fn with_quota(self, quota: u64) -> Self {
        *self.quota.write() = Some(quota);
        self
    }

    fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local").join("share"))
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl SecurityResolver for HostResolver {
    fn root_user_directory(&self) -> Result<PathBuf> {
        Ok(self.root.clone())
    }

    fn group_and_id(&self) -> Result<(String, String)> {
        Ok((self.group.clone(), self.application_id.clone()))
    }

    fn quota(&self, _group: &str) -> Result<Option<u64>> {
        Ok(*self.quota.read())
    }

    fn increase_quota(&self, group: &str, new_quota: u64, used_size: u64) -> Result<bool> {
        // The host policy here is permissive: grant anything that still
        // covers what is already on disk.
        if new_quota < used_size {
            return Ok(false);
        }
        tracing::info!("Raising quota for group {} to {}", group, new_quota);
        *self.quota.write() = Some(new_quota);
        Ok(true)
    }
}
