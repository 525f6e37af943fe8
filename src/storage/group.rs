use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::quota::directory_usage;
use super::store::{group_directory_name, wipe_directory, DISABLED_SENTINEL};
use crate::error::{Result, StoreError};

/// Marker file written into each group directory so enumeration can map the
/// hashed directory name back to the group identity.
pub(crate) const GROUP_IDENTITY_FILE: &str = "identity.dat";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GroupIdentity {
    pub group: String,
    pub application_id: String,
}

/// One group known to an isolation root, with its usage on disk.
#[derive(Debug, Clone)]
pub struct StoreGroup {
    pub group: String,
    pub application_id: String,
    pub used_size: u64,
}

impl StoreGroup {
    /// Lists the groups allocated under an isolation root. Directories
    /// without a readable identity marker are skipped; a missing isolation
    /// root yields an empty list.
    pub fn enumerate(isolation_root: &Path, block_size: u64) -> Result<Vec<StoreGroup>> {
        let reader = match fs::read_dir(isolation_root) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut groups = Vec::new();
        for entry in reader.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if entry.file_name().to_string_lossy() == DISABLED_SENTINEL {
                continue;
            }
            let Ok(body) = fs::read_to_string(entry.path().join(GROUP_IDENTITY_FILE)) else {
                continue;
            };
            let Ok(identity) = toml::from_str::<GroupIdentity>(&body) else {
                continue;
            };
            groups.push(StoreGroup {
                group: identity.group,
                application_id: identity.application_id,
                used_size: directory_usage(&entry.path(), block_size),
            });
        }
        Ok(groups)
    }

    /// Best-effort wipe of everything a group has stored, identity marker
    /// included. Partial failure surfaces only as an aggregate outcome.
    pub fn delete(isolation_root: &Path, group: &str) -> Result<()> {
        let group_dir = isolation_root.join(group_directory_name(group));
        if !group_dir.is_dir() {
            return Ok(());
        }
        let mut complete = wipe_directory(&group_dir);
        if fs::remove_dir(&group_dir).is_err() {
            complete = false;
        }
        if complete {
            Ok(())
        } else {
            Err(StoreError::RemoveIncomplete)
        }
    }
}
