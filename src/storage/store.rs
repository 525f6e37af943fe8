use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use globset::Glob;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::alloc::DirectoryAllocator;
use super::gate::PathScope;
use super::group::{GroupIdentity, GROUP_IDENTITY_FILE};
use super::path;
use super::quota::{self, QuotaModel};
use super::stream::{FileAccess, IsolatedStoreStream, OpenMode};
use crate::config::StorageConfig;
use crate::error::{Result, StoreError};
use crate::resolver::SecurityResolver;

/// A file with this name at the isolation root turns the whole feature off.
pub const DISABLED_SENTINEL: &str = "disabled.dat";

#[derive(Debug, Default)]
struct Lifecycle {
    closed: bool,
    disposed: bool,
}

/// One application's sandbox: a root directory resolved once at open time,
/// with every later operation virtualized and authorized beneath it.
///
/// The root and the permitted scope are immutable for the lifetime of the
/// store. Closing suppresses further operations but leaves the sandbox
/// contents on disk; only [`IsolatedStore::remove`] deletes them.
pub struct IsolatedStore {
    isolation_root: PathBuf,
    root: PathBuf,
    group: String,
    application_id: String,
    scope: PathScope,
    quota: QuotaModel,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for IsolatedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedStore")
            .field("group", &self.group)
            .field("application_id", &self.application_id)
            .field("root", &self.root)
            .field("lifecycle", &*self.lifecycle.lock())
            .finish_non_exhaustive()
    }
}

impl IsolatedStore {
    /// Resolves (or creates) the sandbox for the calling application and
    /// opens a store over it.
    ///
    /// The resolver supplies the user root, the isolation folder name and
    /// the group identity; the group hash names the group directory and the
    /// allocator recovers or creates the random two-level sandbox beneath
    /// it. Opening is idempotent with respect to the directory tree.
    pub fn open(resolver: Arc<dyn SecurityResolver>, config: &StorageConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let user_root = resolver.root_user_directory().map_err(|e| {
            StoreError::unavailable(format!("security resolver supplied no root directory: {e}"))
        })?;
        let folder_name = resolver
            .storage_folder_name()
            .unwrap_or_else(|| config.folder_name.clone());
        let isolation_root = user_root.join(folder_name);

        fs::create_dir_all(&isolation_root).map_err(|e| {
            StoreError::unavailable(format!("cannot create the isolation root: {e}"))
        })?;

        if is_disabled(&isolation_root) {
            return Err(StoreError::Disabled);
        }

        let (group, application_id) = resolver.group_and_id()?;
        let group_dir = isolation_root.join(group_directory_name(&group));
        fs::create_dir_all(&group_dir).map_err(|e| {
            StoreError::unavailable(format!("cannot create the group directory: {e}"))
        })?;
        record_group_identity(&group_dir, &group, &application_id)?;

        let relative = match DirectoryAllocator::find_existing(&group_dir) {
            Some(existing) => {
                debug!("Recovered existing sandbox allocation for group {}", group);
                existing
            }
            None => DirectoryAllocator::create_random(&group_dir)?,
        };

        let scope = PathScope::new(&group_dir.join(relative))?;
        let root = scope.root().to_path_buf();
        let quota = QuotaModel::new(config.block_size, group.clone(), resolver);

        info!("Opened isolated store for group {}", group);
        Ok(Arc::new(Self {
            isolation_root,
            root,
            group,
            application_id,
            scope,
            quota,
            lifecycle: Mutex::new(Lifecycle::default()),
        }))
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn block_size(&self) -> u64 {
        self.quota.block_size()
    }

    /// Checked at the top of every public operation, in this order:
    /// disposed, closed, root vanished from disk, feature disabled.
    pub(crate) fn ensure_valid(&self) -> Result<()> {
        {
            let lifecycle = self.lifecycle.lock();
            if lifecycle.disposed {
                return Err(StoreError::Disposed);
            }
            if lifecycle.closed {
                return Err(StoreError::StoreNotOpen);
            }
        }
        if !self.root.is_dir() {
            return Err(StoreError::StoreDeleted);
        }
        if is_disabled(&self.isolation_root) {
            return Err(StoreError::Disabled);
        }
        Ok(())
    }

    /// Virtualizes a caller path and authorizes it against the scope.
    pub(crate) fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if relative.is_empty() {
            return Err(StoreError::invalid_argument("path must not be empty"));
        }
        let candidate = path::resolve(&self.root, relative);
        self.scope.authorize(&candidate)
    }

    // ---- file operations ----

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        self.ensure_valid()?;
        Ok(self.resolve(path)?.is_file())
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.ensure_valid()?;
        let full = self.resolve(path)?;
        fs::remove_file(full).map_err(|e| StoreError::operation_failed("delete file", path, e))
    }

    pub fn copy_file(&self, source: &str, destination: &str) -> Result<()> {
        self.copy_file_overwrite(source, destination, false)
    }

    pub fn copy_file_overwrite(
        &self,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> Result<()> {
        self.ensure_valid()?;
        // Both endpoints are authorized before the filesystem is touched.
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;

        if !from.is_file() {
            return Err(not_found("copy file", source));
        }
        if !overwrite && to.exists() {
            return Err(StoreError::operation_failed(
                "copy file",
                destination,
                io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists"),
            ));
        }

        fs::copy(&from, &to)
            .map(drop)
            .map_err(|e| StoreError::operation_failed("copy file", destination, e))
    }

    pub fn move_file(&self, source: &str, destination: &str) -> Result<()> {
        self.ensure_valid()?;
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;

        if !from.is_file() {
            return Err(not_found("move file", source));
        }

        fs::rename(&from, &to)
            .map_err(|e| StoreError::operation_failed("move file", destination, e))
    }

    // ---- directory operations ----

    pub fn directory_exists(&self, path: &str) -> Result<bool> {
        self.ensure_valid()?;
        Ok(self.resolve(path)?.is_dir())
    }

    /// Creates a directory, including any missing ancestors.
    ///
    /// The missing-ancestor chain is collected root-to-leaf; on failure the
    /// rollback deletes the *first* entry recursively, which removes
    /// everything created beneath it. The rollback is best-effort.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.ensure_valid()?;
        let full = self.resolve(path)?;

        if full.is_dir() {
            return Ok(());
        }

        let mut missing: Vec<PathBuf> = Vec::new();
        for ancestor in full.ancestors() {
            if !ancestor.starts_with(&self.root) || ancestor == self.root {
                break;
            }
            if ancestor.exists() {
                break;
            }
            missing.push(ancestor.to_path_buf());
        }
        // ancestors() walks leaf-to-root; the rollback ordering needs the
        // opposite.
        missing.reverse();

        if let Err(e) = fs::create_dir_all(&full) {
            if let Some(first_created) = missing.first() {
                if let Err(rollback) = fs::remove_dir_all(first_created) {
                    warn!(
                        "Rollback after failed directory creation was incomplete: {}",
                        rollback
                    );
                }
            }
            return Err(StoreError::operation_failed("create directory", path, e));
        }
        Ok(())
    }

    /// Deletes a single, empty directory.
    pub fn delete_directory(&self, path: &str) -> Result<()> {
        self.ensure_valid()?;
        let full = self.resolve(path)?;
        fs::remove_dir(full).map_err(|e| StoreError::operation_failed("delete directory", path, e))
    }

    pub fn move_directory(&self, source: &str, destination: &str) -> Result<()> {
        self.ensure_valid()?;
        let from = self.resolve(source)?;
        let to = self.resolve(destination)?;

        if !from.is_dir() {
            return Err(not_found("move directory", source));
        }

        fs::rename(&from, &to)
            .map_err(|e| StoreError::operation_failed("move directory", destination, e))
    }

    // ---- enumeration ----

    /// Files in the store matching a glob pattern, e.g. `"data/*.txt"`.
    pub fn get_file_names(&self, pattern: &str) -> Result<Vec<String>> {
        self.enumerate(pattern, false)
    }

    /// Directories in the store matching a glob pattern.
    pub fn get_directory_names(&self, pattern: &str) -> Result<Vec<String>> {
        self.enumerate(pattern, true)
    }

    fn enumerate(&self, pattern: &str, directories: bool) -> Result<Vec<String>> {
        self.ensure_valid()?;
        let full = self.resolve(pattern)?;

        let Some(name_pattern) = full.file_name().and_then(|n| n.to_str()) else {
            return Err(StoreError::invalid_argument(
                "search pattern must end in a file or directory name",
            ));
        };
        let name_pattern = name_pattern.to_string();
        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        self.scope.authorize(&parent)?;

        // No wildcards and the pattern itself names one directory: return
        // that single name verbatim.
        let has_wildcard = name_pattern.contains(|c| c == '*' || c == '?' || c == '[');
        if directories && !has_wildcard && full.is_dir() {
            return Ok(vec![name_pattern]);
        }

        let matcher = Glob::new(&name_pattern)
            .map_err(|e| StoreError::invalid_argument(format!("bad search pattern '{pattern}': {e}")))?
            .compile_matcher();

        let reader = fs::read_dir(&parent)
            .map_err(|e| StoreError::operation_failed("enumerate", pattern, e))?;
        let mut names = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| StoreError::operation_failed("enumerate", pattern, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::operation_failed("enumerate", pattern, e))?;
            if file_type.is_dir() != directories {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if matcher.is_match(name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // ---- timestamps ----

    pub fn creation_time(&self, path: &str) -> Result<DateTime<Utc>> {
        self.timestamp(path, fs::Metadata::created)
    }

    pub fn last_access_time(&self, path: &str) -> Result<DateTime<Utc>> {
        self.timestamp(path, fs::Metadata::accessed)
    }

    pub fn last_write_time(&self, path: &str) -> Result<DateTime<Utc>> {
        self.timestamp(path, fs::Metadata::modified)
    }

    fn timestamp(
        &self,
        path: &str,
        pick: impl Fn(&fs::Metadata) -> io::Result<SystemTime>,
    ) -> Result<DateTime<Utc>> {
        self.ensure_valid()?;
        let full = self.resolve(path)?;
        let metadata = fs::metadata(full)
            .map_err(|e| StoreError::operation_failed("query timestamps", path, e))?;
        let time =
            pick(&metadata).map_err(|e| StoreError::operation_failed("query timestamps", path, e))?;
        Ok(DateTime::<Utc>::from(time))
    }

    // ---- streams ----

    /// Creates (or truncates) a file and returns a read-write stream.
    pub fn create_file(self: &Arc<Self>, path: &str) -> Result<IsolatedStoreStream> {
        IsolatedStoreStream::new(
            Arc::clone(self),
            path,
            OpenMode::Create,
            FileAccess::ReadWrite,
            false,
        )
    }

    pub fn open_file(self: &Arc<Self>, path: &str, mode: OpenMode) -> Result<IsolatedStoreStream> {
        let access = match mode {
            OpenMode::Append => FileAccess::Write,
            _ => FileAccess::ReadWrite,
        };
        self.open_file_with_access(path, mode, access)
    }

    pub fn open_file_with_access(
        self: &Arc<Self>,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
    ) -> Result<IsolatedStoreStream> {
        IsolatedStoreStream::new(Arc::clone(self), path, mode, access, false)
    }

    // ---- quota ----

    /// Usage of the whole sandbox, every file rounded up to the block size.
    pub fn used_size(&self) -> Result<u64> {
        self.ensure_valid()?;
        Ok(quota::directory_usage(&self.root, self.quota.block_size()))
    }

    /// Quota in bytes; `u64::MAX` when unbounded.
    pub fn quota(&self) -> Result<u64> {
        self.ensure_valid()?;
        self.quota.quota()
    }

    pub fn available_free_space(&self) -> Result<u64> {
        self.ensure_valid()?;
        let used = quota::directory_usage(&self.root, self.quota.block_size());
        self.quota.available_free_space(used)
    }

    /// Asks the resolver to raise the quota. Returns whether it was granted.
    pub fn increase_quota_to(&self, new_quota: u64) -> Result<bool> {
        self.ensure_valid()?;
        let used = quota::directory_usage(&self.root, self.quota.block_size());
        self.quota.increase_quota_to(new_quota, used)
    }

    // ---- lifecycle ----

    /// Best-effort wipe of the entire sandbox: all files first, then all
    /// directories, continuing past individual failures. Only the aggregate
    /// outcome is reported.
    pub fn remove(&self) -> Result<()> {
        self.ensure_valid()?;
        let mut complete = wipe_directory(&self.root);
        if fs::remove_dir(&self.root).is_err() {
            complete = false;
        } else if let Some(parent) = self.root.parent() {
            // First-level allocation directory, removed only if now empty.
            let _ = fs::remove_dir(parent);
        }
        self.close();
        if complete {
            info!("Removed isolated store for group {}", self.group);
            Ok(())
        } else {
            warn!("Store removal for group {} was incomplete", self.group);
            Err(StoreError::RemoveIncomplete)
        }
    }

    /// Idempotent; later operations fail with [`StoreError::StoreNotOpen`].
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.closed {
            lifecycle.closed = true;
            debug!("Closed isolated store for group {}", self.group);
        }
    }

    /// Idempotent; later operations fail with [`StoreError::Disposed`].
    pub fn dispose(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.closed = true;
        lifecycle.disposed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().closed
    }
}

impl Drop for IsolatedStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_found(operation: &'static str, path: &str) -> StoreError {
    StoreError::operation_failed(
        operation,
        path,
        io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
    )
}

/// Directory name for a group identity: hex of its SHA-256.
pub(crate) fn group_directory_name(group: &str) -> String {
    hex::encode(Sha256::digest(group.as_bytes()))
}

fn record_group_identity(group_dir: &Path, group: &str, application_id: &str) -> Result<()> {
    let identity_path = group_dir.join(GROUP_IDENTITY_FILE);
    if identity_path.is_file() {
        return Ok(());
    }
    let identity = GroupIdentity {
        group: group.to_string(),
        application_id: application_id.to_string(),
    };
    let body = toml::to_string(&identity)
        .map_err(|e| StoreError::internal(format!("cannot encode group identity: {e}")))?;
    if let Err(e) = fs::write(&identity_path, body) {
        // Enumeration degrades without the marker but the store still works.
        warn!("Could not record group identity: {}", e);
    }
    Ok(())
}

/// Deletes everything under `dir` (not `dir` itself): files in a first pass,
/// directories deepest-first in a second. Returns whether every step
/// succeeded.
pub(crate) fn wipe_directory(dir: &Path) -> bool {
    let mut complete = true;
    let mut pending = vec![dir.to_path_buf()];
    let mut directories: Vec<PathBuf> = Vec::new();

    while let Some(current) = pending.pop() {
        match fs::read_dir(&current) {
            Ok(reader) => {
                for entry in reader.flatten() {
                    match entry.file_type() {
                        Ok(t) if t.is_dir() => {
                            pending.push(entry.path());
                            directories.push(entry.path());
                        }
                        Ok(_) => {
                            if fs::remove_file(entry.path()).is_err() {
                                complete = false;
                            }
                        }
                        Err(_) => complete = false,
                    }
                }
            }
            Err(_) => complete = false,
        }
    }

    // Parents are discovered before their children, so popping from the end
    // always deletes a child before its parent.
    while let Some(sub) = directories.pop() {
        if fs::remove_dir(&sub).is_err() {
            complete = false;
        }
    }
    complete
}

// ---- feature kill switch ----

/// True when the `disabled.dat` sentinel is present at the isolation root.
pub fn is_disabled(isolation_root: &Path) -> bool {
    isolation_root.join(DISABLED_SENTINEL).is_file()
}

/// Turns the feature off by touching the sentinel file.
pub fn disable(isolation_root: &Path) -> Result<()> {
    fs::write(isolation_root.join(DISABLED_SENTINEL), b"")
        .map_err(|e| StoreError::operation_failed("disable isolated storage", DISABLED_SENTINEL, e))
}

/// Turns the feature back on by deleting the sentinel file.
pub fn enable(isolation_root: &Path) -> Result<()> {
    match fs::remove_file(isolation_root.join(DISABLED_SENTINEL)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::operation_failed(
            "enable isolated storage",
            DISABLED_SENTINEL,
            e,
        )),
    }
}
