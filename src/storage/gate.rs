use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};

/// Permitted-path descriptor derived once from the sandbox root when a store
/// opens. Every path-touching operation is authorized against it before the
/// filesystem is consulted.
#[derive(Debug, Clone)]
pub struct PathScope {
    root: PathBuf,
}

impl PathScope {
    /// Derives the scope from the sandbox root. The root must exist; the
    /// canonical form is what all later checks compare against.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|_| StoreError::SecurityDenied)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalizes `candidate` and requires the result to stay under the
    /// scope root. Any failure along the way collapses into
    /// [`StoreError::SecurityDenied`]; the underlying cause is never
    /// surfaced to the caller.
    pub fn authorize(&self, candidate: &Path) -> Result<PathBuf> {
        let normalized = self
            .normalize(candidate)
            .ok_or(StoreError::SecurityDenied)?;
        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(StoreError::SecurityDenied)
        }
    }

    /// Existing paths get the real canonical form so a symlink cannot
    /// smuggle a component out of scope. For a path that does not exist yet,
    /// the longest existing ancestor is canonicalized first, which catches a
    /// symlink planted anywhere in the prefix, and only the not-yet-existing
    /// tail is resolved textually.
    fn normalize(&self, path: &Path) -> Option<PathBuf> {
        if path.exists() {
            return path.canonicalize().ok();
        }

        let existing = path.ancestors().skip(1).find(|a| a.exists())?;
        let mut out = existing.canonicalize().ok()?;
        let tail = path.strip_prefix(existing).ok()?;
        for component in tail.components() {
            match component {
                Component::Normal(name) => out.push(name),
                Component::ParentDir => {
                    if !out.pop() {
                        return None;
                    }
                }
                Component::CurDir => {}
                Component::Prefix(_) | Component::RootDir => return None,
            }
        }
        Some(out)
    }
}
