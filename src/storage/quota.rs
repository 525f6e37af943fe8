use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::resolver::SecurityResolver;

/// Granularity to which quota and usage figures are rounded.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024;

/// Rounds storage figures to a fixed block granularity and negotiates quota
/// changes with the security resolver. The resolver stays authoritative:
/// quota is re-queried per call and never cached or mutated locally.
#[derive(Clone)]
pub struct QuotaModel {
    block_size: u64,
    group: String,
    resolver: Arc<dyn SecurityResolver>,
}

impl QuotaModel {
    pub fn new(block_size: u64, group: impl Into<String>, resolver: Arc<dyn SecurityResolver>) -> Self {
        Self {
            block_size,
            group: group.into(),
            resolver,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Rounds up to the next multiple of the block size. Anything below one
    /// block, including zero, becomes exactly one block.
    pub fn round_up(&self, n: u64) -> u64 {
        if n <= self.block_size {
            self.block_size
        } else {
            n.div_ceil(self.block_size).saturating_mul(self.block_size)
        }
    }

    /// Rounds down to the previous multiple of the block size. Anything
    /// below one block floors to zero.
    pub fn round_down(&self, n: u64) -> u64 {
        n - n % self.block_size
    }

    /// Authoritative quota in bytes; `u64::MAX` when the group is unbounded.
    pub fn quota(&self) -> Result<u64> {
        Ok(self.resolver.quota(&self.group)?.unwrap_or(u64::MAX))
    }

    /// Free space remaining. A value precomputed by the resolver wins over
    /// the local `quota - used` calculation.
    pub fn available_free_space(&self, used_size: u64) -> Result<u64> {
        if let Some(precomputed) = self.resolver.available_free_space()? {
            return Ok(precomputed);
        }
        Ok(self.quota()?.saturating_sub(used_size))
    }

    /// Submits a quota increase to the resolver. Requests that do not exceed
    /// the current quota are rejected locally; the increase request is never
    /// submitted for them.
    pub fn increase_quota_to(&self, new_quota: u64, used_size: u64) -> Result<bool> {
        let current = self.quota()?;
        if new_quota <= current {
            return Err(StoreError::quota_rejected(format!(
                "requested quota {new_quota} does not exceed the current quota"
            )));
        }
        self.resolver.increase_quota(&self.group, new_quota, used_size)
    }
}

impl fmt::Debug for QuotaModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaModel")
            .field("block_size", &self.block_size)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Total usage of a directory tree, each file rounded up to `block_size`.
/// Unreadable entries are skipped; usage accounting is best-effort.
pub(crate) fn directory_usage(root: &Path, block_size: u64) -> u64 {
    let round_up = |n: u64| {
        if n <= block_size {
            block_size
        } else {
            n.div_ceil(block_size).saturating_mul(block_size)
        }
    };

    let mut used = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(reader) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in reader.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                used += round_up(metadata.len());
            }
        }
    }
    used
}
