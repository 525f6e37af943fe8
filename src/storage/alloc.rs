use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::{Result, StoreError};

/// Length of each randomly generated directory segment. The fixed length is
/// what distinguishes allocator-created directories from arbitrary
/// user-created ones when a prior allocation is recovered, so both
/// `create_random` and `find_existing` must agree on it.
pub const SEGMENT_LEN: usize = 12;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_segment() -> String {
    let mut rng = rand::thread_rng();
    (0..SEGMENT_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Allocates unique, randomly named two-level directory pairs beneath an
/// isolation root, and recovers a previously allocated pair by its
/// fixed-length shape.
pub struct DirectoryAllocator;

impl DirectoryAllocator {
    /// Generates a fresh two-segment pair, retrying the whole pair while the
    /// joined path already exists, then creates the first level and the full
    /// path. Returns the relative two-segment path.
    pub fn create_random(root: &Path) -> Result<PathBuf> {
        let (first, second) = loop {
            let first = random_segment();
            let second = random_segment();
            if !root.join(&first).join(&second).exists() {
                break (first, second);
            }
        };

        let first_level = root.join(&first);
        if !first_level.exists() {
            fs::create_dir(&first_level)
                .map_err(|e| StoreError::operation_failed("create directory", &first, e))?;
        }

        let relative = PathBuf::from(&first).join(&second);
        fs::create_dir(first_level.join(&second)).map_err(|e| {
            StoreError::operation_failed("create directory", relative.to_string_lossy(), e)
        })?;

        Ok(relative)
    }

    /// Scans for any previously allocated pair: a first-level directory with
    /// a segment-length name containing a second-level directory with a
    /// segment-length name. Enumeration order is whatever the filesystem
    /// yields; this finds *a* valid prior allocation, not a specific one.
    pub fn find_existing(root: &Path) -> Option<PathBuf> {
        for entry in fs::read_dir(root).ok()?.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let first = entry.file_name();
            if first.len() != SEGMENT_LEN {
                continue;
            }
            let Ok(inner) = fs::read_dir(entry.path()) else {
                continue;
            };
            for sub in inner.flatten() {
                if !sub.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let second = sub.file_name();
                if second.len() != SEGMENT_LEN {
                    continue;
                }
                return Some(PathBuf::from(&first).join(&second));
            }
        }
        None
    }
}
