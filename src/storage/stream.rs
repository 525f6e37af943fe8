use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use tracing::debug;

use super::store::IsolatedStore;
use crate::error::{Result, StoreError};

/// Chunk size for zeroing grown file regions.
const ZERO_BLOCK: usize = 1024;

/// Open dispositions accepted by the store, a fixed allow-list. Combinations
/// the list cannot express are rejected before the filesystem is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create; fail if the file already exists.
    CreateNew,
    /// Create, truncating any existing file.
    Create,
    /// Open, creating the file first if it is missing.
    OpenOrCreate,
    /// Open an existing file and truncate it.
    Truncate,
    /// Open for appending; writes always land at the end.
    Append,
    /// Open an existing file; fail if it is missing.
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    fn readable(self) -> bool {
        !matches!(self, FileAccess::Write)
    }

    fn writable(self) -> bool {
        !matches!(self, FileAccess::Read)
    }
}

/// A file stream bound to an isolated store.
///
/// Grown regions are never left to whatever the underlying filesystem keeps
/// in sparse extents: any growth through [`set_length`](Self::set_length) or
/// a seek past the current end is explicitly zero-filled, block by block,
/// before anything can read it.
pub struct IsolatedStoreStream {
    store: Arc<IsolatedStore>,
    owns_store: bool,
    logical_path: String,
    full_path: PathBuf,
    file: File,
    access: FileAccess,
    append: bool,
}

impl IsolatedStoreStream {
    pub(crate) fn new(
        store: Arc<IsolatedStore>,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        owns_store: bool,
    ) -> Result<Self> {
        store.ensure_valid()?;
        let full_path = store.resolve(path)?;

        validate_mode(mode, access)?;

        let mut options = OpenOptions::new();
        if access.readable() {
            options.read(true);
        }
        if access.writable() {
            options.write(true);
        }
        match mode {
            OpenMode::CreateNew => {
                options.create_new(true);
            }
            OpenMode::Create => {
                options.create(true).truncate(true);
            }
            OpenMode::OpenOrCreate => {
                options.create(true);
            }
            OpenMode::Truncate => {
                options.truncate(true);
            }
            OpenMode::Append => {
                options.append(true);
            }
            OpenMode::Open => {}
        }

        let file = options
            .open(&full_path)
            .map_err(|e| StoreError::operation_failed("open file", path, e))?;
        debug!("Opened stream for '{}'", path);

        Ok(Self {
            store,
            owns_store,
            logical_path: path.to_string(),
            full_path,
            file,
            access,
            append: mode == OpenMode::Append,
        })
    }

    /// Opens a stream that owns its store: dropping the stream closes the
    /// store as well. Useful when the store exists only to back one file.
    pub fn open_owning(
        store: Arc<IsolatedStore>,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
    ) -> Result<Self> {
        Self::new(store, path, mode, access, true)
    }

    /// The path the stream was opened with, relative to the store.
    pub fn path(&self) -> &str {
        &self.logical_path
    }

    pub fn len(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StoreError::operation_failed("query length", &self.logical_path, e))?;
        Ok(metadata.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn position(&mut self) -> Result<u64> {
        self.file
            .stream_position()
            .map_err(|e| StoreError::operation_failed("query position", &self.logical_path, e))
    }

    /// Resizes the file. Growth zero-fills the new region before the call
    /// returns; the cursor position is left where it was.
    pub fn set_length(&mut self, new_len: u64) -> Result<()> {
        if !self.access.writable() {
            return Err(StoreError::not_permitted("stream is not writable"));
        }
        let current = self.len()?;
        self.file
            .set_len(new_len)
            .map_err(|e| StoreError::operation_failed("resize", &self.logical_path, e))?;
        if new_len > current {
            self.zero_fill(current, new_len)
                .map_err(|e| StoreError::operation_failed("resize", &self.logical_path, e))?;
        }
        Ok(())
    }

    /// Takes an exclusive advisory lock on the whole file.
    pub fn lock(&self) -> Result<()> {
        self.file
            .lock_exclusive()
            .map_err(|e| StoreError::operation_failed("lock", &self.logical_path, e))
    }

    /// Takes a shared advisory lock on the whole file.
    pub fn lock_shared(&self) -> Result<()> {
        self.file
            .lock_shared()
            .map_err(|e| StoreError::operation_failed("lock", &self.logical_path, e))
    }

    pub fn unlock(&self) -> Result<()> {
        self.file
            .unlock()
            .map_err(|e| StoreError::operation_failed("unlock", &self.logical_path, e))
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync_all(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| StoreError::operation_failed("sync", &self.logical_path, e))
    }

    /// The sandbox never hands out the OS handle; a raw handle would bypass
    /// path virtualization entirely. Always fails.
    pub fn raw_handle(&self) -> Result<i64> {
        Err(StoreError::not_permitted(
            "isolated storage streams do not expose the underlying OS handle",
        ))
    }

    /// Writes zeros across `[from, to)` and puts the cursor back where it
    /// was. An append handle cannot do positioned writes, the OS moves every
    /// write on it to end-of-file, so the fill goes through a plain write
    /// handle on the same path instead.
    fn zero_fill(&mut self, from: u64, to: u64) -> io::Result<()> {
        debug_assert!(from <= to);
        if self.append {
            let mut plain = OpenOptions::new().write(true).open(&self.full_path)?;
            return zero_fill_range(&mut plain, from, to);
        }
        let original = self.file.stream_position()?;
        zero_fill_range(&mut self.file, from, to)?;
        self.file.seek(SeekFrom::Start(original))?;
        Ok(())
    }
}

/// Writes zeros across `[from, to)`. The bulk goes out in block-size chunks,
/// with a partial chunk at the start to align to a block boundary and one at
/// the end for the remainder.
fn zero_fill_range(file: &mut File, from: u64, to: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(from))?;

    let zeros = [0u8; ZERO_BLOCK];
    let mut remaining = to - from;

    let misalign = (from % ZERO_BLOCK as u64) as usize;
    if misalign != 0 {
        let lead = ((ZERO_BLOCK - misalign) as u64).min(remaining) as usize;
        file.write_all(&zeros[..lead])?;
        remaining -= lead as u64;
    }
    while remaining > 0 {
        let chunk = remaining.min(ZERO_BLOCK as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

fn validate_mode(mode: OpenMode, access: FileAccess) -> Result<()> {
    match mode {
        OpenMode::Append if access != FileAccess::Write => Err(StoreError::invalid_mode(
            "append requires write-only access",
        )),
        OpenMode::CreateNew | OpenMode::Create | OpenMode::OpenOrCreate | OpenMode::Truncate
            if !access.writable() =>
        {
            Err(StoreError::invalid_mode(format!(
                "{mode:?} requires write access"
            )))
        }
        _ => Ok(()),
    }
}

impl fmt::Debug for IsolatedStoreStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedStoreStream")
            .field("path", &self.logical_path)
            .field("access", &self.access)
            .field("owns_store", &self.owns_store)
            .finish_non_exhaustive()
    }
}

impl Read for IsolatedStoreStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for IsolatedStoreStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for IsolatedStoreStream {
    /// Seeking past the current end on a writable stream grows the file and
    /// zero-fills the gap immediately, so a later write can never leave an
    /// undefined region behind.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.file.metadata()?.len();
        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => len as i128 + offset as i128,
            SeekFrom::Current(offset) => self.file.stream_position()? as i128 + offset as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot seek before the start of the stream",
            ));
        }
        let target = target as u64;

        if target > len && self.access.writable() {
            self.file.set_len(target)?;
            self.zero_fill(len, target)?;
        }
        self.file.seek(SeekFrom::Start(target))
    }
}

impl Drop for IsolatedStoreStream {
    fn drop(&mut self) {
        debug!("Closing stream for '{}'", self.full_path.display());
        if self.owns_store {
            self.store.close();
        }
    }
}
