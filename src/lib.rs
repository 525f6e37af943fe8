//! Sandboxed per-application storage.
//!
//! Each application (or group of applications) gets a randomly allocated
//! directory pair beneath an isolation root. Every path a caller supplies is
//! virtualized under that sandbox and authorized against a scope derived
//! once at open time; usage is accounted in fixed-size blocks against a
//! quota negotiated with an injected [`SecurityResolver`]; and file streams
//! zero-fill any region they grow, so stale disk content is never readable.

pub mod config;
pub mod error;
pub mod resolver;
pub mod storage;

pub use config::StorageConfig;
pub use error::{Result, StoreError};
pub use resolver::{HostResolver, SecurityResolver};
pub use storage::{
    DirectoryAllocator, FileAccess, IsolatedStore, IsolatedStoreStream, OpenMode, PathScope,
    QuotaModel, StoreGroup,
};
