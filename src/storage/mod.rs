pub mod alloc;
pub mod gate;
pub mod group;
pub mod path;
pub mod quota;
pub mod store;
pub mod stream;

#[cfg(test)]
mod tests;

pub use alloc::DirectoryAllocator;
pub use gate::PathScope;
pub use group::StoreGroup;
pub use quota::QuotaModel;
pub use store::{disable, enable, is_disabled, IsolatedStore, DISABLED_SENTINEL};
pub use stream::{FileAccess, IsolatedStoreStream, OpenMode};
