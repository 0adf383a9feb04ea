mod atomic_io;
mod file;
mod handle;
pub(crate) mod json;
mod memory;

pub use file::FileStore;
pub use handle::StorageHandle;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Flat string-to-string persistence. Implementations perform no locking and
/// no transactions; the last write to a key wins.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}
