pub mod error;
pub mod guarded;
pub mod memory;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use guarded::GuardedStorage;
pub use memory::MemoryStore;
pub use sqlite::SqliteKeyValueStore;

/// Persistence port: one text value per key, overwritten wholesale.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
}

impl<T> KeyValueStore for std::sync::Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }
}
