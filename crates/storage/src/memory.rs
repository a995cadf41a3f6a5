use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{InvariantViolationSnafu, StorageResult};
use super::KeyValueStore;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store with one entry, mostly for fixtures.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.write() {
            entries.insert(key.into(), value.into());
        }
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let Ok(entries) = self.entries.read() else {
            return InvariantViolationSnafu {
                stage: "memory-store-get",
                details: "memory store lock poisoned".to_string(),
            }
            .fail();
        };
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let Ok(mut entries) = self.entries.write() else {
            return InvariantViolationSnafu {
                stage: "memory-store-set",
                details: "memory store lock poisoned".to_string(),
            }
            .fail();
        };
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
