use std::sync::Arc;

use super::KeyValueStore;

/// Infallible front for a [`KeyValueStore`].
///
/// Backend failures are logged and reduced to an absent read or a dropped write.
/// A detached instance has no backend at all: reads are absent, writes are no-ops.
#[derive(Clone, Default)]
pub struct GuardedStorage {
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl GuardedStorage {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn detached() -> Self {
        Self { backend: None }
    }

    pub fn is_attached(&self) -> bool {
        self.backend.is_some()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match backend.get(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(key = %key, error = %error, "failed to read from local storage");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(error) = backend.set(key, value) {
            tracing::error!(key = %key, error = %error, "failed to write to local storage");
        }
    }
}

impl std::fmt::Debug for GuardedStorage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GuardedStorage")
            .field("attached", &self.is_attached())
            .finish()
    }
}
