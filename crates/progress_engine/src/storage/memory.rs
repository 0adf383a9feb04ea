use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;

use super::KeyValueStore;

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, String>,
    write_counts: HashMap<String, u32>,
    quota_bytes: Option<usize>,
}

impl MemoryInner {
    fn used_bytes_with(&self, key: &str, value: &str) -> usize {
        let existing = self
            .values
            .iter()
            .filter(|(stored_key, _)| stored_key.as_str() != key)
            .map(|(stored_key, stored_value)| stored_key.len() + stored_value.len())
            .sum::<usize>();
        existing + key.len() + value.len()
    }
}

/// In-process store. Clones share the same contents, so a test can keep a
/// clone to inspect after handing the store to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes that would push the total of key and value bytes past
    /// `quota_bytes`, the way a browser storage quota does.
    pub fn with_quota_bytes(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.lock().quota_bytes = Some(quota_bytes);
        store
    }

    /// Replaces the quota; `None` lifts it. Existing values are kept even if
    /// they no longer fit.
    pub fn set_quota_bytes(&self, quota_bytes: Option<usize>) {
        self.lock().quota_bytes = quota_bytes;
    }

    /// Number of successful `set` calls observed for `key`.
    pub fn write_count(&self, key: &str) -> u32 {
        self.lock().write_counts.get(key).copied().unwrap_or(0)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().values.insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(quota_bytes) = inner.quota_bytes {
            let needed_bytes = inner.used_bytes_with(key, value);
            if needed_bytes > quota_bytes {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed_bytes,
                    quota_bytes,
                });
            }
        }
        inner.values.insert(key.to_string(), value.to_string());
        *inner.write_counts.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.lock().values.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().values.keys().cloned().collect())
    }
}
