use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::error::{Anomaly, StoreError};

use super::KeyValueStore;

static STORAGE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_storage_lock_poison_once(operation: &'static str) {
    if STORAGE_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "storage lock poisoned; recovered inner value");
    }
}

/// Shared best-effort access to one [`KeyValueStore`]. Every component of an
/// engine instance holds a clone of the same handle.
///
/// Store errors never leave this type: reads degrade to `None`, writes to
/// `false`, and the failure is logged.
#[derive(Clone)]
pub struct StorageHandle {
    store: Arc<Mutex<Box<dyn KeyValueStore>>>,
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle").finish_non_exhaustive()
    }
}

impl StorageHandle {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.lock("get").get(key) {
            Ok(value) => value,
            Err(error) => {
                warn!(key, error = %error, "storage_read_failed");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.lock("set").set(key, value) {
            Ok(()) => true,
            Err(error) => {
                log_write_failure(key, &error);
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.lock("remove").remove(key) {
            Ok(()) => true,
            Err(error) => {
                log_write_failure(key, &error);
                false
            }
        }
    }

    /// Reads and deletes `key` under one lock acquisition.
    pub fn take(&self, key: &str) -> Option<String> {
        let mut store = self.lock("take");
        let value = match store.get(key) {
            Ok(value) => value?,
            Err(error) => {
                warn!(key, error = %error, "storage_read_failed");
                return None;
            }
        };
        if let Err(error) = store.remove(key) {
            log_write_failure(key, &error);
        }
        Some(value)
    }

    pub fn keys(&self) -> Vec<String> {
        match self.lock("keys").keys() {
            Ok(keys) => keys,
            Err(error) => {
                warn!(error = %error, "storage_list_failed");
                Vec::new()
            }
        }
    }

    fn lock(&self, operation: &'static str) -> MutexGuard<'_, Box<dyn KeyValueStore>> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_storage_lock_poison_once(operation);
                poisoned.into_inner()
            }
        }
    }
}

fn log_write_failure(key: &str, error: &StoreError) {
    warn!(
        key,
        anomaly = %Anomaly::WriteFailed,
        error = %error,
        "storage_write_failed"
    );
}
