//! The key-value store contract.
//!
//! A [`DataStore`] holds the latest value per key. The retention subsystem
//! requires nothing else of it: no ordering across keys, no history (the
//! retention keeps the history), per-key consistency enforced by the store
//! itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StoreError, StoreResult};

/// The persistent mapping the retention is paired with.
///
/// Keys and values are opaque byte strings; the codec belongs to the
/// caller. An acknowledged `put` is immediately visible via `get`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stores the value under the key, replacing any previous value.
    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()>;

    /// Returns the current value for the key, if any.
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    /// Removes the key. Returns true if the key existed.
    async fn delete(&self, key: &[u8]) -> StoreResult<bool>;

    /// Returns a snapshot of all current entries.
    ///
    /// The snapshot is not atomic with respect to concurrent writers; it is
    /// a point-in-time view per key.
    async fn scan(&self) -> StoreResult<Vec<(Bytes, Bytes)>>;

    /// Flushes buffered writes to durable storage.
    async fn flush(&self) -> StoreResult<()>;

    /// Flushes and closes the store. Further operations fail.
    async fn close(&self) -> StoreResult<()>;
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct StoreFaultConfig {
    /// Probability of get operations failing (0.0 - 1.0).
    pub get_fail_rate: f64,
    /// Probability of put operations failing (0.0 - 1.0).
    pub put_fail_rate: f64,
    /// Force next put to fail (one-shot).
    pub force_put_fail: bool,
}

impl StoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            get_fail_rate: 0.0,
            put_fail_rate: 0.0,
            force_put_fail: false,
        }
    }

    /// Builder: set put fail rate.
    #[must_use]
    pub const fn with_put_fail_rate(mut self, rate: f64) -> Self {
        self.put_fail_rate = rate;
        self
    }

    /// Builder: set get fail rate.
    #[must_use]
    pub const fn with_get_fail_rate(mut self, rate: f64) -> Self {
        self.get_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Memory Store
// -----------------------------------------------------------------------------

/// In-memory store for tests and volatile deployments.
///
/// Clones share state via `Arc` for multi-handle testing. Supports
/// deterministic fault injection for exercising error paths.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    /// Key-value entries.
    entries: Arc<Mutex<HashMap<Bytes, Bytes>>>,
    /// Fault configuration.
    fault_config: Arc<Mutex<StoreFaultConfig>>,
    /// Whether the store is closed.
    closed: Arc<AtomicBool>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Creates a new store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, StoreFaultConfig::none())
    }

    /// Creates a store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: StoreFaultConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fault_config: Arc::new(Mutex::new(config)),
            closed: Arc::new(AtomicBool::new(false)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, StoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns the number of entries (bypasses faults, for assertions).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("entries lock poisoned").len()
    }

    /// Returns true if the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic RNG using the `(seed + counter) * M` formula.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.check_open()?;

        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_put_fail {
                config.force_put_fail = false;
                return Err(StoreError::Io {
                    operation: "put",
                    message: "simulated failure (forced)".into(),
                });
            }
        }

        let put_fail_rate = self.fault_config.lock().expect("lock").put_fail_rate;
        if self.should_inject_fault(put_fail_rate) {
            return Err(StoreError::Io {
                operation: "put",
                message: "simulated failure (random)".into(),
            });
        }

        let mut entries = self.entries.lock().expect("entries lock poisoned");
        entries.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.check_open()?;

        let get_fail_rate = self.fault_config.lock().expect("lock").get_fail_rate;
        if self.should_inject_fault(get_fail_rate) {
            return Err(StoreError::Io {
                operation: "get",
                message: "simulated failure (random)".into(),
            });
        }

        let entries = self.entries.lock().expect("entries lock poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("entries lock poisoned");
        Ok(entries.remove(key).is_some())
    }

    async fn scan(&self) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.check_open()?;
        let entries = self.entries.lock().expect("entries lock poisoned");
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn flush(&self) -> StoreResult<()> {
        self.check_open()
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
