//! Per-category memo cell with a load lock

use std::future::Future;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::Result;
use crate::types::Category;

/// Holds one category's value once loaded.
///
/// The value is written at most once. The lock serializes loads; readers
/// never take it once the value is present.
pub(crate) struct CategorySlot<T> {
    category: Category,
    value: OnceLock<T>,
    lock: Mutex<()>,
}

/// Exclusive right to load a slot.
pub(crate) struct SlotGuard<'a, T> {
    slot: &'a CategorySlot<T>,
    _lock: MutexGuard<'a, ()>,
}

impl<T: Clone> CategorySlot<T> {
    pub fn new(category: Category) -> Self {
        Self { category, value: OnceLock::new(), lock: Mutex::new(()) }
    }

    pub fn get(&self) -> Option<T> {
        self.value.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    pub async fn acquire(&self) -> SlotGuard<'_, T> {
        let lock = match self.lock.try_lock() {
            Ok(lock) => lock,
            Err(_) => {
                debug!("Waiting for in-flight {} load", self.category);
                self.lock.lock().await
            }
        };
        SlotGuard { slot: self, _lock: lock }
    }

    /// Lock the slot only if no load is running.
    pub fn try_acquire(&self) -> Option<SlotGuard<'_, T>> {
        self.lock.try_lock().ok().map(|lock| SlotGuard { slot: self, _lock: lock })
    }

    /// Return the value, running `load` under the lock if it is missing.
    ///
    /// A failed load publishes nothing, so the next caller retries.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let guard = self.acquire().await;
        if let Some(value) = guard.get() {
            trace!("{} loaded by a concurrent caller", self.category);
            return Ok(value);
        }
        let value = load().await?;
        Ok(guard.publish(value))
    }
}

impl<T: Clone> SlotGuard<'_, T> {
    pub fn get(&self) -> Option<T> {
        self.slot.get()
    }

    /// Store `value` unless one is already present, and return what is stored.
    pub fn publish(&self, value: T) -> T {
        let mut stored = false;
        let current = self.slot.value.get_or_init(|| {
            stored = true;
            value
        });
        if stored {
            debug!("{} loaded", self.slot.category);
        }
        current.clone()
    }
}
