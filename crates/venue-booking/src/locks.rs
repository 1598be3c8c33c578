//! Per-key async locks with bounded acquisition.

use std::{
  collections::HashMap,
  fmt,
  hash::Hash,
  sync::{Arc, Mutex, PoisonError, Weak},
  time::Duration,
};

use tokio::sync::OwnedMutexGuard;
use venue_core::{Error, Result};

/// Dead entries are swept once the table grows past this many keys.
const SWEEP_THRESHOLD: usize = 256;

/// One async mutex per key, created on demand and dropped when no task holds
/// or waits on it.
pub struct KeyLocks<K> {
  table:   Mutex<HashMap<K, Weak<tokio::sync::Mutex<()>>>>,
  timeout: Duration,
}

/// Held while a key is locked; releases on drop.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard {
  _guard: OwnedMutexGuard<()>,
}

impl<K> KeyLocks<K>
where
  K: Clone + Eq + Hash + fmt::Display,
{
  pub fn new(timeout: Duration) -> Self {
    Self { table: Mutex::new(HashMap::new()), timeout }
  }

  /// Wait up to the configured timeout for exclusive access to `key`.
  ///
  /// Fails with [`Error::Busy`] if the lock is still held when the timeout
  /// elapses.
  pub async fn lock(&self, key: &K) -> Result<KeyGuard> {
    let mutex = self.handle(key);
    match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
      Ok(guard) => Ok(KeyGuard { _guard: guard }),
      Err(_) => {
        tracing::warn!(%key, timeout_ms = self.timeout.as_millis() as u64, "key lock timed out");
        Err(Error::Busy(key.to_string()))
      }
    }
  }

  fn handle(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
    let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = table.get(key).and_then(Weak::upgrade) {
      return existing;
    }
    if table.len() >= SWEEP_THRESHOLD {
      table.retain(|_, weak| weak.strong_count() > 0);
    }
    let fresh = Arc::new(tokio::sync::Mutex::new(()));
    table.insert(key.clone(), Arc::downgrade(&fresh));
    fresh
  }

  #[cfg(test)]
  fn live_keys(&self) -> usize {
    let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
    table.values().filter(|weak| weak.strong_count() > 0).count()
  }
}
