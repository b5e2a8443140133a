//! Per-gauge advisory locks.
//!
//! The interval-based deprecation strategy is a read-compute-write sequence
//! spanning many rows; it cannot be a single atomic statement. Concurrent
//! resolutions for the same gauge are serialised on a named async lock keyed
//! by gauge id, while unrelated gauges proceed in parallel. Guards are held
//! across store awaits, hence `tokio::sync::Mutex`.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct GaugeLocks {
  inner: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl GaugeLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Acquire the lock for `gauge_id`, creating it on first use.
  pub async fn acquire(&self, gauge_id: Uuid) -> OwnedMutexGuard<()> {
    let lock = {
      let mut registry = self.inner.lock().expect("gauge lock registry poisoned");
      Arc::clone(
        registry
          .entry(gauge_id)
          .or_insert_with(|| Arc::new(Mutex::new(()))),
      )
    };
    lock.lock_owned().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn same_gauge_serialises_different_gauges_do_not() {
    let locks = GaugeLocks::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let guard_a = locks.acquire(a).await;

    // Another gauge is immediately available.
    let _guard_b = locks.acquire(b).await;

    // The same gauge is not until the guard drops.
    assert!(
      tokio::time::timeout(
        std::time::Duration::from_millis(20),
        locks.acquire(a)
      )
      .await
      .is_err()
    );

    drop(guard_a);
    let _reacquired = locks.acquire(a).await;
  }
}
