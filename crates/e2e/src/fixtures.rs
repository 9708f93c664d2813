//! Exclusive leases on shared backend fixtures
//!
//! Scenarios that touch a shared backend object (a coupon with a usage limit,
//! the shared login user) name it up front; the runner holds an exclusive lease
//! on each such name for the whole scenario. Everything else lives in the
//! scenario's own browser context and needs no lease at all.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Hands out exclusive leases on named fixtures
#[derive(Default)]
pub struct FixtureRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on a set of fixtures, released on drop
pub struct FixtureLease {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl FixtureLease {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire every named fixture, waiting for current holders to finish.
    ///
    /// Names are taken in sorted order with duplicates removed, so two
    /// scenarios sharing fixtures can never deadlock on each other.
    pub async fn acquire(&self, names: &[&str]) -> FixtureLease {
        let mut sorted: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in &sorted {
            let lock = self.lock_for(name);
            debug!(fixture = %name, "Waiting for fixture lease");
            guards.push(lock.lock_owned().await);
        }

        FixtureLease {
            names: sorted,
            _guards: guards,
        }
    }
}
