use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::lot::LotKey;

/// Identity a hold can be taken on.
///
/// Ledger operations hold the lots and location counters they mutate;
/// workflow operations additionally hold their own aggregate so partial
/// updates of a receipt, order, return, or transfer serialize too.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HoldKey {
    Lot(LotKey),
    Location(Uuid, String),
    Receipt(Uuid),
    Order(Uuid),
    Return(Uuid),
    Transfer(Uuid),
}

/// Per-identity exclusive holds, scoped to a single operation.
///
/// Concurrent operations against different keys proceed independently;
/// operations sharing a key serialize, the second observing the first's
/// committed result. Multi-key acquisition locks in canonical (sorted) key
/// order, which rules out lock-order inversion between any two operations.
#[derive(Default)]
pub struct HoldRegistry {
    slots: DashMap<HoldKey, Arc<Mutex<()>>>,
}

impl HoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &HoldKey) -> Arc<Mutex<()>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires exclusive holds on all keys and returns a guard that
    /// releases them when dropped.
    pub async fn acquire(&self, mut keys: Vec<HoldKey>) -> HoldGuard {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = self.slot(&key);
            guards.push(slot.lock_owned().await);
        }
        HoldGuard { _guards: guards }
    }
}

/// Releases the underlying holds on drop.
pub struct HoldGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}
