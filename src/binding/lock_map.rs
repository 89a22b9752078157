// src/binding/lock_map.rs
//! Lazily created per-resource async locks

use crate::workspace::resource::ResourceId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per network resource, created on first use and kept
/// until the resource is removed.
#[derive(Debug, Default)]
pub struct LockMap {
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl LockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for a resource, creating it if needed
    pub fn get_or_create(&self, id: &ResourceId) -> Arc<Mutex<()>> {
        // clone out of the map: the shard guard must not live across an await
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to a resource's bind state
    pub async fn acquire(&self, id: &ResourceId) -> OwnedMutexGuard<()> {
        self.get_or_create(id).lock_owned().await
    }

    /// Forget a resource's lock. Holders keep their guard.
    pub fn remove(&self, id: &ResourceId) {
        self.locks.remove(id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
