//! Per-entity mutual exclusion.
//!
//! Every mutating command takes the lock of the entity it changes before
//! re-reading it, so a user completing a task and the SLA monitor escalating
//! it never interleave. When two locks are needed the workflow lock is taken
//! before the task lock. Nothing awaits I/O while holding one.
//!
//! An entry lives only while someone holds or waits for it; the last guard
//! to drop removes it, so the table stays as small as the set of entities
//! currently being changed.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Arc<LockTable>,
}

/// Exclusive access to one entity, released on drop
#[derive(Debug)]
pub struct EntityGuard {
    entity_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // Unlock first so our own Arc no longer counts
        self.guard.take();
        release_idle(&self.locks, self.entity_id);
    }
}

fn release_idle(locks: &LockTable, entity_id: Uuid) {
    locks.remove_if(&entity_id, |_, mutex| Arc::strong_count(mutex) == 1);
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id`
    pub async fn lock(&self, entity_id: Uuid) -> EntityGuard {
        // Clone the Arc out so the shard guard is released before awaiting
        let mutex = Arc::clone(self.locks.entry(entity_id).or_default().value());
        EntityGuard {
            entity_id,
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
