use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

use crosslink_core::EntityKind;

/// Striped advisory lock table keyed by `(entity kind, record key)`.
///
/// Inbound events for unrelated records proceed concurrently; two events
/// racing on the same record serialize for the duration of their
/// resolve+write section. Striping means unrelated keys can occasionally
/// share a lock, which only costs a little parallelism, never correctness.
pub struct KeyedLocks {
    shards: Vec<Mutex<()>>,
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

impl KeyedLocks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Acquire the advisory lock for a record key, blocking until free.
    pub fn lock(&self, kind: EntityKind, key: i64) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        kind.as_str().hash(&mut hasher);
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new(8));
        let guard = locks.lock(EntityKind::Organization, 7);
        assert!(
            locks.shards
                [{
                    let mut h = DefaultHasher::new();
                    EntityKind::Organization.as_str().hash(&mut h);
                    7i64.hash(&mut h);
                    (h.finish() as usize) % 8
                }]
            .try_lock()
            .is_none()
        );
        drop(guard);
        let _again = locks.lock(EntityKind::Organization, 7);
    }

    #[test]
    fn reacquire_after_release() {
        let locks = KeyedLocks::new(64);
        drop(locks.lock(EntityKind::Organization, 1));
        drop(locks.lock(EntityKind::Organization, 1));
        drop(locks.lock(EntityKind::Deal, 1));
    }
}
