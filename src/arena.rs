//! A minimal id-indexed arena, the `std` stand-in for the teacher's
//! `arena.rs` (`MruArena`/`ArenaRc`). The kernel version exists to avoid
//! allocation inside interrupt context and to give out pinned, refcounted
//! handles without a real allocator; none of that applies once we're
//! running under `std`, so this is just a `Mutex<HashMap>` keyed by a
//! monotonic id — same *role* (own a pool of entries, hand out an id,
//! reclaim on removal), much smaller implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(pub u64);

pub struct Arena<T> {
    next_id: AtomicU64,
    items: Mutex<HashMap<u64, T>>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, value: T) -> ArenaId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.items.lock().unwrap().insert(id, value);
        ArenaId(id)
    }

    pub fn remove(&self, id: ArenaId) -> Option<T> {
        self.items.lock().unwrap().remove(&id.0)
    }

    pub fn with<R>(&self, id: ArenaId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.lock().unwrap().get(&id.0).map(f)
    }

    pub fn with_mut<R>(&self, id: ArenaId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.items.lock().unwrap().get_mut(&id.0).map(f)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ArenaId> {
        self.items.lock().unwrap().keys().copied().map(ArenaId).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let arena: Arena<i32> = Arena::new();
        let id = arena.insert(42);
        assert_eq!(arena.with(id, |v| *v), Some(42));
        assert_eq!(arena.remove(id), Some(42));
        assert_eq!(arena.with(id, |v| *v), None);
    }
}
