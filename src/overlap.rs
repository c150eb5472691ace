//! Overlap tracker (spec.md §4.5): serializes data-device submission order
//! for logically overlapping writes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::trace;

use crate::arena::Arena;
use crate::pipeline::entry::{EntryId, RequestEntry};

struct Inner {
    /// Sorted by start offset (logical blocks) -> entries starting there.
    by_offset: BTreeMap<u64, Vec<EntryId>>,
    max_size_tracked: u64,
}

pub struct OverlapTracker {
    inner: Mutex<Inner>,
}

impl OverlapTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_offset: BTreeMap::new(),
                max_size_tracked: 0,
            }),
        }
    }

    /// Inserts `entry_id` (already present in `arena`), bumping
    /// `overlap_count` on every intersecting prior entry and marking fully
    /// covered, not-yet-submitted priors as overwritten (spec.md §4.5).
    /// Returns `true` if the entry is immediately submittable
    /// (`overlap_count == 0`).
    pub fn insert(&self, arena: &Arena<RequestEntry>, entry_id: EntryId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let (start, end, size) = arena
            .with(entry_id, |e| {
                let (s, e_) = e.range();
                (s, e_, e.size_lb)
            })
            .expect("entry must exist in arena");

        let search_from = start.saturating_sub(inner.max_size_tracked);
        let mut overlap_count = 0i64;
        let candidates: Vec<(u64, EntryId)> = inner
            .by_offset
            .range(search_from..end)
            .flat_map(|(&off, ids)| ids.iter().map(move |&id| (off, id)))
            .collect();

        for (_off, prior_id) in candidates {
            if prior_id.0 == entry_id.0 {
                continue;
            }
            let overlaps = arena
                .with(prior_id, |prior| {
                    arena
                        .with(entry_id, |e| e.overlaps(prior))
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            if !overlaps {
                continue;
            }
            overlap_count += 1;
            let (covers, prior_submitted) = arena
                .with(prior_id, |prior| {
                    let covers = arena.with(entry_id, |e| e.covers(prior)).unwrap_or(false);
                    (covers, prior.submitted.load(std::sync::atomic::Ordering::SeqCst))
                })
                .unwrap_or((false, true));
            if covers && !prior_submitted {
                arena.with(prior_id, |prior| prior.mark_overwritten());
                trace!(prior = prior_id.0, new = entry_id.0, "overwritten by fully-covering write");
            }
        }

        arena.with(entry_id, |e| e.bump_overlap(overlap_count));
        inner.by_offset.entry(start).or_default().push(entry_id);
        inner.max_size_tracked = inner.max_size_tracked.max(size);
        overlap_count == 0
    }

    /// Removes `entry_id` (its data IO completed), releasing every
    /// still-tracked intersecting entry whose `overlap_count` reaches zero.
    /// Returns the ids that became submittable.
    pub fn remove(&self, arena: &Arena<RequestEntry>, entry_id: EntryId) -> Vec<EntryId> {
        let mut inner = self.inner.lock().unwrap();
        let (start, end) = arena
            .with(entry_id, |e| e.range())
            .unwrap_or((0, 0));

        let search_from = start.saturating_sub(inner.max_size_tracked);
        let candidates: Vec<(u64, EntryId)> = inner
            .by_offset
            .range(search_from..end)
            .flat_map(|(&off, ids)| ids.iter().map(move |&id| (off, id)))
            .collect();

        let mut released = Vec::new();
        for (_off, other_id) in candidates {
            if other_id.0 == entry_id.0 {
                continue;
            }
            let overlaps = arena
                .with(other_id, |other| {
                    arena.with(entry_id, |e| e.overlaps(other)).unwrap_or(false)
                })
                .unwrap_or(false);
            if !overlaps {
                continue;
            }
            let new_count = arena.with(other_id, |other| other.bump_overlap(-1));
            if new_count == Some(0) {
                released.push(other_id);
            }
        }

        if let Some(ids) = inner.by_offset.get_mut(&start) {
            ids.retain(|id| id.0 != entry_id.0);
            if ids.is_empty() {
                inner.by_offset.remove(&start);
            }
        }
        if inner.by_offset.is_empty() {
            inner.max_size_tracked = 0;
        }
        released
    }
}

impl Default for OverlapTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entry::WriteFlags;

    fn entry(arena: &Arena<RequestEntry>, offset: u64, size: u64) -> EntryId {
        arena.insert(RequestEntry::new(
            offset,
            size,
            WriteFlags::Normal,
            vec![0; size as usize],
            crate::arena::ArenaId(0),
        ))
    }

    #[test]
    fn non_overlapping_writes_are_immediately_submittable() {
        let arena = Arena::new();
        let tracker = OverlapTracker::new();
        let a = entry(&arena, 0, 8);
        let b = entry(&arena, 100, 8);
        assert!(tracker.insert(&arena, a));
        assert!(tracker.insert(&arena, b));
    }

    #[test]
    fn overlapping_write_waits_for_the_earlier_one() {
        let arena = Arena::new();
        let tracker = OverlapTracker::new();
        let a = entry(&arena, 0, 16);
        let b = entry(&arena, 8, 16);

        assert!(tracker.insert(&arena, a));
        assert!(!tracker.insert(&arena, b));
        assert_eq!(arena.with(b, |e| e.overlap_count()), Some(1));

        let released = tracker.remove(&arena, a);
        assert_eq!(released, vec![b]);
        assert_eq!(arena.with(b, |e| e.overlap_count()), Some(0));
    }

    #[test]
    fn full_cover_marks_prior_overwritten() {
        let arena = Arena::new();
        let tracker = OverlapTracker::new();
        let a = entry(&arena, 4, 4);
        let b = entry(&arena, 0, 16);
        tracker.insert(&arena, a);
        tracker.insert(&arena, b);
        assert!(arena.with(a, |e| e.is_overwritten()).unwrap());
    }
}
