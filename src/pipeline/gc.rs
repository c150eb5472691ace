//! GC (spec.md §4.8): waits on each request entry's completion, advances
//! `written_lsid` through the contiguous prefix, releases buffers and
//! pending-byte credit, and disposes of the entry.
//!
//! The teacher's equivalent is `fs/ufs/log.rs`'s `end_op` releasing a
//! transaction's held buffers once it is safely on disk; here the "buffer"
//! is a `RequestEntry`'s payload and the "transaction" is the contiguous
//! lsid range a pack occupies.

use tracing::{trace, warn};

use crate::arena::Arena;
use crate::error::{Result, WalbError};
use crate::lsid::LsidSet;
use crate::pending::PendingAdmission;
use crate::pipeline::entry::{EntryId, RequestEntry};

pub struct Gc<'a> {
    pending: &'a PendingAdmission,
}

impl<'a> Gc<'a> {
    pub fn new(pending: &'a PendingAdmission) -> Self {
        Self { pending }
    }

    /// Waits for `id`'s completion, then retires it: advances `written`
    /// (only if `id`'s lsid is exactly the current contiguous prefix edge),
    /// releases its payload's byte credit, and removes it from `arena`.
    ///
    /// Returns the entry's terminal result so a caller (e.g. the wrapper's
    /// write path) can propagate it to the original submitter.
    pub fn retire(&self, arena: &Arena<RequestEntry>, lsids: &LsidSet, id: EntryId) -> Result<()> {
        let outcome = arena.with(id, |e| e.done.wait());
        let Some(outcome) = outcome else {
            return Ok(());
        };

        let (lsid, size_lb) = arena
            .with(id, |e| (e.lsid, e.size_lb))
            .unwrap_or((0, 0));
        let bytes = size_lb * u64::from(crate::param::LOGICAL_BLOCK_SIZE);

        if outcome.is_ok() {
            if !lsids.data_completed(lsid, lsid + 1) {
                trace!(lsid, "data completion out of contiguous order, left for a later retire");
            }
        } else {
            warn!(lsid, "request entry failed, written_lsid not advanced");
        }

        if bytes > 0 {
            self.pending.release(bytes);
        }
        arena.remove(id);

        outcome.map_err(|msg| {
            crate::error::WalbError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg))
        })
    }

    /// Retires every entry of one logpack as a unit. `written` shares its
    /// address space with `completed` (both count pbs in the same ring), so
    /// the contiguous-prefix advance here uses the pack's full extent
    /// (`1 + total_io_size`, the header's own slot plus its data blocks) —
    /// the same span `LogSubmitter` advances `completed` by — rather than
    /// the per-entry `+1` of `retire`, which would leave `written` stuck
    /// behind the header's slot forever.
    pub fn retire_pack(
        &self,
        arena: &Arena<RequestEntry>,
        lsids: &LsidSet,
        pack_lsid: u64,
        extent_pb: u64,
        entry_ids: &[EntryId],
    ) -> Result<()> {
        let mut first_err: Option<WalbError> = None;
        for &id in entry_ids {
            let Some(outcome) = arena.with(id, |e| e.done.wait()) else {
                continue;
            };
            let size_lb = arena.with(id, |e| e.size_lb).unwrap_or(0);
            let bytes = size_lb * u64::from(crate::param::LOGICAL_BLOCK_SIZE);
            if bytes > 0 {
                self.pending.release(bytes);
            }
            arena.remove(id);
            if let Err(msg) = outcome {
                warn!(pack_lsid, error = %msg, "request entry failed");
                if first_err.is_none() {
                    first_err = Some(WalbError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg)));
                }
            }
        }

        if first_err.is_none() {
            if !lsids.data_completed(pack_lsid, pack_lsid + extent_pb) {
                trace!(pack_lsid, "data completion out of contiguous order, left for a later retire");
            }
            Ok(())
        } else {
            warn!(pack_lsid, "pack failed, written_lsid not advanced");
            Err(first_err.unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entry::{PackId, RequestEntry, WriteFlags};
    use std::time::Duration;

    #[test]
    fn retire_releases_pending_bytes_and_removes_entry() {
        let arena: Arena<RequestEntry> = Arena::new();
        let lsids = LsidSet::new();
        let pending = PendingAdmission::new(1 << 20, 1 << 10, Duration::from_secs(1));
        pending.acquire(512);

        let id = arena.insert(RequestEntry::new(0, 1, WriteFlags::Normal, vec![0; 512], PackId(0)));
        arena.with(id, |e| e.done.signal(Ok(())));
        arena.with_mut(id, |e| e.lsid = 0);

        let gc = Gc::new(&pending);
        gc.retire(&arena, &lsids, id).unwrap();

        assert_eq!(pending.pending_bytes(), 0);
        assert!(arena.with(id, |e| e.lsid).is_none());
        assert_eq!(lsids.snapshot().written, 1);
    }

    #[test]
    fn retire_pack_advances_written_by_the_full_pack_extent() {
        let arena: Arena<RequestEntry> = Arena::new();
        let lsids = LsidSet::new();
        let pending = PendingAdmission::new(1 << 20, 1 << 10, Duration::from_secs(1));
        pending.acquire(1024);

        // A pack at lsid 0 with one 2-pb entry: header occupies lsid 0,
        // the entry's data occupies lsid 1, so the pack's full extent is 2.
        let a = arena.insert(RequestEntry::new(0, 2, WriteFlags::Normal, vec![0; 1024], PackId(0)));
        arena.with(a, |e| e.done.signal(Ok(())));

        let gc = Gc::new(&pending);
        gc.retire_pack(&arena, &lsids, 0, 2, &[a]).unwrap();

        assert_eq!(pending.pending_bytes(), 0);
        assert!(arena.with(a, |e| e.lsid).is_none());
        assert_eq!(lsids.snapshot().written, 2);
    }

    #[test]
    fn retire_pack_does_not_advance_written_on_entry_failure() {
        let arena: Arena<RequestEntry> = Arena::new();
        let lsids = LsidSet::new();
        let pending = PendingAdmission::new(1 << 20, 1 << 10, Duration::from_secs(1));
        pending.acquire(512);

        let a = arena.insert(RequestEntry::new(0, 1, WriteFlags::Normal, vec![0; 512], PackId(0)));
        arena.with(a, |e| e.done.signal(Err("injected".into())));

        let gc = Gc::new(&pending);
        assert!(gc.retire_pack(&arena, &lsids, 0, 2, &[a]).is_err());
        assert_eq!(lsids.snapshot().written, 0);
    }
}
