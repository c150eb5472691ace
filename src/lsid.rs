//! The seven-watermark LSID state machine (spec.md §3.4, §4.3).
//!
//! Guarded by a single short-held lock (spec.md §5, "a per-device lsid-set
//! lock (short critical sections, never held across IO)"), the same
//! discipline the teacher applies to its own `Spinlock`-protected counters:
//! acquire, mutate, release, never sleep while held.

use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, WalbError};

/// Plain snapshot of the watermark set, cheap to copy out from under the
/// lock for logging or reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LsidSnapshot {
    pub oldest: u64,
    pub prev_written: u64,
    pub written: u64,
    pub permanent: u64,
    pub completed: u64,
    pub flush: u64,
    pub latest: u64,
}

impl LsidSnapshot {
    /// Testable property 1: the total order across all seven watermarks.
    pub fn is_well_ordered(&self) -> bool {
        self.oldest <= self.prev_written
            && self.prev_written <= self.written
            && self.written <= self.permanent
            && self.permanent <= self.completed
            && self.completed <= self.latest
            && self.permanent <= self.flush
            && self.flush <= self.latest
    }

    pub fn log_usage(&self) -> u64 {
        self.latest - self.oldest
    }
}

struct Inner {
    snap: LsidSnapshot,
}

/// Owns the watermark set for one device. All mutation happens through the
/// named transitions of spec.md §4.3; nothing else is allowed to poke the
/// fields directly, which is what keeps monotonicity provable.
pub struct LsidSet {
    inner: Mutex<Inner>,
}

impl LsidSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                snap: LsidSnapshot::default(),
            }),
        }
    }

    pub fn from_snapshot(snap: LsidSnapshot) -> Self {
        Self {
            inner: Mutex::new(Inner { snap }),
        }
    }

    pub fn snapshot(&self) -> LsidSnapshot {
        self.inner.lock().unwrap().snap
    }

    /// "Pack built": `latest += 1 + total_io_size`.
    pub fn pack_built(&self, total_io_size: u64) -> u64 {
        let mut g = self.inner.lock().unwrap();
        let assigned = g.snap.latest;
        g.snap.latest += 1 + total_io_size;
        debug!(assigned, new_latest = g.snap.latest, "pack_built");
        assigned
    }

    /// "Log submit issued FLUSH": `flush <- max(flush, upto)`.
    pub fn flush_issued(&self, upto: u64) {
        let mut g = self.inner.lock().unwrap();
        g.snap.flush = g.snap.flush.max(upto.min(g.snap.latest));
        debug!(flush = g.snap.flush, "flush_issued");
    }

    /// "Log bio completes": advance `completed` to the max contiguous
    /// prefix. Caller supplies the lsid range `[from, to)` that just
    /// completed; advancing only happens if `from == completed` (no gap).
    pub fn log_completed(&self, from: u64, to: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        if from != g.snap.completed {
            return false;
        }
        g.snap.completed = to;
        debug!(completed = g.snap.completed, "log_completed");
        true
    }

    /// "Log device flushed": `permanent <- max(permanent, prior completed)`.
    pub fn log_flushed(&self, prior_completed: u64) {
        let mut g = self.inner.lock().unwrap();
        g.snap.permanent = g.snap.permanent.max(prior_completed);
        debug!(permanent = g.snap.permanent, "log_flushed");
    }

    /// "Data IO completes": advance `written` to the max contiguous prefix,
    /// same no-gap discipline as `log_completed`.
    pub fn data_completed(&self, from: u64, to: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        if from != g.snap.written {
            return false;
        }
        g.snap.written = to;
        debug!(written = g.snap.written, "data_completed");
        true
    }

    /// "Superblock synced": `prev_written <- written`.
    pub fn superblock_synced(&self) -> u64 {
        let mut g = self.inner.lock().unwrap();
        g.snap.prev_written = g.snap.written;
        debug!(prev_written = g.snap.prev_written, "superblock_synced");
        g.snap.prev_written
    }

    /// "Old logs retired": advance `oldest`, bounded by `prev_written`.
    pub fn retire_old_logs(&self, upto: u64) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        if upto > g.snap.prev_written {
            return Err(WalbError::validation(
                "oldest cannot advance past prev_written",
            ));
        }
        if upto < g.snap.oldest {
            return Err(WalbError::validation("oldest must not regress"));
        }
        g.snap.oldest = upto;
        debug!(oldest = g.snap.oldest, "retire_old_logs");
        Ok(())
    }

    /// "Clear log": reset every watermark to 0.
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        g.snap = LsidSnapshot::default();
        debug!("lsid set cleared");
    }

    /// Force every watermark to `value` (used by redo, spec.md §4.12 step 5,
    /// which sets `completed = permanent = flush = latest = written =
    /// prev_written` in one shot after a successful replay).
    pub fn set_all(&self, value: u64) {
        let mut g = self.inner.lock().unwrap();
        g.snap = LsidSnapshot {
            oldest: g.snap.oldest,
            prev_written: value,
            written: value,
            permanent: value,
            completed: value,
            flush: value,
            latest: value,
        };
        debug!(value, "lsid set forced to single value after redo");
    }

    pub fn set_oldest(&self, value: u64) -> Result<()> {
        self.retire_old_logs(value)
    }

    pub fn log_capacity_check(&self, ring_buffer_size: u64) -> Result<()> {
        let snap = self.snapshot();
        let usage = snap.log_usage();
        if usage > ring_buffer_size {
            return Err(WalbError::Overflow {
                usage,
                capacity: ring_buffer_size,
            });
        }
        Ok(())
    }
}

impl Default for LsidSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_built_advances_latest_monotonically() {
        let set = LsidSet::new();
        let a = set.pack_built(3);
        let b = set.pack_built(1);
        assert_eq!(a, 0);
        assert_eq!(b, 4);
        assert_eq!(set.snapshot().latest, 6);
    }

    #[test]
    fn completion_respects_contiguous_prefix() {
        let set = LsidSet::new();
        set.pack_built(5);
        // Completion for a later range first: should not advance.
        assert!(!set.log_completed(3, 6));
        assert_eq!(set.snapshot().completed, 0);
        // Completion for the actual prefix: advances.
        assert!(set.log_completed(0, 3));
        assert_eq!(set.snapshot().completed, 3);
    }

    #[test]
    fn default_snapshot_is_well_ordered() {
        assert!(LsidSnapshot::default().is_well_ordered());
    }

    #[test]
    fn oldest_cannot_pass_prev_written() {
        let set = LsidSet::new();
        assert!(set.retire_old_logs(1).is_err());
    }
}
