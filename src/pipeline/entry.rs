//! In-memory IO entities (spec.md §3.5): write-pack, request entry, bio
//! entry. Translates the teacher's intrusive, cyclic-back-reference kernel
//! structures (entry -> pack via a raw pointer, reclaimed by refcounting)
//! into an `Arena<Pack>` + `PackId` on the entry, per Design Notes §9.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::arena::ArenaId;
use crate::logpack::LogpackHeader;

pub type EntryId = ArenaId;
pub type PackId = ArenaId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteFlags {
    Normal,
    Flush,
    Fua,
    Discard,
}

/// One cloned bio submitted to the log or data device; owns its byte count
/// and terminal error code (spec.md §3.5).
#[derive(Debug, Clone)]
pub struct BioEntry {
    pub byte_count: u64,
    pub error: Option<String>,
}

impl BioEntry {
    pub fn new(byte_count: u64) -> Self {
        Self {
            byte_count,
            error: None,
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Single-shot completion signal a request entry fires exactly once,
/// standing in for the teacher's `WaitChannel` + sleeplock guard pairing
/// (`bio.rs`'s `vdisk_request_waitchannel`) now that we can just use a
/// `Condvar`.
#[derive(Default)]
pub struct Done {
    state: Mutex<Option<Result<(), String>>>,
    cv: Condvar,
}

impl Done {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self, result: Result<(), String>) {
        let mut g = self.state.lock().unwrap();
        if g.is_none() {
            *g = Some(result);
            self.cv.notify_all();
        }
    }

    pub fn wait(&self) -> Result<(), String> {
        let mut g = self.state.lock().unwrap();
        while g.is_none() {
            g = self.cv.wait(g).unwrap();
        }
        g.clone().unwrap()
    }

    pub fn is_signalled(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }
}

/// One original write, owning its cloned bios (spec.md §3.5).
pub struct RequestEntry {
    pub offset_lb: u64,
    pub size_lb: u64,
    pub flags: WriteFlags,
    pub payload: Vec<u8>,
    pub pack: PackId,
    pub bios: Vec<BioEntry>,
    pub overlap_count: AtomicI64,
    pub overwritten: std::sync::atomic::AtomicBool,
    pub submitted: std::sync::atomic::AtomicBool,
    pub done: Done,
    pub lsid: u64,
}

impl RequestEntry {
    pub fn new(offset_lb: u64, size_lb: u64, flags: WriteFlags, payload: Vec<u8>, pack: PackId) -> Self {
        Self {
            offset_lb,
            size_lb,
            flags,
            payload,
            pack,
            bios: Vec::new(),
            overlap_count: AtomicI64::new(0),
            overwritten: std::sync::atomic::AtomicBool::new(false),
            submitted: std::sync::atomic::AtomicBool::new(false),
            done: Done::new(),
            lsid: 0,
        }
    }

    pub fn is_flush_only(&self) -> bool {
        self.size_lb == 0 && self.flags == WriteFlags::Flush
    }

    pub fn range(&self) -> (u64, u64) {
        (self.offset_lb, self.offset_lb + self.size_lb)
    }

    pub fn overlaps(&self, other: &RequestEntry) -> bool {
        let (a0, a1) = self.range();
        let (b0, b1) = other.range();
        a0 < b1 && b0 < a1
    }

    /// Whether `self`'s range fully covers `other`'s range.
    pub fn covers(&self, other: &RequestEntry) -> bool {
        let (a0, a1) = self.range();
        let (b0, b1) = other.range();
        a0 <= b0 && b1 <= a1
    }

    pub fn mark_overwritten(&self) {
        self.overwritten.store(true, Ordering::SeqCst);
    }

    pub fn is_overwritten(&self) -> bool {
        self.overwritten.load(Ordering::SeqCst)
    }

    pub fn bump_overlap(&self, delta: i64) -> i64 {
        self.overlap_count.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn overlap_count(&self) -> i64 {
        self.overlap_count.load(Ordering::SeqCst)
    }
}

/// A staged logpack header plus its ordered request entries, owned by the
/// pack builder until handed to GC (spec.md §3.5).
pub struct WritePack {
    pub header: LogpackHeader,
    pub entries: Vec<EntryId>,
    pub is_fua: bool,
    pub failed: bool,
}

impl WritePack {
    pub fn new(logpack_lsid: u64) -> Self {
        Self {
            header: LogpackHeader::new(logpack_lsid),
            entries: Vec::new(),
            is_fua: false,
            failed: false,
        }
    }

    /// Indices into `header.records` of the non-padding records, in the
    /// same order as `entries` — the pack builder never interleaves a
    /// padding record between an entry's record and the entry itself, so
    /// `entries[i]` always corresponds to `header.records[non_padding()[i]]`.
    pub fn non_padding_record_indices(&self) -> Vec<usize> {
        self.header
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_padding())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_flush_only(&self) -> bool {
        self.header.records.is_empty() && !self.entries.is_empty()
    }
}
