//! Redo: crash-recovery scan/replay (spec.md §4.12).
//!
//! Runs once, synchronously, on mount. Grounded in the same "read until it
//! stops validating" shape as the teacher's own journal replay
//! (`fs/ufs/log.rs`'s `recover_from_log`/`install_trans`), generalized from
//! a fixed-size on-disk log array to WalB's ring-mapped lsid space.

use tracing::{info, warn};

use crate::checksum;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::logpack::LogpackHeader;
use crate::lsid::LsidSet;
use crate::ring::RingMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedoReport {
    pub written_lsid: u64,
    pub packs_applied: u64,
    pub overflow: bool,
}

pub struct Redo<'a> {
    pub log_device: &'a dyn BlockDevice,
    pub data_device: &'a dyn BlockDevice,
    pub ring: RingMapper,
    pub salt: u32,
    pub zero_discard: bool,
}

impl<'a> Redo<'a> {
    /// Scans from `start_lsid` (normally `super.written_lsid`), replaying
    /// every valid pack into the data device and shrinking the first pack
    /// with a corrupt tail record. Returns the resulting `written_lsid` and
    /// whether the log had overflowed relative to `oldest_lsid`.
    pub fn run(&self, lsids: &LsidSet, oldest_lsid: u64, start_lsid: u64) -> Result<RedoReport> {
        let pbs = self.log_device.pbs();
        let mut l = start_lsid;
        let mut packs_applied = 0u64;

        loop {
            let header_off = match self.ring.offset_pb(l) {
                Ok(o) => o,
                Err(_) => break,
            };
            let sector = match self.log_device.read_block(header_off) {
                Ok(s) => s,
                Err(_) => break,
            };
            let mut header = match LogpackHeader::decode(&sector, l, self.salt) {
                Ok(h) => h,
                Err(_) => break,
            };

            let mut pb_cursor = l + 1;
            let mut shrink_at = None;
            let records = header.records.clone();

            for (idx, record) in records.iter().enumerate() {
                let extent = record.data_pb(pbs);

                if record.is_padding() {
                    pb_cursor += extent;
                    continue;
                }

                if record.is_discard() {
                    self.apply_discard(record.offset, record.io_size as u64)?;
                    continue;
                }

                let mut payload = Vec::with_capacity((extent * pbs as u64) as usize);
                let mut read_ok = true;
                for i in 0..extent {
                    match self
                        .ring
                        .offset_pb(pb_cursor + i)
                        .ok()
                        .and_then(|off| self.log_device.read_block(off).ok())
                    {
                        Some(block) => payload.extend_from_slice(&block),
                        None => {
                            read_ok = false;
                            break;
                        }
                    }
                }
                let valid = read_ok && checksum::checksum(self.salt, &payload) == record.checksum;
                if !valid {
                    shrink_at = Some(idx);
                    break;
                }

                self.apply_normal(record.offset, &payload, pbs)?;
                pb_cursor += extent;
            }

            if let Some(idx) = shrink_at {
                warn!(lsid = l, record = idx, "redo found a corrupt record, shrinking logpack");
                header.shrink(pbs, idx);
                let rewritten = header.encode(pbs, self.salt)?;
                self.log_device.write_block(header_off, &rewritten)?;
                l += header.extent_pb();
                return self.finish(lsids, oldest_lsid, l, packs_applied);
            }

            packs_applied += 1;
            l += 1 + header.total_io_size as u64;
        }

        self.finish(lsids, oldest_lsid, l, packs_applied)
    }

    fn apply_discard(&self, offset_lb: u64, size_lb: u64) -> Result<()> {
        let pbs = self.data_device.pbs();
        let lb_per_pb = crate::block::lb_per_pb(pbs) as u64;
        let first_pb = offset_lb / lb_per_pb;
        let count_pb = crate::block::capacity_pb(pbs, size_lb);
        if self.data_device.caps().discard {
            self.data_device.discard(first_pb, count_pb)
        } else if self.zero_discard {
            let zeros = vec![0u8; pbs as usize];
            for i in 0..count_pb {
                self.data_device.write_block(first_pb + i, &zeros)?;
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    fn apply_normal(&self, offset_lb: u64, payload: &[u8], pbs: u32) -> Result<()> {
        let lb_per_pb = crate::block::lb_per_pb(pbs) as u64;
        let first_pb = offset_lb / lb_per_pb;
        let count_pb = (payload.len() as u64 + pbs as u64 - 1) / pbs as u64;
        for i in 0..count_pb {
            let start = (i as usize) * pbs as usize;
            let end = (start + pbs as usize).min(payload.len());
            self.data_device.write_block(first_pb + i, &payload[start..end])?;
        }
        Ok(())
    }

    fn finish(
        &self,
        lsids: &LsidSet,
        oldest_lsid: u64,
        written_lsid: u64,
        packs_applied: u64,
    ) -> Result<RedoReport> {
        self.data_device.flush()?;
        lsids.set_all(written_lsid);
        lsids.set_oldest(oldest_lsid)?;
        let overflow = written_lsid.saturating_sub(oldest_lsid) > self.ring.ring_buffer_size;
        info!(written_lsid, packs_applied, overflow, "redo complete");
        Ok(RedoReport {
            written_lsid,
            packs_applied,
            overflow,
        })
    }
}
