//! Log submitter (spec.md §4.6): checksums, encodes, and writes one
//! write-pack's header and data blocks to the log device's ring.

use tracing::{error, trace, warn};

use crate::arena::Arena;
use crate::checksum;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::lsid::LsidSet;
use crate::pipeline::entry::{RequestEntry, WriteFlags, WritePack};
use crate::ring::RingMapper;

/// Tracks the two log-flush-interval thresholds (time and size) described
/// in spec.md §4.6's closing paragraph.
pub struct FlushInterval {
    interval_ms: u64,
    interval_pb: u64,
    pb_since_flush: u64,
    last_flush_at: std::time::Instant,
}

impl FlushInterval {
    pub fn new(interval_ms: u64, interval_pb: u64) -> Self {
        Self {
            interval_ms,
            interval_pb,
            pb_since_flush: 0,
            last_flush_at: std::time::Instant::now(),
        }
    }

    /// Whether a FLUSH should ride on the next header bio, and resets the
    /// counters if so.
    fn due(&mut self, extent_pb: u64) -> bool {
        self.pb_since_flush += extent_pb;
        let time_due = self.interval_ms > 0 && self.last_flush_at.elapsed().as_millis() as u64 >= self.interval_ms;
        let size_due = self.interval_pb > 0 && self.pb_since_flush >= self.interval_pb;
        if time_due || size_due {
            self.pb_since_flush = 0;
            self.last_flush_at = std::time::Instant::now();
            true
        } else {
            false
        }
    }
}

pub struct LogSubmitter<'a> {
    device: &'a dyn BlockDevice,
    ring: RingMapper,
    salt: u32,
}

impl<'a> LogSubmitter<'a> {
    pub fn new(device: &'a dyn BlockDevice, ring: RingMapper, salt: u32) -> Self {
        Self { device, ring, salt }
    }

    /// Runs the full algorithm of §4.6 for one pack. On any bio failure the
    /// pack is marked `failed` and the error is returned; the caller (the
    /// per-device submit loop) is responsible for dropping subsequent packs
    /// in the batch and flipping the device read-only (§4.7).
    pub fn submit(
        &self,
        pack: &mut WritePack,
        arena: &Arena<RequestEntry>,
        lsids: &LsidSet,
        flush_interval: &mut FlushInterval,
    ) -> Result<()> {
        let pbs = self.device.pbs();
        let lsid = pack.header.logpack_lsid;

        if pack.is_flush_only() {
            trace!(lsid, "submitting flush-only pack");
            if let Err(e) = self.device.flush() {
                pack.failed = true;
                error!(lsid, error = %e, "flush-only pack failed");
                return Err(e);
            }
            lsids.flush_issued(lsid);
            lsids.log_completed(lsid, lsid);
            return Ok(());
        }

        // Step 1: per-record checksums against the real payload.
        let non_padding = pack.non_padding_record_indices();
        for (entry_id, &idx) in pack.entries.iter().zip(non_padding.iter()) {
            let record = &mut pack.header.records[idx];
            if record.is_discard() {
                continue;
            }
            let payload = arena
                .with(*entry_id, |e| e.payload.clone())
                .unwrap_or_default();
            record.checksum = checksum::checksum(self.salt, &payload);
        }

        // Step 2: header self-checksum.
        let header_bytes = pack.header.encode(pbs, self.salt)?;

        // Step 3/4: write header then data blocks, innermost-first so a
        // crash mid-pack always leaves the header as the authoritative
        // description of what actually landed (redo re-validates it anyway).
        let header_offset = match self.ring.offset_pb(lsid) {
            Ok(o) => o,
            Err(e) => {
                pack.failed = true;
                return Err(e);
            }
        };

        let mut pb_cursor = lsid + 1;
        let mut entry_iter = pack.entries.iter();
        for record in &pack.header.records {
            let extent = record.data_pb(pbs);
            if record.is_padding() {
                let zeros = vec![0u8; pbs as usize];
                for i in 0..extent {
                    let off = match self.ring.offset_pb(pb_cursor + i) {
                        Ok(o) => o,
                        Err(e) => {
                            pack.failed = true;
                            return Err(e);
                        }
                    };
                    if let Err(e) = self.device.write_block(off, &zeros) {
                        pack.failed = true;
                        return Err(e);
                    }
                }
            } else if !record.is_discard() {
                let entry_id = entry_iter.next().expect("entry/record alignment");
                let payload = arena.with(*entry_id, |e| e.payload.clone()).unwrap_or_default();
                for i in 0..extent {
                    let start = (i as usize) * pbs as usize;
                    let end = (start + pbs as usize).min(payload.len());
                    let mut block = vec![0u8; pbs as usize];
                    if start < payload.len() {
                        block[..end - start].copy_from_slice(&payload[start..end]);
                    }
                    let off = match self.ring.offset_pb(pb_cursor + i) {
                        Ok(o) => o,
                        Err(e) => {
                            pack.failed = true;
                            return Err(e);
                        }
                    };
                    if let Err(e) = self.device.write_block(off, &block) {
                        pack.failed = true;
                        return Err(e);
                    }
                }
            } else {
                // DISCARD contributes no log payload; its entry is still
                // consumed from the iterator to keep alignment with
                // `non_padding_record_indices` (discard is non-padding).
                entry_iter.next();
            }
            pb_cursor += extent;
        }

        if let Err(e) = self.device.write_block(header_offset, &header_bytes) {
            pack.failed = true;
            error!(lsid, error = %e, "logpack header write failed");
            return Err(e);
        }

        let any_flush_entry = pack
            .entries
            .iter()
            .any(|id| arena.with(*id, |e| e.flags == WriteFlags::Flush).unwrap_or(false));
        let extent = pack.header.extent_pb();
        if any_flush_entry || pack.is_fua || flush_interval.due(extent) {
            if let Err(e) = self.device.flush() {
                pack.failed = true;
                warn!(lsid, error = %e, "post-submit flush failed");
                return Err(e);
            }
            lsids.flush_issued(lsid + extent);
        }

        lsids.log_completed(lsid, lsid + extent);
        trace!(lsid, extent, "pack submitted to log device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::device::MemBlockDevice;
    use crate::pack_builder::{IncomingWrite, PackBuilder};

    #[test]
    fn submits_a_normal_pack_and_advances_completed() {
        let arena: Arena<RequestEntry> = Arena::new();
        let lsids = LsidSet::new();
        let ring = RingMapper::new(1, 1024);
        let builder = PackBuilder::new(512, 256, ring);
        let writes = vec![IncomingWrite {
            offset_lb: 0,
            size_lb: 1,
            flags: WriteFlags::Normal,
            payload: vec![0xAB; 512],
        }];
        let mut built = builder.build(writes, &arena, &lsids).unwrap();
        assert_eq!(built.len(), 1);

        let dev = MemBlockDevice::new(512, 1024);
        let submitter = LogSubmitter::new(&dev, ring, 7);
        let mut interval = FlushInterval::new(0, 0);
        submitter
            .submit(&mut built[0].pack, &arena, &lsids, &mut interval)
            .unwrap();

        assert_eq!(lsids.snapshot().completed, 2);
        assert!(!built[0].pack.failed);
    }
}
