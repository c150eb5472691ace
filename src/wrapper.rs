//! Top-level wrapper device (spec.md §4.13): the one object an embedder
//! actually holds. Write entry point checks read-only/frozen/admission,
//! builds and submits packs, hands off to the log waiter/data submitter/GC
//! pipeline, and reports capacity/capability/resize/clear-log per the
//! wrapper contract. Reads go straight to the data device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uuid::Uuid;

use crate::arena::Arena;
use crate::checkpoint::{CheckpointHooks, Checkpointer};
use crate::control::ControlTarget;
use crate::device::BlockDevice;
use crate::error::{Result, WalbError};
use crate::freeze::{FreezeGate, FreezeHooks, FreezeState};
use crate::lsid::LsidSet;
use crate::overlap::OverlapTracker;
use crate::pack_builder::{IncomingWrite, PackBuilder};
use crate::pending::PendingAdmission;
use crate::pipeline::entry::{RequestEntry, WriteFlags};
use crate::pipeline::gc::Gc;
use crate::pipeline::submit::{FlushInterval, LogSubmitter};
use crate::pipeline::waiter::{DataSubmitter, LogWaiter};
use crate::ring::RingMapper;
use crate::superblock::Superblock;

struct Devices {
    log: Arc<dyn BlockDevice>,
    data: Arc<dyn BlockDevice>,
}

struct WrapperHooks {
    devices: Devices,
    superblock: Mutex<Superblock>,
    lsids: Arc<LsidSet>,
    read_only: AtomicBool,
}

impl CheckpointHooks for WrapperHooks {
    fn flush_and_write_superblock(&self) -> Result<()> {
        self.devices.data.flush()?;
        let snap = self.lsids.snapshot();
        let mut sb = self.superblock.lock().unwrap();
        sb.oldest_lsid = snap.oldest;
        sb.written_lsid = snap.written;
        let pbs = sb.physical_bs;
        let sector = sb.encode(pbs)?;
        self.devices.log.write_block(0, &sector)?;
        self.devices.log.write_block(sb.super1_offset(), &sector)?;
        Ok(())
    }

    fn mark_read_only(&self) {
        warn!("checkpoint sync failed, device marked read-only");
        self.read_only.store(true, Ordering::SeqCst);
    }
}

impl FreezeHooks for WrapperHooks {
    fn stop_io_and_checkpointer(&self) {
        info!("freeze: stopping io/checkpointer ahead of a frozen window");
    }

    fn start_checkpointer_and_resume_io(&self) {
        info!("melt: resuming io/checkpointer");
    }
}

/// The object an embedder holds: one (log device, data device) pair plus
/// all of the in-memory state from §3–§4 wired together.
pub struct WrapperDevice {
    hooks: Arc<WrapperHooks>,
    ring: RingMapper,
    salt: u32,
    pbs: u32,

    lsids: Arc<LsidSet>,
    arena: Arena<RequestEntry>,
    overlap: OverlapTracker,
    pending: PendingAdmission,
    pack_builder: PackBuilder,
    flush_interval: Mutex<FlushInterval>,

    checkpointer: Arc<Checkpointer<WrapperHooks>>,
    freeze_gate: Arc<FreezeGate<WrapperHooks>>,

    zero_discard: bool,
}

impl WrapperDevice {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        log_device: Arc<dyn BlockDevice>,
        data_device: Arc<dyn BlockDevice>,
        superblock: Superblock,
        max_logpack_pb: u64,
        max_pending_mb: u32,
        min_pending_mb: u32,
        queue_stop_timeout: std::time::Duration,
        checkpoint_interval_ms: u32,
        flush_interval_ms: u64,
        flush_interval_pb: u64,
        zero_discard: bool,
    ) -> Arc<Self> {
        let ring = RingMapper::new(superblock.ring_begin(), superblock.ring_buffer_size);
        let pbs = superblock.physical_bs;
        let salt = superblock.log_checksum_salt;

        let lsids = Arc::new(LsidSet::from_snapshot(crate::lsid::LsidSnapshot {
            oldest: superblock.oldest_lsid,
            prev_written: superblock.written_lsid,
            written: superblock.written_lsid,
            permanent: superblock.written_lsid,
            completed: superblock.written_lsid,
            flush: superblock.written_lsid,
            latest: superblock.written_lsid,
        }));

        let hooks = Arc::new(WrapperHooks {
            devices: Devices {
                log: log_device,
                data: data_device,
            },
            superblock: Mutex::new(superblock),
            lsids: lsids.clone(),
            read_only: AtomicBool::new(false),
        });

        let checkpointer = Checkpointer::new(checkpoint_interval_ms, hooks.clone(), lsids.clone());
        let freeze_gate = FreezeGate::new(hooks.clone());

        let max_bytes = max_pending_mb as u64 * 1024 * 1024;
        let min_bytes = min_pending_mb as u64 * 1024 * 1024;

        let this = Arc::new(Self {
            hooks,
            ring,
            salt,
            pbs,
            lsids,
            arena: Arena::new(),
            overlap: OverlapTracker::new(),
            pending: PendingAdmission::new(max_bytes, min_bytes, queue_stop_timeout),
            pack_builder: PackBuilder::new(pbs, max_logpack_pb, ring),
            flush_interval: Mutex::new(FlushInterval::new(flush_interval_ms, flush_interval_pb)),
            checkpointer,
            freeze_gate,
            zero_discard,
        });
        this.checkpointer.start_checkpointing();
        this
    }

    fn is_read_only(&self) -> bool {
        self.hooks.read_only.load(Ordering::SeqCst)
    }

    /// Write entry point: rejected when read-only, blocked on the freeze
    /// gate and pending admission, then run through the full pack-build ->
    /// log-submit -> data-submit -> GC pipeline. Blocks until every write in
    /// `writes` is durable on the data device, returning the first error.
    pub fn write(&self, writes: Vec<IncomingWrite>) -> Result<()> {
        if self.is_read_only() {
            return Err(WalbError::ReadOnly);
        }
        if self.freeze_gate.is_frozen() {
            return Err(WalbError::Frozen);
        }

        let total_bytes: u64 = writes
            .iter()
            .map(|w| w.size_lb * u64::from(crate::param::LOGICAL_BLOCK_SIZE))
            .sum();
        if total_bytes > 0 {
            self.pending.acquire(total_bytes);
        }

        let built = self.pack_builder.build(writes, &self.arena, &self.lsids)?;
        let submitter = LogSubmitter::new(self.hooks.devices.log.as_ref(), self.ring, self.salt);
        let waiter = LogWaiter::new(&self.overlap);
        let data_submitter = DataSubmitter::new(self.hooks.devices.data.as_ref(), &self.overlap, self.zero_discard);
        let gc = Gc::new(&self.pending);

        let mut first_err = None;
        for mut built_pack in built {
            let mut interval = self.flush_interval.lock().unwrap();
            let outcome = submitter.submit(&mut built_pack.pack, &self.arena, &self.lsids, &mut interval);
            drop(interval);

            match outcome {
                Ok(()) => waiter.on_log_success(&built_pack.pack, &self.arena, &data_submitter),
                Err(e) => {
                    warn!(error = %e, "log submit failed; device going read-only");
                    self.hooks.read_only.store(true, Ordering::SeqCst);
                    waiter.on_log_failure(&built_pack.pack, &self.arena, &e.to_string());
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }

            let extent_pb = if built_pack.pack.is_flush_only() {
                1
            } else {
                built_pack.pack.header.extent_pb()
            };
            if let Err(e) = gc.retire_pack(
                &self.arena,
                &self.lsids,
                built_pack.lsid,
                extent_pb,
                &built_pack.pack.entries,
            ) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reads bypass the log entirely (spec.md §4.13).
    pub fn read(&self, offset_pb: u64, count_pb: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity((count_pb * self.pbs as u64) as usize);
        for i in 0..count_pb {
            out.extend(self.hooks.devices.data.read_block(offset_pb + i)?);
        }
        Ok(out)
    }

    pub fn capacity_lb(&self) -> u64 {
        let sb = self.hooks.superblock.lock().unwrap();
        sb.device_size
    }

    /// Only *both* log and data advertising FLUSH gives the wrapper FLUSH;
    /// FUA follows the log device alone; discard is always advertised
    /// (spec.md §4.13).
    pub fn caps(&self) -> crate::device::DeviceCaps {
        let log_caps = self.hooks.devices.log.caps();
        let data_caps = self.hooks.devices.data.caps();
        crate::device::DeviceCaps {
            flush: log_caps.flush && data_caps.flush,
            fua: log_caps.fua,
            discard: true,
        }
    }

    /// Growth-only resize, bounded by the data device's own capacity.
    pub fn resize(&self, new_size_lb: u64) -> Result<()> {
        let mut sb = self.hooks.superblock.lock().unwrap();
        if new_size_lb <= sb.device_size {
            return Err(WalbError::validation("resize must grow the device"));
        }
        let lb_per_pb = crate::block::lb_per_pb(sb.physical_bs) as u64;
        let data_capacity_lb = self.hooks.devices.data.capacity_pb() * lb_per_pb;
        if new_size_lb > data_capacity_lb {
            return Err(WalbError::validation(
                "resize must not exceed the underlying data device's capacity",
            ));
        }
        sb.device_size = new_size_lb;
        drop(sb);
        self.hooks.flush_and_write_superblock()
    }

    /// Freeze, reset every lsid, regenerate uuid/salt, sync, invalidate the
    /// lsid-0 slot, clear overflow, melt (spec.md §4.13's clear-log steps).
    pub fn clear_log(&self) -> Result<()> {
        self.freeze_gate.freeze(0)?;

        self.lsids.clear();
        let mut sb = self.hooks.superblock.lock().unwrap();
        let log_capacity_pb = self.hooks.devices.log.capacity_pb();
        let grown_ring = log_capacity_pb.saturating_sub(sb.ring_begin());
        if grown_ring > sb.ring_buffer_size {
            sb.ring_buffer_size = grown_ring;
        }
        sb.uuid = *Uuid::new_v4().as_bytes();
        sb.log_checksum_salt = rand::random();
        sb.oldest_lsid = 0;
        sb.written_lsid = 0;
        let pbs = sb.physical_bs;
        let ring_begin = sb.ring_begin();
        let sector = sb.encode(pbs)?;
        self.hooks.devices.log.write_block(0, &sector)?;
        self.hooks.devices.log.write_block(sb.super1_offset(), &sector)?;
        drop(sb);

        // Invalidate the pb at ring-offset for lsid 0 so a stale logpack
        // header there is never mistaken for a live one after the clear.
        self.hooks.devices.log.write_block(ring_begin, &vec![0u8; pbs as usize])?;

        self.freeze_gate.melt()
    }
}

impl ControlTarget for WrapperDevice {
    fn lsids(&self) -> crate::lsid::LsidSnapshot {
        self.lsids.snapshot()
    }

    fn set_oldest_lsid(&self, value: u64) -> Result<()> {
        self.lsids.set_oldest(value)
    }

    fn checkpoint_interval_ms(&self) -> u32 {
        self.checkpointer.interval_ms()
    }

    fn set_checkpoint_interval_ms(&self, ms: u32) {
        self.checkpointer.set_interval_ms(ms)
    }

    fn take_checkpoint(&self) -> Result<()> {
        self.checkpointer.take_checkpoint()
    }

    fn log_usage_pb(&self) -> u64 {
        self.lsids.snapshot().log_usage()
    }

    fn log_capacity_pb(&self) -> u64 {
        self.ring.ring_buffer_size
    }

    fn is_flush_capable(&self) -> bool {
        self.caps().flush
    }

    fn is_log_overflow(&self) -> bool {
        self.lsids.log_capacity_check(self.ring.ring_buffer_size).is_err()
    }

    fn is_frozen(&self) -> bool {
        self.freeze_gate.state() != FreezeState::Melted
    }

    fn freeze(&self, timeout_s: u32) -> Result<()> {
        self.freeze_gate.freeze(timeout_s)
    }

    fn melt(&self) -> Result<()> {
        self.freeze_gate.melt()
    }

    fn resize(&self, new_size_lb: u64) -> Result<()> {
        WrapperDevice::resize(self, new_size_lb)
    }

    fn clear_log(&self) -> Result<()> {
        WrapperDevice::clear_log(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn fresh_wrapper() -> Arc<WrapperDevice> {
        let pbs = 512;
        let log = Arc::new(MemBlockDevice::new(pbs, 1100));
        let data = Arc::new(MemBlockDevice::new(pbs, 1100));
        let sb = Superblock::new(pbs, 0, 7, [0u8; 16], "test0", 1024, 1100 * 512 / pbs as u64);
        WrapperDevice::open(
            log,
            data,
            sb,
            256,
            64,
            32,
            std::time::Duration::from_secs(1),
            0,
            0,
            0,
            false,
        )
    }

    #[test]
    fn write_then_read_round_trips() {
        let dev = fresh_wrapper();
        let writes = vec![IncomingWrite {
            offset_lb: 0,
            size_lb: 1,
            flags: WriteFlags::Normal,
            payload: vec![0x5au8; 512],
        }];
        dev.write(writes).unwrap();
        assert_eq!(dev.read(0, 1).unwrap(), vec![0x5au8; 512]);
        assert_eq!(dev.lsids.snapshot().written, 2);
    }

    #[test]
    fn frozen_device_rejects_writes() {
        let dev = fresh_wrapper();
        dev.freeze_gate.freeze(0).unwrap();
        let writes = vec![IncomingWrite {
            offset_lb: 0,
            size_lb: 1,
            flags: WriteFlags::Normal,
            payload: vec![1u8; 512],
        }];
        assert!(matches!(dev.write(writes), Err(WalbError::Frozen)));
    }

    #[test]
    fn resize_rejects_shrink() {
        let dev = fresh_wrapper();
        let current = dev.capacity_lb();
        assert!(dev.resize(current - 1).is_err());
    }

    #[test]
    fn clear_log_resets_watermarks() {
        let dev = fresh_wrapper();
        let writes = vec![IncomingWrite {
            offset_lb: 0,
            size_lb: 1,
            flags: WriteFlags::Normal,
            payload: vec![9u8; 512],
        }];
        dev.write(writes).unwrap();
        dev.clear_log().unwrap();
        assert_eq!(dev.lsids.snapshot().written, 0);
    }
}
