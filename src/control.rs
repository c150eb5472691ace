//! Control-plane command set (spec.md §6.3).
//!
//! The real ioctl transport (major/minor allocation, device-node creation)
//! is host-kernel plumbing that spec.md §1 keeps out of scope, the same way
//! the teacher's own kernel code is never asked to invent the RISC-V trap
//! vector it runs under. `ControlTarget`/`DeviceRegistry` are the seam: this
//! module owns validation and dispatch shape, a host plugs in the two
//! traits to actually allocate devices.

use crate::config::StartParam;
use crate::error::{Result, WalbError};
use crate::lsid::LsidSnapshot;
use crate::param::WALB_VERSION;

#[derive(Clone, Debug)]
pub enum ControlCommand {
    Version,
    GetMajor,
    StartDev {
        log_devt: (u32, u32),
        data_devt: (u32, u32),
        requested_minor: Option<u32>,
        param: StartParam,
    },
    StopDev {
        walb_devt: (u32, u32),
        force: bool,
    },
    ListDev {
        minor_range: (u32, u32),
    },
    NumOfDev,
    GetOldestLsid,
    GetWrittenLsid,
    GetPermanentLsid,
    GetCompletedLsid,
    SetOldestLsid(u64),
    GetCheckpointInterval,
    SetCheckpointInterval(u32),
    TakeCheckpoint,
    GetLogUsage,
    GetLogCapacity,
    IsFlushCapable,
    IsLogOverflow,
    IsFrozen,
    Resize(u64),
    ClearLog,
    Freeze(u32),
    Melt,
    /// Legacy `WALB_IOCTL_STATUS`, explicitly unsupported (Design Notes §9).
    Status,
    /// Legacy snapshot ioctls, explicitly unsupported (Design Notes §9).
    LegacySnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlResponse {
    Unit,
    U32(u32),
    U64(u64),
    Bool(bool),
    DevHandle { major: u32, minor: u32, name: String },
    DevList(Vec<(String, u32, u32)>),
}

/// Per-device operations a started WalB device answers control commands
/// with. Implemented by the wrapper device.
pub trait ControlTarget {
    fn lsids(&self) -> LsidSnapshot;
    fn set_oldest_lsid(&self, value: u64) -> Result<()>;
    fn checkpoint_interval_ms(&self) -> u32;
    fn set_checkpoint_interval_ms(&self, ms: u32);
    fn take_checkpoint(&self) -> Result<()>;
    fn log_usage_pb(&self) -> u64;
    fn log_capacity_pb(&self) -> u64;
    fn is_flush_capable(&self) -> bool;
    fn is_log_overflow(&self) -> bool;
    fn is_frozen(&self) -> bool;
    fn freeze(&self, timeout_s: u32) -> Result<()>;
    fn melt(&self) -> Result<()>;
    fn resize(&self, new_size_lb: u64) -> Result<()>;
    fn clear_log(&self) -> Result<()>;
}

/// Device-registry-level operations: allocation of a walb device node over
/// a (log, data) device pair. A host process supplies the actual minor/devt
/// bookkeeping; this crate only validates `StartParam` before handing off.
pub trait DeviceRegistry {
    fn major(&self) -> u32;
    fn start_dev(
        &self,
        log_devt: (u32, u32),
        data_devt: (u32, u32),
        requested_minor: Option<u32>,
        param: &StartParam,
    ) -> Result<(u32, u32, String)>;
    fn stop_dev(&self, walb_devt: (u32, u32), force: bool) -> Result<()>;
    fn list_dev(&self, minor_range: (u32, u32)) -> Vec<(String, u32, u32)>;
    fn num_of_dev(&self) -> u32;
}

/// Dispatches one command. `target` answers per-device queries;
/// `registry` answers device-lifecycle queries. Both are optional in the
/// sense that a caller handling only one half of the command set can pass a
/// target/registry that errors on the other half's commands.
pub fn dispatch(
    target: &dyn ControlTarget,
    registry: &dyn DeviceRegistry,
    cmd: ControlCommand,
) -> Result<ControlResponse> {
    use ControlCommand::*;
    match cmd {
        Version => Ok(ControlResponse::U32(WALB_VERSION as u32)),
        GetMajor => Ok(ControlResponse::U32(registry.major())),
        StartDev {
            log_devt,
            data_devt,
            requested_minor,
            param,
        } => {
            param.validate()?;
            let (major, minor, name) = registry.start_dev(log_devt, data_devt, requested_minor, &param)?;
            Ok(ControlResponse::DevHandle { major, minor, name })
        }
        StopDev { walb_devt, force } => {
            registry.stop_dev(walb_devt, force)?;
            Ok(ControlResponse::Unit)
        }
        ListDev { minor_range } => Ok(ControlResponse::DevList(registry.list_dev(minor_range))),
        NumOfDev => Ok(ControlResponse::U32(registry.num_of_dev())),
        GetOldestLsid => Ok(ControlResponse::U64(target.lsids().oldest)),
        GetWrittenLsid => Ok(ControlResponse::U64(target.lsids().written)),
        GetPermanentLsid => Ok(ControlResponse::U64(target.lsids().permanent)),
        GetCompletedLsid => Ok(ControlResponse::U64(target.lsids().completed)),
        SetOldestLsid(value) => {
            target.set_oldest_lsid(value)?;
            Ok(ControlResponse::Unit)
        }
        GetCheckpointInterval => Ok(ControlResponse::U32(target.checkpoint_interval_ms())),
        SetCheckpointInterval(ms) => {
            target.set_checkpoint_interval_ms(ms);
            Ok(ControlResponse::Unit)
        }
        TakeCheckpoint => {
            target.take_checkpoint()?;
            Ok(ControlResponse::Unit)
        }
        GetLogUsage => Ok(ControlResponse::U64(target.log_usage_pb())),
        GetLogCapacity => Ok(ControlResponse::U64(target.log_capacity_pb())),
        IsFlushCapable => Ok(ControlResponse::Bool(target.is_flush_capable())),
        IsLogOverflow => Ok(ControlResponse::Bool(target.is_log_overflow())),
        IsFrozen => Ok(ControlResponse::Bool(target.is_frozen())),
        Resize(new_size_lb) => {
            target.resize(new_size_lb)?;
            Ok(ControlResponse::Unit)
        }
        ClearLog => {
            target.clear_log()?;
            Ok(ControlResponse::Unit)
        }
        Freeze(timeout_s) => {
            target.freeze(timeout_s)?;
            Ok(ControlResponse::Unit)
        }
        Melt => {
            target.melt()?;
            Ok(ControlResponse::Unit)
        }
        Status => Err(WalbError::Unsupported("WALB_IOCTL_STATUS")),
        LegacySnapshot => Err(WalbError::Unsupported("legacy snapshot ioctls")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeTarget {
        snap: LsidSnapshot,
        frozen: Mutex<bool>,
    }

    impl ControlTarget for FakeTarget {
        fn lsids(&self) -> LsidSnapshot {
            self.snap
        }
        fn set_oldest_lsid(&self, _value: u64) -> Result<()> {
            Ok(())
        }
        fn checkpoint_interval_ms(&self) -> u32 {
            1000
        }
        fn set_checkpoint_interval_ms(&self, _ms: u32) {}
        fn take_checkpoint(&self) -> Result<()> {
            Ok(())
        }
        fn log_usage_pb(&self) -> u64 {
            10
        }
        fn log_capacity_pb(&self) -> u64 {
            100
        }
        fn is_flush_capable(&self) -> bool {
            true
        }
        fn is_log_overflow(&self) -> bool {
            false
        }
        fn is_frozen(&self) -> bool {
            *self.frozen.lock().unwrap()
        }
        fn freeze(&self, _timeout_s: u32) -> Result<()> {
            *self.frozen.lock().unwrap() = true;
            Ok(())
        }
        fn melt(&self) -> Result<()> {
            *self.frozen.lock().unwrap() = false;
            Ok(())
        }
        fn resize(&self, _new_size_lb: u64) -> Result<()> {
            Ok(())
        }
        fn clear_log(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeRegistry;

    impl DeviceRegistry for FakeRegistry {
        fn major(&self) -> u32 {
            251
        }
        fn start_dev(
            &self,
            _log_devt: (u32, u32),
            _data_devt: (u32, u32),
            _requested_minor: Option<u32>,
            _param: &StartParam,
        ) -> Result<(u32, u32, String)> {
            Ok((251, 0, "data0".into()))
        }
        fn stop_dev(&self, _walb_devt: (u32, u32), _force: bool) -> Result<()> {
            Ok(())
        }
        fn list_dev(&self, _minor_range: (u32, u32)) -> Vec<(String, u32, u32)> {
            vec![("data0".into(), 251, 0)]
        }
        fn num_of_dev(&self) -> u32 {
            1
        }
    }

    #[test]
    fn version_returns_the_wire_constant() {
        let target = FakeTarget {
            snap: LsidSnapshot::default(),
            frozen: Mutex::new(false),
        };
        let reg = FakeRegistry;
        let resp = dispatch(&target, &reg, ControlCommand::Version).unwrap();
        assert_eq!(resp, ControlResponse::U32(WALB_VERSION as u32));
    }

    #[test]
    fn status_and_legacy_snapshot_are_unsupported() {
        let target = FakeTarget {
            snap: LsidSnapshot::default(),
            frozen: Mutex::new(false),
        };
        let reg = FakeRegistry;
        assert!(dispatch(&target, &reg, ControlCommand::Status).is_err());
        assert!(dispatch(&target, &reg, ControlCommand::LegacySnapshot).is_err());
    }

    #[test]
    fn freeze_then_is_frozen_round_trips_through_dispatch() {
        let target = FakeTarget {
            snap: LsidSnapshot::default(),
            frozen: Mutex::new(false),
        };
        let reg = FakeRegistry;
        dispatch(&target, &reg, ControlCommand::Freeze(0)).unwrap();
        assert_eq!(
            dispatch(&target, &reg, ControlCommand::IsFrozen).unwrap(),
            ControlResponse::Bool(true)
        );
    }

    #[test]
    fn start_dev_validates_param_before_delegating() {
        let target = FakeTarget {
            snap: LsidSnapshot::default(),
            frozen: Mutex::new(false),
        };
        let reg = FakeRegistry;
        let mut param = StartParam {
            name: "data0".into(),
            max_pending_mb: 64,
            min_pending_mb: 32,
            queue_stop_timeout_ms: 1000,
            max_logpack_kb: 1024,
            log_flush_interval_ms: 100,
            log_flush_interval_mb: 16,
            n_pack_bulk: 32,
            n_io_bulk: 32,
        };
        param.n_pack_bulk = 0;
        let cmd = ControlCommand::StartDev {
            log_devt: (8, 0),
            data_devt: (8, 1),
            requested_minor: None,
            param,
        };
        assert!(dispatch(&target, &reg, cmd).is_err());
    }
}
