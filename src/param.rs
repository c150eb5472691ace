//! Reserved portable constants (spec.md §6.4) and compile-time limits.
//!
//! Layout mirrors the teacher's `param.rs`: one documented `pub const` per
//! tunable, grouped by the subsystem that owns it.

/// WalB on-disk format version. Bump whenever the superblock or logpack
/// wire layout changes incompatibly.
pub const WALB_VERSION: u16 = 1;

/// Superblock sector-type discriminant.
pub const SECTOR_TYPE_SUPER: u16 = 1;

/// Logpack header sector-type discriminant.
pub const SECTOR_TYPE_LOGPACK: u16 = 2;

/// Wlog archive header sector-type discriminant.
pub const SECTOR_TYPE_WALBLOG_HEADER: u16 = 3;

/// Logical block size in bytes. Fixed regardless of `physical_bs`.
pub const LOGICAL_BLOCK_SIZE: u32 = 512;

/// Sentinel meaning "no lsid" / "not yet assigned".
pub const INVALID_LSID: u64 = u64::MAX;

/// Maximum device name length, NUL included.
pub const DISK_NAME_LEN: usize = 64;

/// Byte length of a device/log uuid.
pub const UUID_SIZE: usize = 16;

/// Hard cap on `total_io_size` recorded in a logpack header (u16 field).
pub const MAX_TOTAL_IO_SIZE_IN_LOGPACK_HEADER: u32 = 65535;

/// Hard cap on a single record's `io_size` in logical blocks, for non-discard
/// records (u16-ish cap mirrored from the C header; kept generous at 65535).
pub const MAX_IO_SIZE_LB: u32 = 65535;

/// Upper bound accepted for `GET/SET_CHECKPOINT_INTERVAL` (milliseconds).
pub const WALB_MAX_CHECKPOINT_INTERVAL_MS: u32 = 3600 * 1000;

/// Upper bound on a freeze timeout, in seconds (spec.md §4.11).
pub const WALB_MAX_FREEZE_TIMEOUT_SECS: u32 = 86_400;

/// Upper bound accepted for `max_pending_mb` in `walb_start_param` (§6.3).
pub const MAX_PENDING_MB: u32 = 4096;

/// Default number of packs processed per submission batch
/// (`n_pack_bulk` default, §6.3).
pub const DEFAULT_N_PACK_BULK: u32 = 32;

/// Default number of per-entry bios processed per submission batch
/// (`n_io_bulk` default, §6.3).
pub const DEFAULT_N_IO_BULK: u32 = 32;
