//! Crate-wide error type.
//!
//! Mirrors the error taxonomy of spec.md §7: validation errors are rejected
//! at the entry point, transient IO and checksum mismatches push the device
//! read-only, and a handful of variants name the ioctl-level failure modes
//! from §6.3.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalbError>;

#[derive(Debug, Error)]
pub enum WalbError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch at lsid {lsid}")]
    ChecksumMismatch { lsid: u64 },

    #[error("log device overflow: usage {usage} exceeds capacity {capacity}")]
    Overflow { usage: u64, capacity: u64 },

    #[error("conflicting freeze/melt request")]
    FreezeRace,

    #[error("superblock sync failed: {0}")]
    SyncFailed(String),

    #[error("device is read-only")]
    ReadOnly,

    #[error("device is frozen")]
    Frozen,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl WalbError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WalbError::Validation(msg.into())
    }
}
