//! WalB: a block-level write-ahead-logging engine. A `WrapperDevice` pairs a
//! log device with a data device, turns incoming writes into checksummed
//! logpacks, and keeps a lsid watermark set that checkpoint/redo/GC all
//! agree on. See `wrapper` for the entry point and `control` for the
//! command-plane surface a host process drives it with.

pub mod arena;
pub mod block;
pub mod checkpoint;
pub mod checksum;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod freeze;
pub mod logpack;
pub mod lsid;
pub mod overlap;
pub mod pack_builder;
pub mod param;
pub mod pending;
pub mod pipeline;
pub mod redo;
pub mod ring;
pub mod superblock;
pub mod wlog;
pub mod wrapper;

pub use config::StartParam;
pub use control::{dispatch, ControlCommand, ControlResponse, ControlTarget, DeviceRegistry};
pub use device::{BlockDevice, DeviceCaps, FileBlockDevice, MemBlockDevice};
pub use error::{Result, WalbError};
pub use lsid::LsidSnapshot;
pub use pack_builder::IncomingWrite;
pub use redo::{Redo, RedoReport};
pub use superblock::Superblock;
pub use wlog::{WlogHeader, WlogReader, WlogWriter};
pub use wrapper::WrapperDevice;
