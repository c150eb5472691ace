//! On-disk superblock (spec.md §3.2, §6.1).
//!
//! One `pbs`-sized sector, persisted at two offsets (`super0`, `super1`) so a
//! crash mid-write to one copy still leaves the other readable. The raw
//! layout is `#[repr(C)]` + `zerocopy::{AsBytes, FromBytes}`, the same
//! pairing the teacher uses for its own in-disk structures (see
//! `exec.rs`'s `ElfHdr`/`ProgHeader` — "It needs repr(C) because it's
//! struct for in-disk representation").

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::checksum;
use crate::error::{Result, WalbError};
use crate::param::{DISK_NAME_LEN, LOGICAL_BLOCK_SIZE, SECTOR_TYPE_SUPER, UUID_SIZE, WALB_VERSION};

/// Raw, fixed-size superblock payload. Natural `repr(C)` alignment may
/// insert padding between fields; that's fine, the padding is internal to
/// this crate's own read/write pair and is included verbatim in the
/// checksum the same way the rest of the sector would be.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct SuperblockRaw {
    pub checksum: u32,
    pub sector_type: u16,
    pub version: u16,
    pub logical_bs: u32,
    pub physical_bs: u32,
    pub metadata_size: u32,
    pub log_checksum_salt: u32,
    pub uuid: [u8; UUID_SIZE],
    pub name: [u8; DISK_NAME_LEN],
    pub ring_buffer_size: u64,
    pub oldest_lsid: u64,
    pub written_lsid: u64,
    pub device_size: u64,
}

const_assert!(std::mem::size_of::<SuperblockRaw>() <= LOGICAL_BLOCK_SIZE as usize);

const CHECKSUM_OFFSET: usize = 0;

/// Ergonomic, owned view of the superblock used by the rest of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub logical_bs: u32,
    pub physical_bs: u32,
    pub metadata_size: u32,
    pub log_checksum_salt: u32,
    pub uuid: [u8; UUID_SIZE],
    pub name: [u8; DISK_NAME_LEN],
    pub ring_buffer_size: u64,
    pub oldest_lsid: u64,
    pub written_lsid: u64,
    pub device_size: u64,
}

impl Superblock {
    pub fn new(
        physical_bs: u32,
        metadata_size: u32,
        log_checksum_salt: u32,
        uuid: [u8; UUID_SIZE],
        name: &str,
        ring_buffer_size: u64,
        device_size: u64,
    ) -> Self {
        let mut name_buf = [0u8; DISK_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(DISK_NAME_LEN - 1);
        name_buf[..n].copy_from_slice(&bytes[..n]);
        Self {
            logical_bs: crate::param::LOGICAL_BLOCK_SIZE,
            physical_bs,
            metadata_size,
            log_checksum_salt,
            uuid,
            name: name_buf,
            ring_buffer_size,
            oldest_lsid: 0,
            written_lsid: 0,
            device_size,
        }
    }

    /// `ring_begin = super1 + 1`, where `super1 = metadata + metadata_size`
    /// and `metadata = super0 + 1` (spec.md §3.2). Offsets are in `pbs`
    /// units, counted from the start of the log device.
    pub fn metadata_offset(&self) -> u64 {
        1
    }

    pub fn super1_offset(&self) -> u64 {
        self.metadata_offset() + self.metadata_size as u64
    }

    pub fn ring_begin(&self) -> u64 {
        self.super1_offset() + 1
    }

    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    fn to_raw(self) -> SuperblockRaw {
        SuperblockRaw {
            checksum: 0,
            sector_type: SECTOR_TYPE_SUPER,
            version: WALB_VERSION,
            logical_bs: self.logical_bs,
            physical_bs: self.physical_bs,
            metadata_size: self.metadata_size,
            log_checksum_salt: self.log_checksum_salt,
            uuid: self.uuid,
            name: self.name,
            ring_buffer_size: self.ring_buffer_size,
            oldest_lsid: self.oldest_lsid,
            written_lsid: self.written_lsid,
            device_size: self.device_size,
        }
    }

    /// Serializes into a `pbs`-sized sector, salt=0 self-checksum computed
    /// over the whole sector with the checksum field zeroed (spec.md §6.1).
    pub fn encode(self, pbs: u32) -> Result<Vec<u8>> {
        crate::block::validate_pbs(pbs)?;
        let raw = self.to_raw();
        let raw_size = std::mem::size_of::<SuperblockRaw>();
        if raw_size > pbs as usize {
            return Err(WalbError::validation(format!(
                "superblock payload ({raw_size} bytes) does not fit in a {pbs}-byte sector"
            )));
        }
        let mut sector = vec![0u8; pbs as usize];
        sector[..raw_size].copy_from_slice(raw.as_bytes());
        let csum = checksum::checksum(0, &sector);
        sector[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&csum.to_le_bytes());
        Ok(sector)
    }

    /// Parses and validates a `pbs`-sized sector: checksum, `sector_type`,
    /// `version` (spec.md §6.1).
    pub fn decode(sector: &[u8]) -> Result<Self> {
        let raw_size = std::mem::size_of::<SuperblockRaw>();
        if sector.len() < raw_size {
            return Err(WalbError::validation("superblock sector too short"));
        }
        if !checksum::validate(0, sector) {
            return Err(WalbError::ChecksumMismatch { lsid: 0 });
        }
        let raw = SuperblockRaw::read_from_prefix(sector)
            .ok_or_else(|| WalbError::validation("superblock sector misaligned"))?;
        if raw.sector_type != SECTOR_TYPE_SUPER {
            return Err(WalbError::validation(format!(
                "unexpected sector_type {} (want SUPER)",
                raw.sector_type
            )));
        }
        if raw.version != WALB_VERSION {
            return Err(WalbError::validation(format!(
                "unsupported superblock version {}",
                raw.version
            )));
        }
        Ok(Self {
            logical_bs: raw.logical_bs,
            physical_bs: raw.physical_bs,
            metadata_size: raw.metadata_size,
            log_checksum_salt: raw.log_checksum_salt,
            uuid: raw.uuid,
            name: raw.name,
            ring_buffer_size: raw.ring_buffer_size,
            oldest_lsid: raw.oldest_lsid,
            written_lsid: raw.written_lsid,
            device_size: raw.device_size,
        })
    }
}
