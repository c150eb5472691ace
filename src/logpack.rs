//! Logpack header + record wire format (spec.md §3.3).
//!
//! One `pbs`-sized header followed by `total_io_size` `pbs`-sized data
//! blocks. Record layout mirrors the teacher's convention for in-disk
//! structures: `#[repr(C)]` + `zerocopy::{AsBytes, FromBytes}`.

use bitflags::bitflags;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::checksum;
use crate::error::{Result, WalbError};
use crate::param::{LOGICAL_BLOCK_SIZE, MAX_TOTAL_IO_SIZE_IN_LOGPACK_HEADER, SECTOR_TYPE_LOGPACK};

bitflags! {
    /// Per-record flags (spec.md §3.3).
    #[derive(Default)]
    pub struct RecordFlags: u32 {
        const EXIST   = 0b0000_0001;
        const PADDING = 0b0000_0010;
        const DISCARD = 0b0000_0100;
    }
}

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RecordRaw {
    flags: u32,
    checksum: u32,
    offset: u64,
    io_size: u32,
    lsid: u64,
    lsid_local: u16,
    _reserved: [u8; 6],
}

/// Maximum number of records a header of `pbs` bytes can hold.
pub fn max_records(pbs: u32) -> usize {
    let header_fixed = std::mem::size_of::<HeaderFixed>();
    let record_size = std::mem::size_of::<RecordRaw>();
    (pbs as usize).saturating_sub(header_fixed) / record_size
}

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct HeaderFixed {
    checksum: u32,
    sector_type: u16,
    total_io_size: u16,
    logpack_lsid: u64,
    n_records: u16,
    n_padding: u16,
}

// A header with zero records must still fit in the smallest pb this crate
// supports, or `max_records` would underflow for every device.
const_assert!(std::mem::size_of::<HeaderFixed>() <= LOGICAL_BLOCK_SIZE as usize);

/// One decoded logpack record, owned form used by the rest of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub flags: RecordFlags,
    pub checksum: u32,
    pub offset: u64,
    pub io_size: u32,
    pub lsid: u64,
    pub lsid_local: u16,
}

impl LogRecord {
    pub fn is_padding(&self) -> bool {
        self.flags.contains(RecordFlags::PADDING)
    }

    pub fn is_discard(&self) -> bool {
        self.flags.contains(RecordFlags::DISCARD)
    }

    /// Number of `pbs`-sized data blocks this record contributes.
    /// Discard and padding contribute their own pb-extent handling is done
    /// by the caller (padding's extent is not part of `total_io_size`,
    /// spec.md §3.3); normal IO contributes `capacity_pb(pbs, io_size)`.
    pub fn data_pb(&self, pbs: u32) -> u64 {
        if self.is_discard() {
            0
        } else {
            crate::block::capacity_pb(pbs, self.io_size as u64)
        }
    }

    fn to_raw(self) -> RecordRaw {
        RecordRaw {
            flags: self.flags.bits(),
            checksum: self.checksum,
            offset: self.offset,
            io_size: self.io_size,
            lsid: self.lsid,
            lsid_local: self.lsid_local,
            _reserved: [0; 6],
        }
    }

    fn from_raw(raw: RecordRaw) -> Result<Self> {
        let flags = RecordFlags::from_bits(raw.flags)
            .ok_or_else(|| WalbError::validation(format!("unknown record flags {:#x}", raw.flags)))?;
        Ok(Self {
            flags,
            checksum: raw.checksum,
            offset: raw.offset,
            io_size: raw.io_size,
            lsid: raw.lsid,
            lsid_local: raw.lsid_local,
        })
    }
}

/// Decoded logpack header, owned form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogpackHeader {
    pub logpack_lsid: u64,
    pub total_io_size: u16,
    pub records: Vec<LogRecord>,
}

impl LogpackHeader {
    pub fn new(logpack_lsid: u64) -> Self {
        Self {
            logpack_lsid,
            total_io_size: 0,
            records: Vec::new(),
        }
    }

    pub fn n_records(&self) -> u16 {
        self.records.len() as u16
    }

    pub fn n_padding(&self) -> u16 {
        self.records.iter().filter(|r| r.is_padding()).count() as u16
    }

    /// Total number of data `pbs` blocks this logpack occupies on the ring,
    /// i.e. `1 (header) + total_io_size`.
    pub fn extent_pb(&self) -> u64 {
        1 + self.total_io_size as u64
    }

    pub fn push(&mut self, pbs: u32, mut record: LogRecord) -> Result<()> {
        record.lsid_local = (record.lsid - self.logpack_lsid) as u16;
        if record.is_padding() && self.n_padding() >= 1 {
            return Err(WalbError::validation("at most one padding record per logpack"));
        }
        let added_pb = record.data_pb(pbs);
        let new_total = self.total_io_size as u64 + added_pb;
        if new_total > MAX_TOTAL_IO_SIZE_IN_LOGPACK_HEADER as u64 {
            return Err(WalbError::validation("logpack total_io_size overflow"));
        }
        self.total_io_size = new_total as u16;
        self.records.push(record);
        Ok(())
    }

    /// Computes and stamps the header checksum (salted), zeroing the field
    /// first as spec.md §4.6 step 2 describes.
    pub fn encode(&self, pbs: u32, salt: u32) -> Result<Vec<u8>> {
        let max = max_records(pbs);
        if self.records.len() > max {
            return Err(WalbError::validation(format!(
                "logpack has {} records, header only fits {max}",
                self.records.len()
            )));
        }
        let mut sector = vec![0u8; pbs as usize];
        let fixed = HeaderFixed {
            checksum: 0,
            sector_type: SECTOR_TYPE_LOGPACK,
            total_io_size: self.total_io_size,
            logpack_lsid: self.logpack_lsid,
            n_records: self.n_records(),
            n_padding: self.n_padding(),
        };
        let fixed_size = std::mem::size_of::<HeaderFixed>();
        sector[..fixed_size].copy_from_slice(fixed.as_bytes());
        let record_size = std::mem::size_of::<RecordRaw>();
        for (i, rec) in self.records.iter().enumerate() {
            let start = fixed_size + i * record_size;
            sector[start..start + record_size].copy_from_slice(rec.to_raw().as_bytes());
        }
        let csum = checksum::checksum(salt, &sector);
        sector[0..4].copy_from_slice(&csum.to_le_bytes());
        Ok(sector)
    }

    /// Validates checksum, `sector_type`, `logpack_lsid`, and decodes all
    /// `n_records` records (spec.md §4.12 step 1).
    pub fn decode(sector: &[u8], expected_lsid: u64, salt: u32) -> Result<Self> {
        if !checksum::validate(salt, sector) {
            return Err(WalbError::ChecksumMismatch { lsid: expected_lsid });
        }
        let fixed_size = std::mem::size_of::<HeaderFixed>();
        let fixed = HeaderFixed::read_from_prefix(sector)
            .ok_or_else(|| WalbError::validation("logpack header too short"))?;
        if fixed.sector_type != SECTOR_TYPE_LOGPACK {
            return Err(WalbError::validation("unexpected sector_type (want LOGPACK)"));
        }
        if fixed.logpack_lsid != expected_lsid {
            return Err(WalbError::validation(format!(
                "logpack_lsid mismatch: header says {}, expected {expected_lsid}",
                fixed.logpack_lsid
            )));
        }
        let record_size = std::mem::size_of::<RecordRaw>();
        let mut records = Vec::with_capacity(fixed.n_records as usize);
        for i in 0..fixed.n_records as usize {
            let start = fixed_size + i * record_size;
            let end = start + record_size;
            if end > sector.len() {
                return Err(WalbError::validation("logpack header truncated mid-record"));
            }
            let raw = RecordRaw::read_from_prefix(&sector[start..end])
                .ok_or_else(|| WalbError::validation("record misaligned"))?;
            records.push(LogRecord::from_raw(raw)?);
        }
        Ok(Self {
            logpack_lsid: fixed.logpack_lsid,
            total_io_size: fixed.total_io_size,
            records,
        })
    }

    /// Shrinks the header to keep only `records[..keep]`, recomputing
    /// `total_io_size` (spec.md §4.12 step 2, the redo-shrink path).
    pub fn shrink(&mut self, pbs: u32, keep: usize) {
        self.records.truncate(keep);
        self.total_io_size = self
            .records
            .iter()
            .map(|r| r.data_pb(pbs) as u16)
            .fold(0u16, |acc, x| acc + x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_record(lsid: u64, offset: u64, io_size: u32) -> LogRecord {
        LogRecord {
            flags: RecordFlags::EXIST,
            checksum: 0,
            offset,
            io_size,
            lsid,
            lsid_local: 0,
        }
    }

    #[test]
    fn header_round_trip() {
        let pbs = 4096;
        let mut header = LogpackHeader::new(10);
        header.push(pbs, normal_record(11, 0, 8)).unwrap();
        let sector = header.encode(pbs, 42).unwrap();
        let decoded = LogpackHeader::decode(&sector, 10, 42).unwrap();
        assert_eq!(decoded.total_io_size, 1);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].lsid_local, 1);
    }

    #[test]
    fn wrong_salt_fails_checksum() {
        let pbs = 512;
        let mut header = LogpackHeader::new(0);
        header.push(pbs, normal_record(1, 0, 1)).unwrap();
        let sector = header.encode(pbs, 1).unwrap();
        assert!(LogpackHeader::decode(&sector, 0, 2).is_err());
    }

    #[test]
    fn at_most_one_padding_record() {
        let pbs = 4096;
        let mut header = LogpackHeader::new(0);
        let pad = LogRecord {
            flags: RecordFlags::PADDING,
            checksum: 0,
            offset: 0,
            io_size: 0,
            lsid: 1,
            lsid_local: 0,
        };
        header.push(pbs, pad).unwrap();
        assert!(header.push(pbs, pad).is_err());
    }
}
