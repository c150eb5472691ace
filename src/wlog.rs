//! Wlog archive file format (spec.md §6.2, supplemented in SPEC_FULL.md §12
//! from `original_source/tool/walblog_format.h` and `tool/wlog/*`).
//!
//! A 4096-byte header followed by the concatenation of logpacks
//! `[begin_lsid, end_lsid)` in lsid order, each one pb header plus
//! `total_io_size` data pbs. Used to extract a lsid range from a live log
//! device and to replay an archive as an in-memory log device for redo
//! testing without a real block device.

use std::io::{Read, Write};

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::checksum;
use crate::device::{BlockDevice, MemBlockDevice};
use crate::error::{Result, WalbError};
use crate::logpack::LogpackHeader;
use crate::param::{SECTOR_TYPE_WALBLOG_HEADER, UUID_SIZE, WALB_VERSION};
use crate::ring::RingMapper;

const WLOG_HEADER_SIZE: usize = 4096;

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct WlogHeaderRaw {
    header_size: u32,
    sector_type: u16,
    version: u16,
    checksum: u32,
    salt: u32,
    logical_bs: u32,
    physical_bs: u32,
    uuid: [u8; UUID_SIZE],
    begin_lsid: u64,
    end_lsid: u64,
}

const_assert!(std::mem::size_of::<WlogHeaderRaw>() <= WLOG_HEADER_SIZE);

/// A wlog archive's own salt is carried in the header (the real WalB format
/// does the same) so an archive replayed later doesn't need the originating
/// device's superblock to validate its logpack checksums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WlogHeader {
    pub salt: u32,
    pub logical_bs: u32,
    pub physical_bs: u32,
    pub uuid: [u8; UUID_SIZE],
    pub begin_lsid: u64,
    pub end_lsid: u64,
}

impl WlogHeader {
    fn to_raw(self) -> WlogHeaderRaw {
        WlogHeaderRaw {
            header_size: WLOG_HEADER_SIZE as u32,
            sector_type: SECTOR_TYPE_WALBLOG_HEADER,
            version: WALB_VERSION,
            checksum: 0,
            salt: self.salt,
            logical_bs: self.logical_bs,
            physical_bs: self.physical_bs,
            uuid: self.uuid,
            begin_lsid: self.begin_lsid,
            end_lsid: self.end_lsid,
        }
    }

    fn encode(self) -> Result<Vec<u8>> {
        if self.begin_lsid >= self.end_lsid {
            return Err(WalbError::validation("wlog header requires begin_lsid < end_lsid"));
        }
        let mut buf = vec![0u8; WLOG_HEADER_SIZE];
        let raw = self.to_raw();
        let raw_size = std::mem::size_of::<WlogHeaderRaw>();
        buf[..raw_size].copy_from_slice(raw.as_bytes());
        let csum = checksum::checksum(0, &buf);
        buf[8..12].copy_from_slice(&csum.to_le_bytes());
        Ok(buf)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != WLOG_HEADER_SIZE {
            return Err(WalbError::validation("wlog header must be exactly 4096 bytes"));
        }
        if !checksum::validate(0, buf) {
            return Err(WalbError::ChecksumMismatch { lsid: 0 });
        }
        let raw = WlogHeaderRaw::read_from_prefix(buf)
            .ok_or_else(|| WalbError::validation("wlog header misaligned"))?;
        if raw.sector_type != SECTOR_TYPE_WALBLOG_HEADER {
            return Err(WalbError::validation("unexpected sector_type (want WALBLOG_HEADER)"));
        }
        if raw.version != WALB_VERSION {
            return Err(WalbError::validation(format!("unsupported wlog version {}", raw.version)));
        }
        if raw.begin_lsid >= raw.end_lsid {
            return Err(WalbError::validation("wlog header has begin_lsid >= end_lsid"));
        }
        Ok(Self {
            salt: raw.salt,
            logical_bs: raw.logical_bs,
            physical_bs: raw.physical_bs,
            uuid: raw.uuid,
            begin_lsid: raw.begin_lsid,
            end_lsid: raw.end_lsid,
        })
    }
}

/// Streams `[begin_lsid, end_lsid)` out of a live log device into a wlog
/// archive file.
pub struct WlogWriter;

impl WlogWriter {
    pub fn extract(
        log_device: &dyn BlockDevice,
        ring: RingMapper,
        salt: u32,
        uuid: [u8; UUID_SIZE],
        begin_lsid: u64,
        end_lsid: u64,
        out: &mut impl Write,
    ) -> Result<()> {
        let header = WlogHeader {
            salt,
            logical_bs: crate::param::LOGICAL_BLOCK_SIZE,
            physical_bs: log_device.pbs(),
            uuid,
            begin_lsid,
            end_lsid,
        };
        out.write_all(&header.encode()?)?;

        let mut l = begin_lsid;
        while l < end_lsid {
            let off = ring.offset_pb(l)?;
            let sector = log_device.read_block(off)?;
            let decoded = LogpackHeader::decode(&sector, l, salt)?;
            out.write_all(&sector)?;
            let extent = decoded.total_io_size as u64;
            for i in 0..extent {
                let data_off = ring.offset_pb(l + 1 + i)?;
                out.write_all(&log_device.read_block(data_off)?)?;
            }
            l += 1 + extent;
        }
        Ok(())
    }
}

/// Replays a wlog archive into a fresh in-memory log device, for
/// exercising redo without a real block device backing it.
pub struct WlogReader;

impl WlogReader {
    pub fn load(data: &mut impl Read) -> Result<(WlogHeader, MemBlockDevice)> {
        let mut header_buf = vec![0u8; WLOG_HEADER_SIZE];
        data.read_exact(&mut header_buf)?;
        let header = WlogHeader::decode(&header_buf)?;

        let ring = RingMapper::new(0, header.end_lsid.max(1));
        let dev = MemBlockDevice::new(header.physical_bs, header.end_lsid.max(1));

        let mut rest = Vec::new();
        data.read_to_end(&mut rest)?;
        let mut cursor = 0usize;
        let mut l = header.begin_lsid;
        while l < header.end_lsid {
            let pbs = header.physical_bs as usize;
            if cursor + pbs > rest.len() {
                return Err(WalbError::validation("wlog body truncated"));
            }
            let header_sector = &rest[cursor..cursor + pbs];
            let decoded = LogpackHeader::decode(header_sector, l, header.salt)?;
            dev.write_block(ring.offset_pb(l)?, header_sector)?;
            cursor += pbs;
            let extent = decoded.total_io_size as u64;
            for i in 0..extent {
                if cursor + pbs > rest.len() {
                    return Err(WalbError::validation("wlog body truncated mid-pack"));
                }
                dev.write_block(ring.offset_pb(l + 1 + i)?, &rest[cursor..cursor + pbs])?;
                cursor += pbs;
            }
            l += 1 + extent;
        }
        Ok((header, dev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum as csum_mod;
    use crate::logpack::{LogRecord, RecordFlags};

    #[test]
    fn extract_then_load_round_trips_a_single_pack() {
        let pbs = 512u32;
        let ring = RingMapper::new(1, 1024);
        let log = MemBlockDevice::new(pbs, 1100);

        let mut header = LogpackHeader::new(0);
        let payload = vec![5u8; 512];
        let mut record = LogRecord {
            flags: RecordFlags::EXIST,
            checksum: 0,
            offset: 0,
            io_size: 1,
            lsid: 1,
            lsid_local: 0,
        };
        record.checksum = csum_mod::checksum(0, &payload);
        header.push(pbs, record).unwrap();
        log.write_block(ring.offset_pb(0).unwrap(), &header.encode(pbs, 0).unwrap())
            .unwrap();
        log.write_block(ring.offset_pb(1).unwrap(), &payload).unwrap();

        let mut archive = Vec::new();
        WlogWriter::extract(&log, ring, 0, [0u8; 16], 0, 2, &mut archive).unwrap();

        let (loaded_header, replayed) = WlogReader::load(&mut &archive[..]).unwrap();
        assert_eq!(loaded_header.begin_lsid, 0);
        assert_eq!(loaded_header.end_lsid, 2);
        let replayed_sector = replayed.read_block(ring.offset_pb(0).unwrap()).unwrap();
        assert_eq!(replayed_sector, header.encode(pbs, 0).unwrap());
    }

    #[test]
    fn header_rejects_begin_past_end() {
        let header = WlogHeader {
            salt: 0,
            logical_bs: 512,
            physical_bs: 512,
            uuid: [0; 16],
            begin_lsid: 5,
            end_lsid: 5,
        };
        assert!(header.encode().is_err());
    }
}
