//! Block device abstraction — the `std` replacement for the teacher's
//! `Hal`/`VirtioDisk` singleton (spec.md §1 explicitly keeps "the host
//! kernel's block-layer plumbing" out of scope; this trait is the seam
//! where a real gendisk, a virtio queue, or a plain file would plug in).
//!
//! Every device is addressed in `pbs`-sized blocks. Callers above this
//! trait (superblock, logpack codec, pack builder) never touch byte
//! offsets directly.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

/// Capability bits a device advertises (spec.md §4.13's flush/FUA/discard
/// advertisement rules read these).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCaps {
    pub flush: bool,
    pub fua: bool,
    pub discard: bool,
}

pub trait BlockDevice: Send + Sync {
    /// Physical block size in bytes.
    fn pbs(&self) -> u32;

    /// Device capacity in `pbs` blocks.
    fn capacity_pb(&self) -> u64;

    fn caps(&self) -> DeviceCaps;

    /// Reads exactly one `pbs`-sized block at `blockno`.
    fn read_block(&self, blockno: u64) -> Result<Vec<u8>>;

    /// Writes exactly one `pbs`-sized block at `blockno`.
    fn write_block(&self, blockno: u64, data: &[u8]) -> Result<()>;

    /// Forces previously-written blocks durable (spec.md §4.6's FLUSH).
    fn flush(&self) -> Result<()>;

    /// Discards `[blockno, blockno + count)`, or a no-op if the device does
    /// not advertise discard (spec.md §4.7).
    fn discard(&self, blockno: u64, count: u64) -> Result<()>;
}

/// A plain-file-backed block device: every real deployment of this crate
/// outside a kernel sits on top of something shaped like this, and it is
/// all the integration tests need. Mirrors the teacher's `virtio_disk.rs`
/// at the level of "read one block, write one block, signal completion" but
/// without any of the MMIO/interrupt plumbing, which `std::fs::File`
/// already gives us via ordinary syscalls.
pub struct FileBlockDevice {
    file: Mutex<File>,
    pbs: u32,
    capacity_pb: u64,
    caps: DeviceCaps,
}

impl FileBlockDevice {
    pub fn create(path: &Path, pbs: u32, capacity_pb: u64) -> Result<Self> {
        crate::block::validate_pbs(pbs)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(pbs as u64 * capacity_pb)?;
        Ok(Self {
            file: Mutex::new(file),
            pbs,
            capacity_pb,
            caps: DeviceCaps {
                flush: true,
                fua: true,
                discard: true,
            },
        })
    }

    pub fn open(path: &Path, pbs: u32, capacity_pb: u64) -> Result<Self> {
        crate::block::validate_pbs(pbs)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            pbs,
            capacity_pb,
            caps: DeviceCaps {
                flush: true,
                fua: true,
                discard: true,
            },
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn pbs(&self) -> u32 {
        self.pbs
    }

    fn capacity_pb(&self) -> u64 {
        self.capacity_pb
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn read_block(&self, blockno: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.pbs as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(blockno * self.pbs as u64))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, blockno: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.pbs as usize);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(blockno * self.pbs as u64))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }

    fn discard(&self, _blockno: u64, _count: u64) -> Result<()> {
        // Sparse-hole punching is platform specific; a plain file backend
        // treats discard as a no-op (spec.md §4.7's case (c)).
        Ok(())
    }
}

/// An in-memory block device used by unit/property tests, equivalent to the
/// teacher's `proto/mem_bio.c` reference backend from `original_source/`.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<u8>>,
    pbs: u32,
    capacity_pb: u64,
    caps: DeviceCaps,
}

impl MemBlockDevice {
    pub fn new(pbs: u32, capacity_pb: u64) -> Self {
        Self {
            blocks: Mutex::new(vec![0u8; pbs as usize * capacity_pb as usize]),
            pbs,
            capacity_pb,
            caps: DeviceCaps {
                flush: true,
                fua: true,
                discard: true,
            },
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.blocks.lock().unwrap().clone()
    }
}

impl BlockDevice for MemBlockDevice {
    fn pbs(&self) -> u32 {
        self.pbs
    }

    fn capacity_pb(&self) -> u64 {
        self.capacity_pb
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn read_block(&self, blockno: u64) -> Result<Vec<u8>> {
        let blocks = self.blocks.lock().unwrap();
        let start = blockno as usize * self.pbs as usize;
        Ok(blocks[start..start + self.pbs as usize].to_vec())
    }

    fn write_block(&self, blockno: u64, data: &[u8]) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let start = blockno as usize * self.pbs as usize;
        blocks[start..start + self.pbs as usize].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn discard(&self, blockno: u64, count: u64) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let start = blockno as usize * self.pbs as usize;
        let len = count as usize * self.pbs as usize;
        blocks[start..start + len].fill(0);
        Ok(())
    }
}
