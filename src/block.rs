//! Sector-size arithmetic shared by the superblock, logpack and ring mapper
//! modules (spec.md §3.1).

use crate::error::{Result, WalbError};
use crate::param::LOGICAL_BLOCK_SIZE;

/// Physical block size in bytes. Stored as a plain `u32` on disk; this
/// wrapper exists only to keep `capacity_pb`/validation logic in one place.
pub fn validate_pbs(pbs: u32) -> Result<()> {
    if pbs < 512 || pbs > 4096 || !pbs.is_power_of_two() {
        return Err(WalbError::validation(format!(
            "physical block size {pbs} must be a power of two in [512, 4096]"
        )));
    }
    Ok(())
}

/// `capacity_pb(pbs, lb) = ceil(lb * 512 / pbs)`.
pub fn capacity_pb(pbs: u32, lb: u64) -> u64 {
    let bytes = lb * LOGICAL_BLOCK_SIZE as u64;
    let pbs = pbs as u64;
    (bytes + pbs - 1) / pbs
}

/// Number of logical blocks packed into one physical block.
pub fn lb_per_pb(pbs: u32) -> u32 {
    pbs / LOGICAL_BLOCK_SIZE
}
