//! `walb_start_param` promoted to a first-class, validated config struct
//! (spec.md §6.3, SPEC_FULL.md §11).

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalbError};
use crate::param::{DISK_NAME_LEN, MAX_PENDING_MB};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartParam {
    pub name: String,
    pub max_pending_mb: u32,
    pub min_pending_mb: u32,
    pub queue_stop_timeout_ms: u32,
    pub max_logpack_kb: u32,
    pub log_flush_interval_ms: u32,
    pub log_flush_interval_mb: u32,
    pub n_pack_bulk: u32,
    pub n_io_bulk: u32,
}

impl StartParam {
    /// Rejects the first bound it finds violated (spec.md §6.3's closing
    /// paragraph), the same "reject at entry" policy as §7.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() >= DISK_NAME_LEN {
            return Err(WalbError::validation(format!(
                "name must be non-empty and shorter than {DISK_NAME_LEN} bytes"
            )));
        }
        if !(2..=MAX_PENDING_MB).contains(&self.max_pending_mb) {
            return Err(WalbError::validation(format!(
                "max_pending_mb must be in 2..={MAX_PENDING_MB}, got {}",
                self.max_pending_mb
            )));
        }
        if !(1..self.max_pending_mb).contains(&self.min_pending_mb) {
            return Err(WalbError::validation(format!(
                "min_pending_mb must be in 1..{}, got {}",
                self.max_pending_mb, self.min_pending_mb
            )));
        }
        if self.queue_stop_timeout_ms < 1 {
            return Err(WalbError::validation("queue_stop_timeout_ms must be >= 1"));
        }
        if self.log_flush_interval_mb * 2 > self.max_pending_mb {
            return Err(WalbError::validation(
                "log_flush_interval_mb * 2 must not exceed max_pending_mb",
            ));
        }
        if self.n_pack_bulk == 0 {
            return Err(WalbError::validation("n_pack_bulk must be > 0"));
        }
        if self.n_io_bulk == 0 {
            return Err(WalbError::validation("n_io_bulk must be > 0"));
        }
        Ok(())
    }
}
