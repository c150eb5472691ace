//! Lsid → physical offset mapping on the log device's ring buffer
//! (spec.md §4.2).

use crate::error::{Result, WalbError};
use crate::param::INVALID_LSID;

#[derive(Clone, Copy, Debug)]
pub struct RingMapper {
    pub ring_begin: u64,
    pub ring_buffer_size: u64,
}

impl RingMapper {
    pub fn new(ring_begin: u64, ring_buffer_size: u64) -> Self {
        Self {
            ring_begin,
            ring_buffer_size,
        }
    }

    /// `offset_pb(lsid) = ring_begin + (lsid mod ring_buffer_size)`.
    pub fn offset_pb(&self, lsid: u64) -> Result<u64> {
        if lsid == INVALID_LSID {
            return Err(WalbError::validation("lsid must not be INVALID_LSID"));
        }
        Ok(self.ring_begin + lsid % self.ring_buffer_size)
    }

    /// Bytes remaining in the ring before wrapping back to `ring_begin`,
    /// counted in `pbs` units starting at `lsid`.
    pub fn pb_until_wrap(&self, lsid: u64) -> u64 {
        self.ring_buffer_size - (lsid % self.ring_buffer_size)
    }

    /// Whether a logpack of `extent_pb` blocks starting at `lsid` would
    /// straddle the ring end (spec.md §3.3, testable property 3).
    pub fn would_straddle(&self, lsid: u64, extent_pb: u64) -> bool {
        extent_pb > self.pb_until_wrap(lsid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_correctly() {
        let m = RingMapper::new(1, 8);
        assert_eq!(m.offset_pb(0).unwrap(), 1);
        assert_eq!(m.offset_pb(7).unwrap(), 8);
        assert_eq!(m.offset_pb(8).unwrap(), 1);
    }

    #[test]
    fn rejects_invalid_lsid() {
        let m = RingMapper::new(1, 8);
        assert!(m.offset_pb(INVALID_LSID).is_err());
    }

    #[test]
    fn straddle_detection() {
        // ring_buffer_size=8, latest=7: a pack with extent 2 (header+1 data)
        // would need pb 7 and pb 0 (wrapped) -> straddles.
        let m = RingMapper::new(1, 8);
        assert!(m.would_straddle(7, 2));
        assert!(!m.would_straddle(6, 2));
    }
}
