//! WalB's checksum algorithm (spec.md §4.1).
//!
//! Not a CRC: it is a folded little-endian u32 sum, finished with a two's
//! complement negation. The same primitive validates the superblock (salt is
//! always 0 there) and every logpack header/data block (salted with the
//! log device's `log_checksum_salt`).

/// Folds `buf` into `csum` as little-endian u32 words. A trailing partial
/// word (`n` not a multiple of 4) is zero-padded before folding, matching
/// the reference implementation's tail handling.
pub fn checksum_partial(mut csum: u32, buf: &[u8]) -> u32 {
    let mut chunks = buf.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        csum = csum.wrapping_add(word);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut tail = [0u8; 4];
        tail[..rem.len()].copy_from_slice(rem);
        csum = csum.wrapping_add(u32::from_le_bytes(tail));
    }
    csum
}

/// Finishes a running sum into a storable checksum value.
pub fn checksum_finish(csum: u32) -> u32 {
    (!csum).wrapping_add(1)
}

/// Computes the checksum of `buf` salted with `salt` (0 for the superblock).
pub fn checksum(salt: u32, buf: &[u8]) -> u32 {
    checksum_finish(checksum_partial(salt, buf))
}

/// Validates `buf` (checksum field included) against `salt`. `encode` stamps
/// its checksum field with `checksum(salt, buf)` computed with the field
/// zeroed, which makes the field itself the two's-complement negation of
/// every other word's sum; a correctly stamped buffer therefore sums to
/// exactly zero when folded with the checksum field present (spec.md §4.1 /
/// §6.1, testable property 5).
pub fn validate(salt: u32, buf: &[u8]) -> bool {
    checksum(salt, buf) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_checksum_is_zero_after_finish_of_salt() {
        assert_eq!(checksum(0, &[]), checksum_finish(0));
    }

    #[test]
    fn round_trip_through_partial_and_finish_validates() {
        let mut block = vec![0u8; 64];
        for (i, b) in block.iter_mut().enumerate() {
            *b = i as u8;
        }
        // Reserve the first 4 bytes as the checksum field.
        let salt = 0xdead_beef;
        let mut zeroed = block.clone();
        zeroed[0..4].copy_from_slice(&0u32.to_le_bytes());
        let csum = checksum(salt, &zeroed);
        block[0..4].copy_from_slice(&csum.to_le_bytes());
        assert!(validate(salt, &block));

        block[10] ^= 0xff;
        assert!(!validate(salt, &block));
    }
}
