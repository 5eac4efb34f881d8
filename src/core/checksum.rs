//! Fast corruption detection over the wire payload.
//!
//! CRC-32 (IEEE) truncated to its low 16 bits. The checksum needs no key, so
//! any party on the path can tell a damaged payload from an intact one; it is
//! not a defence against deliberate tampering, which the MAC covers.

/// Compute the 16-bit checksum of `data`.
#[inline]
pub fn compute(data: &[u8]) -> u16 {
    (crc32fast::hash(data) & 0xFFFF) as u16
}

/// Check `data` against a received checksum.
#[inline]
pub fn verify(data: &[u8], checksum: u16) -> bool {
    compute(data) == checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-32("123456789") = 0xCBF43926
        assert_eq!(compute(b"123456789"), 0x3926);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(compute(&[]), 0);
        assert!(verify(&[], 0));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let data = b"FIRE 3 4".to_vec();
        let sum = compute(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert!(!verify(&flipped, sum), "flip at {byte}:{bit} undetected");
            }
        }
    }
}
