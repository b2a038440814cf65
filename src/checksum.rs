//! CRC-32 (IEEE 802.3) payload checksums
//!
//! The 256-entry lookup table is built at compile time from the reflected
//! polynomial, so there is no first-use initialization to race on.

/// Reflected IEEE 802.3 polynomial
const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Precomputed byte-wise lookup table
pub static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental checksum for payloads that arrive in pieces
#[derive(Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    #[inline]
    pub const fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    #[inline]
    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &b in bytes {
            crc = TABLE[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        self.state = crc;
    }

    #[inline]
    pub fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum a complete payload
#[inline]
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(
            checksum(b"The quick brown fox jumps over the lazy dog"),
            0x414F_A339
        );
    }

    #[test]
    fn test_table_edges() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], 0x7707_3096);
        assert_eq!(TABLE[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_matches_crc32fast() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        for len in [1, 7, 64, 513, 4096] {
            assert_eq!(checksum(&data[..len]), crc32fast::hash(&data[..len]));
        }
    }

    #[test]
    fn test_incremental_equals_oneshot() {
        let data = b"split across the end of the ring";
        let mut crc = Crc32::new();
        crc.update(&data[..11]);
        crc.update(&data[11..]);
        assert_eq!(crc.finalize(), checksum(data));
    }

    #[test]
    fn test_single_bit_flip_changes_checksum() {
        let mut data = vec![0x5Au8; 512];
        let before = checksum(&data);
        data[300] ^= 0x01;
        assert_ne!(before, checksum(&data));
    }
}
