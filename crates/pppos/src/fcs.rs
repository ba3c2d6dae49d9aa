//! 16-bit Frame Check Sequence - RFC 1662 appendix C
//!
//! CRC-16/CCITT in its reflected form (polynomial 0x8408), computed over the
//! unescaped frame bytes.

/// Initial accumulator value
pub const INIT: u16 = 0xFFFF;

/// Accumulator value after folding a frame together with its own FCS
pub const GOOD: u16 = 0xF0B8;

const POLY: u16 = 0x8408;

static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut v = i as u16;
        let mut bit = 0;
        while bit < 8 {
            v = if v & 1 != 0 { (v >> 1) ^ POLY } else { v >> 1 };
            bit += 1;
        }
        table[i] = v;
        i += 1;
    }
    table
}

/// Running FCS accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fcs16(u16);

impl Default for Fcs16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Fcs16 {
    #[must_use]
    pub const fn new() -> Self {
        Self(INIT)
    }

    /// Fold one unescaped byte
    #[inline]
    pub fn update(&mut self, byte: u8) {
        self.0 = (self.0 >> 8) ^ TABLE[usize::from((self.0 ^ u16::from(byte)) as u8)];
    }

    pub fn update_slice(&mut self, data: &[u8]) {
        for &b in data {
            self.update(b);
        }
    }

    #[must_use]
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Trailer bytes to transmit: one's complement, low byte first
    #[must_use]
    pub fn finalize(&self) -> [u8; 2] {
        (!self.0).to_le_bytes()
    }

    /// Whether a frame folded together with its trailer checks out
    #[must_use]
    pub fn is_good(&self) -> bool {
        self.0 == GOOD
    }
}

/// FCS trailer for a complete buffer
#[must_use]
pub fn fcs16(data: &[u8]) -> [u8; 2] {
    let mut fcs = Fcs16::new();
    fcs.update_slice(data);
    fcs.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // CRC-16/X-25 check value
        assert_eq!(u16::from_le_bytes(fcs16(b"123456789")), 0x906E);
    }

    #[test]
    fn test_good_fcs_after_trailer() {
        let data = [0xFF, 0x03, 0xC0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let mut fcs = Fcs16::new();
        fcs.update_slice(&data);
        let trailer = fcs.finalize();
        fcs.update_slice(&trailer);
        assert!(fcs.is_good());
        assert_eq!(fcs.value(), GOOD);
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut data = vec![0xFF, 0x03, 0x00, 0x21, 0x45, 0x00, 0x00, 0x14];
        let trailer = fcs16(&data);
        data.extend_from_slice(&trailer);

        for i in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[i] ^= 1 << bit;
                let mut fcs = Fcs16::new();
                fcs.update_slice(&corrupted);
                assert!(!fcs.is_good(), "flip of bit {bit} in byte {i} undetected");
            }
        }
    }
}
