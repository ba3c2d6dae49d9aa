//! Async-Control-Character Map (ACCM) - RFC 1662 section 7
//!
//! A 256-bit map of byte values that must be escaped on the wire. The flag
//! and escape bytes are always escaped regardless of the map contents.

use crate::frame::{PPP_ESCAPE, PPP_FLAG};

/// Direction a map applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Transmit,
}

/// Extended async-control-character map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accm([u8; 32]);

impl Accm {
    /// Async map escaping every control character 0x00-0x1F
    pub const DEFAULT_ASYNC_MAP: u32 = 0xFFFF_FFFF;

    /// Empty map (only the implicit flag/escape bytes are escaped)
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; 32])
    }

    /// Build a map from a negotiated 32-bit async map
    ///
    /// Bit `n` of `map` marks control character `n`.
    #[must_use]
    pub const fn from_async_map(map: u32) -> Self {
        let le = map.to_le_bytes();
        let mut bits = [0u8; 32];
        bits[0] = le[0];
        bits[1] = le[1];
        bits[2] = le[2];
        bits[3] = le[3];
        Self(bits)
    }

    /// Map with every control character set
    #[must_use]
    pub const fn control_characters() -> Self {
        Self::from_async_map(Self::DEFAULT_ASYNC_MAP)
    }

    /// Low 32 bits of the map, as negotiated by LCP
    #[must_use]
    pub fn async_map(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn set(&mut self, byte: u8) {
        self.0[usize::from(byte >> 3)] |= 1 << (byte & 0x07);
    }

    pub fn clear(&mut self, byte: u8) {
        self.0[usize::from(byte >> 3)] &= !(1 << (byte & 0x07));
    }

    /// Whether `byte` is set in the map itself
    #[must_use]
    pub fn contains(&self, byte: u8) -> bool {
        self.0[usize::from(byte >> 3)] & (1 << (byte & 0x07)) != 0
    }

    /// Union of two maps
    #[must_use]
    pub fn extend(mut self, other: &Accm) -> Self {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= b;
        }
        self
    }

    /// Whether `byte` must appear escaped on the wire
    #[must_use]
    pub fn must_escape(&self, byte: u8) -> bool {
        byte == PPP_FLAG || byte == PPP_ESCAPE || self.contains(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_bytes_always_escaped() {
        let accm = Accm::empty();
        assert!(accm.must_escape(0x7E));
        assert!(accm.must_escape(0x7D));
        assert!(!accm.must_escape(0x00));
        assert!(!accm.must_escape(0x11));
        assert!(!accm.must_escape(0xFF));
    }

    #[test]
    fn test_from_async_map() {
        let accm = Accm::from_async_map(0x000A_0000);
        assert!(accm.must_escape(0x11));
        assert!(accm.must_escape(0x13));
        assert!(!accm.must_escape(0x12));
        assert!(!accm.must_escape(0x20));
        assert_eq!(accm.async_map(), 0x000A_0000);

        let all = Accm::control_characters();
        assert!((0x00..0x20).all(|b| all.must_escape(b)));
        assert!(!all.must_escape(0x20));
    }

    #[test]
    fn test_extended_bits() {
        let mut accm = Accm::empty();
        accm.set(0xFF);
        accm.set(0x5E);
        assert!(accm.must_escape(0xFF));
        assert!(accm.must_escape(0x5E));

        accm.clear(0xFF);
        assert!(!accm.must_escape(0xFF));
        assert_eq!(accm.async_map(), 0);
    }

    #[test]
    fn test_extend() {
        let mut high = Accm::empty();
        high.set(0x91);
        let merged = Accm::from_async_map(0x1).extend(&high);
        assert!(merged.contains(0x00));
        assert!(merged.contains(0x91));
        assert!(!merged.contains(0x01));
    }
}
