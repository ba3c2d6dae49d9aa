//! Transmit-side framing: field compression, FCS, escaping, delimiting

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::accm::Accm;
use crate::fcs::Fcs16;
use crate::frame::{protocols, FieldCompression, PppFrame, PPP_ESCAPE, PPP_FLAG, PPP_TRANS};

/// Default idle time after which a frame is preceded by an extra flag
pub const DEFAULT_IDLE_FLAG: Duration = Duration::from_millis(100);

/// Writes escaped bytes while folding the unescaped ones into the FCS
struct EscapeWriter<'a> {
    dst: &'a mut BytesMut,
    accm: Accm,
    fcs: Fcs16,
}

impl<'a> EscapeWriter<'a> {
    fn new(dst: &'a mut BytesMut, accm: Accm) -> Self {
        Self {
            dst,
            accm,
            fcs: Fcs16::new(),
        }
    }

    fn put_escaped(&mut self, byte: u8) {
        if self.accm.must_escape(byte) {
            self.dst.put_slice(&[PPP_ESCAPE, byte ^ PPP_TRANS]);
        } else {
            self.dst.put_u8(byte);
        }
    }

    fn put_u8(&mut self, byte: u8) -> &mut Self {
        self.fcs.update(byte);
        self.put_escaped(byte);
        self
    }

    fn put_slice(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.put_u8(b);
        }
        self
    }

    /// Append the FCS trailer (escaped, not folded) and the closing flag
    fn finish(&mut self) {
        for b in self.fcs.finalize() {
            self.put_escaped(b);
        }
        self.dst.put_u8(PPP_FLAG);
    }
}

/// PPP frame encoder for one link
///
/// Tracks the time of the last transmission to decide whether a frame needs
/// a leading flag to resynchronize a receiver that may have seen line noise.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    idle_flag: Duration,
    last_xmit: Option<Instant>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_FLAG)
    }
}

impl FrameEncoder {
    /// Create an encoder with the given idle-resync threshold
    #[must_use]
    pub fn new(idle_flag: Duration) -> Self {
        Self {
            idle_flag,
            last_xmit: None,
        }
    }

    #[must_use]
    pub fn last_xmit(&self) -> Option<Instant> {
        self.last_xmit
    }

    /// Forget the last transmission time; the next frame gets a leading flag
    pub fn reset(&mut self) {
        self.last_xmit = None;
    }

    fn needs_leading_flag(&self, now: Instant) -> bool {
        match self.last_xmit {
            Some(last) => now.saturating_duration_since(last) >= self.idle_flag,
            None => true,
        }
    }

    /// Encode `frame` into `dst`, returning the number of bytes written
    ///
    /// LCP frames are never field-compressed and are always escaped with the
    /// default control-character map on top of `accm`.
    pub fn encode(
        &mut self,
        frame: &PppFrame,
        compression: FieldCompression,
        accm: &Accm,
        now: Instant,
        dst: &mut BytesMut,
    ) -> usize {
        let start = dst.len();

        let (compression, accm) = if frame.protocol == protocols::LCP {
            (FieldCompression::NONE, accm.extend(&Accm::control_characters()))
        } else {
            (compression, *accm)
        };

        // worst case every byte escaped, plus flags
        dst.reserve(2 * (frame.payload.len() + 6) + 2);

        if self.needs_leading_flag(now) {
            dst.put_u8(PPP_FLAG);
        }

        let mut out = EscapeWriter::new(dst, accm);

        if !compression.address_control {
            out.put_u8(frame.address).put_u8(frame.control);
        }

        if compression.protocol && frame.protocol_compressible() {
            out.put_u8(frame.protocol as u8);
        } else {
            out.put_slice(&frame.protocol.to_be_bytes());
        }

        out.put_slice(&frame.payload).finish();

        self.last_xmit = Some(now);
        dst.len() - start
    }

    /// Encode a frame into a fresh buffer
    pub fn encode_bytes(
        &mut self,
        frame: &PppFrame,
        compression: FieldCompression,
        accm: &Accm,
        now: Instant,
    ) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(frame, compression, accm, now, &mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcs::fcs16;

    fn encode_once(frame: &PppFrame, compression: FieldCompression, accm: &Accm) -> Bytes {
        FrameEncoder::default().encode_bytes(frame, compression, accm, Instant::now())
    }

    #[test]
    fn test_encode_uncompressed_ip() {
        let frame = PppFrame::new(protocols::IP, vec![0x45, 0x00, 0x00, 0x14]);
        let encoded = encode_once(&frame, FieldCompression::NONE, &Accm::empty());

        let body = [0xFF, 0x03, 0x00, 0x21, 0x45, 0x00, 0x00, 0x14];
        let fcs = fcs16(&body);
        let mut expected = vec![0x7E];
        expected.extend_from_slice(&body);
        for b in fcs {
            if b == 0x7E || b == 0x7D {
                expected.extend_from_slice(&[0x7D, b ^ 0x20]);
            } else {
                expected.push(b);
            }
        }
        expected.push(0x7E);

        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_encode_escapes_flag_and_escape() {
        let frame = PppFrame::new(protocols::IP, vec![0x7E, 0x01, 0x7D]);
        let encoded = encode_once(&frame, FieldCompression::NONE, &Accm::empty());
        assert_eq!(
            &encoded[..8],
            &[0x7E, 0xFF, 0x03, 0x00, 0x21, 0x7D, 0x5E, 0x01]
        );
        assert_eq!(&encoded[8..10], &[0x7D, 0x5D]);

        // no unescaped flag except the delimiters
        let inner = &encoded[1..encoded.len() - 1];
        assert!(!inner.contains(&0x7E));
    }

    #[test]
    fn test_encode_escapes_accm_characters() {
        let frame = PppFrame::new(protocols::IP, vec![0x11, 0x13, 0x20]);
        let encoded = encode_once(
            &frame,
            FieldCompression::NONE,
            &Accm::from_async_map(0x000A_0000),
        );
        assert_eq!(
            &encoded[5..10],
            &[0x7D, 0x31, 0x7D, 0x33, 0x20]
        );
    }

    #[test]
    fn test_encode_field_compression() {
        let frame = PppFrame::new(protocols::IP, vec![0x45]);

        let encoded = encode_once(&frame, FieldCompression::ALL, &Accm::empty());
        assert_eq!(&encoded[..3], &[0x7E, 0x21, 0x45]);

        let acfc_only = FieldCompression {
            protocol: false,
            address_control: true,
        };
        let encoded = encode_once(&frame, acfc_only, &Accm::empty());
        assert_eq!(&encoded[..4], &[0x7E, 0x00, 0x21, 0x45]);

        // even protocol numbers never shrink
        let frame = PppFrame::new(protocols::IPCP, vec![0x01]);
        let encoded = encode_once(&frame, FieldCompression::ALL, &Accm::empty());
        assert_eq!(&encoded[..4], &[0x7E, 0x80, 0x21, 0x01]);
    }

    #[test]
    fn test_lcp_ignores_compression_and_escapes_controls() {
        let frame = PppFrame::new(protocols::LCP, vec![0x01, 0x01, 0x00, 0x04]);
        let encoded = encode_once(&frame, FieldCompression::ALL, &Accm::empty());
        assert_eq!(
            &encoded[..11],
            &[0x7E, 0xFF, 0x7D, 0x23, 0xC0, 0x21, 0x7D, 0x21, 0x7D, 0x21, 0x7D]
        );
    }

    #[test]
    fn test_idle_flag() {
        let frame = PppFrame::new(protocols::IP, vec![0x45]);
        let accm = Accm::empty();
        let mut encoder = FrameEncoder::new(Duration::from_millis(100));
        let t0 = Instant::now();

        let first = encoder.encode_bytes(&frame, FieldCompression::NONE, &accm, t0);
        assert_eq!(first[0], PPP_FLAG);

        let second = encoder.encode_bytes(
            &frame,
            FieldCompression::NONE,
            &accm,
            t0 + Duration::from_millis(10),
        );
        assert_eq!(second[0], 0xFF);
        assert_eq!(second.len(), first.len() - 1);

        let third = encoder.encode_bytes(
            &frame,
            FieldCompression::NONE,
            &accm,
            t0 + Duration::from_millis(500),
        );
        assert_eq!(third[0], PPP_FLAG);
        assert_eq!(encoder.last_xmit(), Some(t0 + Duration::from_millis(500)));

        encoder.reset();
        assert_eq!(encoder.last_xmit(), None);
    }
}
