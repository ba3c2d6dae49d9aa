//! PPP frame structure and wire constants

use bytes::Bytes;

use crate::accm::Accm;

/// Flag byte - marks frame boundaries
pub const PPP_FLAG: u8 = 0x7E;
/// Control escape byte
pub const PPP_ESCAPE: u8 = 0x7D;
/// XOR mask applied to an escaped byte
pub const PPP_TRANS: u8 = 0x20;
/// All-stations address
pub const PPP_ALLSTATIONS: u8 = 0xFF;
/// Unnumbered Information control byte
pub const PPP_UI: u8 = 0x03;

/// PPP protocol numbers
pub mod protocols {
    /// Internet Protocol version 4
    pub const IP: u16 = 0x0021;
    /// Van Jacobson compressed TCP/IP
    pub const VJC_COMP: u16 = 0x002D;
    /// Van Jacobson uncompressed TCP/IP
    pub const VJC_UNCOMP: u16 = 0x002F;
    /// Internet Protocol version 6
    pub const IPV6: u16 = 0x0057;
    /// Internet Protocol Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// Link Control Protocol
    pub const LCP: u16 = 0xC021;
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xC023;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xC223;
}

/// Negotiated field compression for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldCompression {
    /// Protocol-Field-Compression: odd protocols below 0x100 take one byte
    pub protocol: bool,
    /// Address-and-Control-Field-Compression: 0xFF 0x03 is omitted
    pub address_control: bool,
}

impl FieldCompression {
    pub const NONE: Self = Self {
        protocol: false,
        address_control: false,
    };

    pub const ALL: Self = Self {
        protocol: true,
        address_control: true,
    };
}

/// Framing parameters negotiated for one direction of a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkParams {
    pub accm: Accm,
    pub compression: FieldCompression,
}

/// Logical PPP frame
///
/// Frame format on the wire (before escaping):
/// ```text
/// [Address: 0xFF]     (omitted with address/control compression)
/// [Control: 0x03]     (omitted with address/control compression)
/// [Protocol: 1-2 bytes BE]
/// [Payload: variable]
/// [FCS: 2 bytes LE]
/// ```
///
/// A frame handed up by the decoder is always in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppFrame {
    pub address: u8,
    pub control: u8,
    pub protocol: u16,
    pub payload: Bytes,
}

impl PppFrame {
    /// Create a canonical frame (address 0xFF, control 0x03)
    #[must_use]
    pub fn new(protocol: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            address: PPP_ALLSTATIONS,
            control: PPP_UI,
            protocol,
            payload: payload.into(),
        }
    }

    /// Whether the protocol number may be sent as a single byte
    #[must_use]
    pub fn protocol_compressible(&self) -> bool {
        self.protocol <= 0xFF && self.protocol & 0x01 == 0x01
    }

    /// Check if this is a control protocol (LCP, PAP, CHAP, IPCP, etc.)
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.protocol >= 0x8000
    }
}
