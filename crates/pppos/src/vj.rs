//! Van Jacobson TCP/IP header compression seam - RFC 1144
//!
//! The compression algorithm itself lives outside this crate; a session only
//! routes VJ frames through whatever implementation negotiation installed.

use bytes::Bytes;
use thiserror::Error;

use crate::frame::protocols;

/// Header compression errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VjError {
    /// Decompressor is discarding packets until the next uncompressed one
    #[error("Discarding until resynchronized")]
    Toss,

    #[error("Malformed compressed header")]
    Malformed,

    /// The packet asks for the connection state to be reset
    #[error("Connection state reset required")]
    ResetRequired,
}

/// Header (de)compression collaborator for one session
pub trait HeaderCompressor: Send {
    /// Expand a received VJ packet into a full IP datagram
    ///
    /// `protocol` is either [`protocols::VJC_COMP`] or
    /// [`protocols::VJC_UNCOMP`].
    fn expand(&mut self, protocol: u16, payload: Bytes) -> Result<Bytes, VjError>;

    /// Compress an outgoing IP datagram, returning the protocol to send it with
    fn compress(&mut self, ip_packet: Bytes) -> (u16, Bytes) {
        (protocols::IP, ip_packet)
    }

    /// A receive frame was dropped; the next compressed packet can't be trusted
    fn input_error(&mut self);

    /// Forget all connection state
    fn reset(&mut self);
}

/// Whether `protocol` carries VJ compressed or uncompressed TCP
#[must_use]
pub fn is_vj_protocol(protocol: u16) -> bool {
    matches!(protocol, protocols::VJC_COMP | protocols::VJC_UNCOMP)
}
