//! Receive-side framing: byte-at-a-time PPP frame reassembly
//!
//! The decoder consumes raw serial bytes in arbitrary chunks. Partial frames
//! persist between calls, so chunk boundaries never need to line up with
//! frame boundaries.

use bytes::Bytes;

use crate::fcs::Fcs16;
use crate::frame::{
    FieldCompression, LinkParams, PppFrame, PPP_ALLSTATIONS, PPP_ESCAPE, PPP_FLAG, PPP_TRANS,
    PPP_UI,
};
use crate::types::FrameError;

/// Default limit on the data region of a frame: MRU 1500 plus the FCS
pub const DEFAULT_MAX_FRAME_LEN: usize = 1502;

/// Growth step of the receive buffer
const BUFFER_CHUNK: usize = 256;

/// Parser state: the part of the frame that is expected next
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DecodeState {
    /// Waiting: bytes are dropped until a flag or an all-stations address
    #[default]
    Idle,
    /// Frame start without a leading flag, the FCS is (re)initialized
    Start,
    Address,
    Control,
    ProtocolHigh,
    ProtocolLow,
    Data,
}

/// What to do with a byte accepted by the field state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Not part of any frame, neither stored nor folded into the FCS
    Discard,
    /// Address or control field
    Header,
    /// High byte of a two-byte protocol field
    ProtocolHigh(u8),
    /// Complete single-byte (compressed) protocol field
    Protocol(u8),
    /// Low byte of a two-byte protocol field
    ProtocolLow(u8),
    /// Payload or FCS byte
    Append(u8),
}

/// Field state machine for one unescaped, non-flag byte
///
/// Address/control compression is only inferred when `rx.address_control`
/// is negotiated, likewise single-byte protocols need `rx.protocol`.
pub fn transition(
    state: DecodeState,
    byte: u8,
    rx: FieldCompression,
) -> Result<(DecodeState, Action), FrameError> {
    match state {
        DecodeState::Idle => {
            if byte == PPP_ALLSTATIONS {
                transition(DecodeState::Start, byte, rx)
            } else {
                Ok((DecodeState::Idle, Action::Discard))
            }
        }
        DecodeState::Start | DecodeState::Address => {
            if byte == PPP_ALLSTATIONS {
                Ok((DecodeState::Control, Action::Header))
            } else if rx.address_control {
                // compressed framing: this is already the protocol field
                transition(DecodeState::ProtocolHigh, byte, rx)
            } else {
                Err(FrameError::BadAddress(byte))
            }
        }
        DecodeState::Control => {
            if byte == PPP_UI {
                Ok((DecodeState::ProtocolHigh, Action::Header))
            } else {
                Err(FrameError::BadControl(byte))
            }
        }
        DecodeState::ProtocolHigh => {
            if rx.protocol && byte & 0x01 == 0x01 {
                Ok((DecodeState::Data, Action::Protocol(byte)))
            } else {
                Ok((DecodeState::ProtocolLow, Action::ProtocolHigh(byte)))
            }
        }
        DecodeState::ProtocolLow => Ok((DecodeState::Data, Action::ProtocolLow(byte))),
        DecodeState::Data => Ok((DecodeState::Data, Action::Append(byte))),
    }
}

/// Result of one raw byte
#[derive(Debug)]
enum Outcome {
    Pending,
    Noise,
    Frame(PppFrame),
    Dropped(FrameError),
}

/// PPP frame decoder
#[derive(Debug)]
pub struct Decoder {
    buf: Vec<u8>,
    state: DecodeState,
    escaped: bool,
    protocol: u16,
    fcs: Fcs16,
    max_frame_len: usize,
    /// Discarding the rest of a bad frame up to the next flag
    hunting: bool,
    noise: u64,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder {
    /// Create a decoder limiting the data region to `max_frame_len` bytes
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::Idle,
            escaped: false,
            protocol: 0,
            fcs: Fcs16::new(),
            max_frame_len,
            hunting: false,
            noise: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    #[must_use]
    pub fn is_escaped(&self) -> bool {
        self.escaped
    }

    /// Whether the decoder is skipping to the next flag after an error
    #[must_use]
    pub fn is_hunting(&self) -> bool {
        self.hunting
    }

    /// Bytes of the frame in progress (data region only)
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Bytes discarded because they were flagged in the receive ACCM
    #[must_use]
    pub fn noise_bytes(&self) -> u64 {
        self.noise
    }

    /// Feed a chunk of raw bytes, returning every frame completed or dropped
    pub fn feed(&mut self, data: &[u8], params: &LinkParams) -> Vec<Result<PppFrame, FrameError>> {
        let mut frames = Vec::new();

        for &byte in data {
            match self.input(byte, params) {
                Outcome::Frame(frame) => frames.push(Ok(frame)),
                Outcome::Dropped(err) => frames.push(Err(err)),
                Outcome::Pending | Outcome::Noise => {}
            }
        }

        frames
    }

    /// Feed a single raw byte
    pub fn push_byte(
        &mut self,
        byte: u8,
        params: &LinkParams,
    ) -> Option<Result<PppFrame, FrameError>> {
        match self.input(byte, params) {
            Outcome::Frame(frame) => Some(Ok(frame)),
            Outcome::Dropped(err) => Some(Err(err)),
            Outcome::Pending | Outcome::Noise => None,
        }
    }

    fn input(&mut self, byte: u8, params: &LinkParams) -> Outcome {
        if params.accm.must_escape(byte) {
            return match byte {
                PPP_ESCAPE => {
                    self.escaped = true;
                    Outcome::Pending
                }
                PPP_FLAG => self.end_of_frame(),
                _ => {
                    // inserted by the DCE, not part of the frame
                    self.noise += 1;
                    Outcome::Noise
                }
            };
        }

        if self.hunting {
            self.escaped = false;
            return Outcome::Pending;
        }

        let byte = if self.escaped {
            self.escaped = false;
            byte ^ PPP_TRANS
        } else {
            byte
        };

        let (next, action) = match transition(self.state, byte, params.compression) {
            Ok(t) => t,
            Err(err) => return self.discard(err),
        };

        if action == Action::Discard {
            return Outcome::Pending;
        }

        if matches!(self.state, DecodeState::Idle | DecodeState::Start) {
            self.fcs = Fcs16::new();
        }
        self.fcs.update(byte);
        self.state = next;

        match action {
            Action::Discard | Action::Header => {}
            Action::ProtocolHigh(b) => self.protocol = u16::from(b) << 8,
            Action::Protocol(b) => self.protocol = u16::from(b),
            Action::ProtocolLow(b) => self.protocol |= u16::from(b),
            Action::Append(b) => {
                if let Err(err) = self.append(b) {
                    return self.discard(err);
                }
            }
        }

        Outcome::Pending
    }

    fn append(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.buf.len() >= self.max_frame_len {
            return Err(FrameError::Oversized(self.max_frame_len));
        }

        if self.buf.len() == self.buf.capacity() {
            let additional = BUFFER_CHUNK.min(self.max_frame_len - self.buf.len());
            self.buf
                .try_reserve(additional)
                .map_err(|_| FrameError::OutOfMemory)?;
        }

        self.buf.push(byte);
        Ok(())
    }

    /// Handle a flag byte: complete, drop or ignore the frame in progress
    fn end_of_frame(&mut self) -> Outcome {
        let outcome = if self.hunting || self.state <= DecodeState::Address {
            // extra flag between frames
            Outcome::Pending
        } else if self.escaped {
            Outcome::Dropped(FrameError::Abort)
        } else if self.state < DecodeState::Data {
            Outcome::Dropped(FrameError::Incomplete(self.state))
        } else if self.buf.len() < 2 {
            Outcome::Dropped(FrameError::TooShort(self.buf.len()))
        } else if !self.fcs.is_good() {
            Outcome::Dropped(FrameError::BadChecksum(self.fcs.value()))
        } else {
            let protocol = self.protocol;
            let payload = self.take();
            Outcome::Frame(PppFrame::new(protocol, payload))
        };

        self.reset_frame();
        outcome
    }

    /// Move the completed payload out, leaving the decoder without a buffer
    fn take(&mut self) -> Bytes {
        let mut payload = std::mem::take(&mut self.buf);
        payload.truncate(payload.len() - 2);
        Bytes::from(payload)
    }

    /// Drop the frame in progress and skip the rest of it
    fn discard(&mut self, err: FrameError) -> Outcome {
        self.reset_frame();
        self.hunting = true;
        Outcome::Dropped(err)
    }

    /// Start over at the address field of a new frame
    fn reset_frame(&mut self) {
        self.buf.clear();
        self.state = DecodeState::Address;
        self.hunting = false;
        self.escaped = false;
        self.protocol = 0;
        self.fcs = Fcs16::new();
    }

    /// Drop the frame in progress and wait for a frame start
    pub fn reset(&mut self) {
        self.buf = Vec::new();
        self.state = DecodeState::Idle;
        self.hunting = false;
        self.escaped = false;
        self.protocol = 0;
        self.fcs = Fcs16::new();
    }
}
