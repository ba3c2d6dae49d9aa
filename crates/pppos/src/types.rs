//! Shared types: errors, link status and statistics

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::decoder::DecodeState;
use crate::vj::VjError;

/// Receive-side framing errors
///
/// Every variant is recoverable: the partial frame is discarded and the
/// decoder resynchronizes on the next flag byte.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame aborted by escape/flag sequence")]
    Abort,

    #[error("Frame ended before the protocol field was complete (state {0:?})")]
    Incomplete(DecodeState),

    #[error("Frame too short: {0} bytes after protocol field")]
    TooShort(usize),

    #[error("Unexpected address byte: {0:#04x}")]
    BadAddress(u8),

    #[error("Unexpected control byte: {0:#04x}")]
    BadControl(u8),

    #[error("Frame exceeds maximum length of {0} bytes")]
    Oversized(usize),

    #[error("Bad frame check sequence: {0:#06x}")]
    BadChecksum(u16),

    #[error("Out of memory while assembling frame")]
    OutOfMemory,
}

/// PPP-over-serial errors
#[derive(Error, Debug)]
pub enum PpposError {
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Session is not open")]
    NotOpen,

    #[error("Bridge channel closed")]
    ChannelClosed,

    #[error("Bridge channel full")]
    ChannelFull,

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Header compression error: {0}")]
    HeaderCompression(#[from] VjError),

    #[error("Serial port error: {0}")]
    Serial(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Identifies one serial link (and the session currently running on it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pppos{}", self.0)
    }
}

/// Link status reported through the session's status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkStatus {
    /// Negotiation confirmed the link, frames flow
    Up,
    /// Session closed, any partial frame was dropped
    Down,
    /// Session state was reinitialized for a reconnect
    Reset,
}

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub rx_frames: u64,
    pub rx_bytes: u64,
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64,
    pub length_errors: u64,
    pub aborts: u64,
    pub memory_errors: u64,
    pub noise_bytes: u64,
    pub vj_errors: u64,
}

impl LinkStats {
    /// Account for a dropped receive frame
    pub fn record_drop(&mut self, err: FrameError) {
        self.rx_dropped += 1;
        match err {
            FrameError::Abort => self.aborts += 1,
            FrameError::Incomplete(_) | FrameError::TooShort(_) | FrameError::Oversized(_) => {
                self.length_errors += 1;
            }
            FrameError::BadAddress(_) | FrameError::BadControl(_) => self.framing_errors += 1,
            FrameError::BadChecksum(_) => self.checksum_errors += 1,
            FrameError::OutOfMemory => self.memory_errors += 1,
        }
    }
}
