//! PPP over asynchronous serial links - RFC 1662
//!
//! This crate implements the PPP-over-serial data plane: HDLC-like framing
//! with byte stuffing, the async-control-character map, the 16-bit frame
//! check sequence, and the per-link session that ties them together.

pub mod accm;
pub mod bridge;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod fcs;
pub mod frame;
pub mod session;
pub mod transport;
pub mod types;
pub mod vj;

pub use accm::{Accm, Direction};
pub use bridge::{BridgeMessage, Dispatcher, InputSender};
pub use config::LinkConfig;
pub use decoder::{DecodeState, Decoder};
pub use encoder::FrameEncoder;
pub use frame::{protocols, FieldCompression, LinkParams, PppFrame};
pub use session::{DeviceHandle, PpposSession, ProtocolLayer, SessionFlags, SessionPhase};
pub use transport::SerialTransport;
pub use types::*;
pub use vj::{HeaderCompressor, VjError};
