//! PPP-over-serial session control block
//!
//! A session owns the framing state of one serial link. Its fields fall in
//! two groups: the link identity, which lives as long as the session object,
//! and the session state, which is rebuilt from scratch by
//! [`PpposSession::reset_session`] whenever a new PPP session starts on the
//! same link.

use std::time::Instant;

use bytes::Bytes;

use crate::accm::{Accm, Direction};
use crate::config::LinkConfig;
use crate::decoder::{DecodeState, Decoder};
use crate::encoder::FrameEncoder;
use crate::frame::{protocols, FieldCompression, LinkParams, PppFrame};
use crate::types::{LinkStats, LinkStatus, PpposError, SessionId};
use crate::vj::{is_vj_protocol, HeaderCompressor};

/// Callback receiving link status changes
pub type LinkStatusCallback = Box<dyn FnMut(SessionId, LinkStatus) + Send>;

/// Opaque handle of the serial device a session runs on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.0
    }
}

/// Upper protocol layer receiving decoded frames
pub trait ProtocolLayer {
    fn deliver(&mut self, session: SessionId, frame: PppFrame);
}

impl<F> ProtocolLayer for F
where
    F: FnMut(SessionId, PppFrame),
{
    fn deliver(&mut self, session: SessionId, frame: PppFrame) {
        self(session, frame);
    }
}

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Open,
    Closed,
}

/// Negotiated transmit flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub open: bool,
    /// Peer accepts protocol field compression
    pub pcomp: bool,
    /// Peer accepts address/control field compression
    pub accomp: bool,
    pub vj_enabled: bool,
}

/// Fields that survive a session reset
struct LinkIdentity {
    id: SessionId,
    device: DeviceHandle,
    link_status: LinkStatusCallback,
    config: LinkConfig,
}

/// Fields rebuilt for every new session on the link
struct SessionState {
    phase: SessionPhase,
    encoder: FrameEncoder,
    out_accm: Accm,
    flags: SessionFlags,
    rx: LinkParams,
    decoder: Decoder,
    vj: Option<Box<dyn HeaderCompressor>>,
    stats: LinkStats,
}

impl SessionState {
    fn new(config: &LinkConfig) -> Self {
        Self {
            phase: SessionPhase::Created,
            encoder: FrameEncoder::new(config.idle_flag()),
            out_accm: Accm::control_characters(),
            flags: SessionFlags::default(),
            rx: LinkParams::default(),
            decoder: Decoder::new(config.max_frame_len),
            vj: None,
            stats: LinkStats::default(),
        }
    }
}

/// PPP-over-serial session
pub struct PpposSession {
    identity: LinkIdentity,
    state: SessionState,
}

impl PpposSession {
    /// Create a session for `device`
    pub fn create(
        id: SessionId,
        device: DeviceHandle,
        config: LinkConfig,
        link_status: LinkStatusCallback,
    ) -> Self {
        tracing::debug!("{}: created on {}", id, device.path());
        let state = SessionState::new(&config);
        Self {
            identity: LinkIdentity {
                id,
                device,
                link_status,
                config,
            },
            state,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.identity.id
    }

    #[must_use]
    pub fn device(&self) -> &DeviceHandle {
        &self.identity.device
    }

    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.identity.config
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.flags.open
    }

    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.state.flags
    }

    #[must_use]
    pub fn decoder_state(&self) -> DecodeState {
        self.state.decoder.state()
    }

    /// Counters for the current session
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            noise_bytes: self.state.decoder.noise_bytes(),
            ..self.state.stats
        }
    }

    /// Framing parameters applied to outgoing frames
    #[must_use]
    pub fn tx_params(&self) -> LinkParams {
        LinkParams {
            accm: self.state.out_accm,
            compression: FieldCompression {
                protocol: self.state.flags.pcomp,
                address_control: self.state.flags.accomp,
            },
        }
    }

    /// Framing parameters applied to incoming frames
    #[must_use]
    pub fn rx_params(&self) -> LinkParams {
        self.state.rx
    }

    /// Whether `byte` must appear escaped on the wire in `direction`
    #[must_use]
    pub fn must_escape(&self, direction: Direction, byte: u8) -> bool {
        match direction {
            Direction::Transmit => self.state.out_accm.must_escape(byte),
            Direction::Receive => self.state.rx.accm.must_escape(byte),
        }
    }

    /// Apply negotiated transmit parameters
    pub fn configure_send(&mut self, accm: Accm, pcomp: bool, accomp: bool) {
        tracing::debug!(
            "{}: send config accm={:#010x} pcomp={} accomp={}",
            self.identity.id,
            accm.async_map(),
            pcomp,
            accomp
        );
        self.state.out_accm = accm;
        self.state.flags.pcomp = pcomp;
        self.state.flags.accomp = accomp;
    }

    /// Apply negotiated receive parameters
    pub fn configure_recv(&mut self, accm: Accm, pcomp: bool, accomp: bool) {
        tracing::debug!(
            "{}: recv config accm={:#010x} pcomp={} accomp={}",
            self.identity.id,
            accm.async_map(),
            pcomp,
            accomp
        );
        self.state.rx = LinkParams {
            accm,
            compression: FieldCompression {
                protocol: pcomp,
                address_control: accomp,
            },
        };
    }

    /// Install (or remove) the header compression collaborator
    pub fn set_header_compressor(&mut self, vj: Option<Box<dyn HeaderCompressor>>) {
        self.state.flags.vj_enabled = vj.is_some();
        self.state.vj = vj;
    }

    /// Mark the link as up once negotiation confirms it
    ///
    /// Before that, only control protocol frames (LCP, authentication, NCPs)
    /// are sent and delivered so negotiation can run.
    pub fn open(&mut self) {
        if self.state.flags.open {
            return;
        }
        self.state.flags.open = true;
        self.state.phase = SessionPhase::Open;
        tracing::info!("{}: link up", self.identity.id);
        self.notify(LinkStatus::Up);
    }

    /// Close the session, dropping any partial frame
    pub fn close(&mut self) {
        if self.state.phase == SessionPhase::Closed {
            return;
        }
        if self.state.decoder.pending_len() > 0 {
            tracing::debug!(
                "{}: discarding {} bytes of partial frame",
                self.identity.id,
                self.state.decoder.pending_len()
            );
        }
        self.state.decoder.reset();
        self.state.flags.open = false;
        self.state.phase = SessionPhase::Closed;
        tracing::info!("{}: link down", self.identity.id);
        self.notify(LinkStatus::Down);
    }

    /// Reinitialize every session field, keeping the link identity
    ///
    /// An installed header compressor is kept but loses its connection
    /// state and stays disabled until installed again.
    pub fn reset_session(&mut self) {
        let vj = self.state.vj.take();
        self.state = SessionState::new(&self.identity.config);
        if let Some(mut vj) = vj {
            vj.reset();
            self.state.vj = Some(vj);
        }
        tracing::debug!("{}: session reset", self.identity.id);
        self.notify(LinkStatus::Reset);
    }

    /// Enable or disable header compression with the installed compressor
    pub fn enable_vj(&mut self, enabled: bool) {
        self.state.flags.vj_enabled = enabled && self.state.vj.is_some();
    }

    fn notify(&mut self, status: LinkStatus) {
        (self.identity.link_status)(self.identity.id, status);
    }

    /// Decode raw serial bytes, delivering completed frames to `upper`
    ///
    /// Returns the number of frames delivered.
    pub fn input<P: ProtocolLayer + ?Sized>(&mut self, data: &[u8], upper: &mut P) -> usize {
        if self.state.phase == SessionPhase::Closed {
            tracing::debug!(
                "{}: link closed, dropping {} bytes",
                self.identity.id,
                data.len()
            );
            return 0;
        }

        let id = self.identity.id;
        let rx = self.state.rx;
        let mut delivered = 0;

        for result in self.state.decoder.feed(data, &rx) {
            match result {
                Ok(frame) if !self.accepts(&frame) => {
                    tracing::debug!(
                        "{}: link not up, dropping protocol={:#06x}",
                        id,
                        frame.protocol
                    );
                    self.state.stats.rx_dropped += 1;
                }
                Ok(frame) => {
                    self.state.stats.rx_frames += 1;
                    self.state.stats.rx_bytes += frame.payload.len() as u64;
                    if let Some(frame) = self.expand(frame) {
                        tracing::debug!(
                            "{}: received protocol={:#06x} len={}",
                            id,
                            frame.protocol,
                            frame.payload.len()
                        );
                        upper.deliver(id, frame);
                        delivered += 1;
                    }
                }
                Err(err) => {
                    tracing::debug!("{}: dropping frame: {}", id, err);
                    self.state.stats.record_drop(err);
                    if self.state.flags.vj_enabled {
                        if let Some(vj) = self.state.vj.as_mut() {
                            vj.input_error();
                        }
                    }
                }
            }
        }

        delivered
    }

    /// Whether `frame` may pass in the current phase
    fn accepts(&self, frame: &PppFrame) -> bool {
        match self.state.phase {
            SessionPhase::Open => true,
            SessionPhase::Created => frame.is_control(),
            SessionPhase::Closed => false,
        }
    }

    /// Run VJ frames through the header compressor
    fn expand(&mut self, frame: PppFrame) -> Option<PppFrame> {
        if !self.state.flags.vj_enabled || !is_vj_protocol(frame.protocol) {
            return Some(frame);
        }
        let vj = self.state.vj.as_mut()?;

        match vj.expand(frame.protocol, frame.payload) {
            Ok(ip) => Some(PppFrame::new(protocols::IP, ip)),
            Err(err) => {
                tracing::debug!("{}: header decompression failed: {}", self.identity.id, err);
                self.state.stats.vj_errors += 1;
                self.state.stats.rx_dropped += 1;
                None
            }
        }
    }

    /// Encode a frame for transmission
    pub fn send(&mut self, frame: &PppFrame) -> Result<Bytes, PpposError> {
        self.send_at(frame, Instant::now())
    }

    /// Encode a frame as if sent at `now`
    pub fn send_at(&mut self, frame: &PppFrame, now: Instant) -> Result<Bytes, PpposError> {
        if !self.accepts(frame) {
            return Err(PpposError::NotOpen);
        }

        let tx = self.tx_params();
        let encoded = self
            .state
            .encoder
            .encode_bytes(frame, tx.compression, &tx.accm, now);

        self.state.stats.tx_frames += 1;
        self.state.stats.tx_bytes += encoded.len() as u64;
        tracing::debug!(
            "{}: sending protocol={:#06x} len={} wire={}",
            self.identity.id,
            frame.protocol,
            frame.payload.len(),
            encoded.len()
        );
        Ok(encoded)
    }

    /// Encode an IP datagram, header-compressing it when enabled
    pub fn send_ip(&mut self, packet: Bytes) -> Result<Bytes, PpposError> {
        self.send_ip_at(packet, Instant::now())
    }

    pub fn send_ip_at(&mut self, packet: Bytes, now: Instant) -> Result<Bytes, PpposError> {
        let (protocol, payload) = match self.state.vj.as_mut() {
            Some(vj) if self.state.flags.vj_enabled => vj.compress(packet),
            _ => (protocols::IP, packet),
        };
        self.send_at(&PppFrame::new(protocol, payload), now)
    }
}
