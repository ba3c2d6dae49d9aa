//! Cross-context hand-off of raw serial input
//!
//! Serial input usually arrives on a driver or reader thread, but a session
//! may only be touched by the one context that owns it. Input is therefore
//! copied into a message and queued on a bounded FIFO channel; the
//! [`Dispatcher`] owning the sessions drains it and runs the decoders.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::session::{PpposSession, ProtocolLayer, SessionPhase};
use crate::types::{PpposError, SessionId};

/// Message queued for the owning context
#[derive(Debug)]
pub enum BridgeMessage {
    /// Raw bytes received on a session's serial device
    Input { session: SessionId, data: Bytes },
    /// Close a session (any partial frame is dropped)
    Close { session: SessionId },
    /// Stop the dispatcher loop
    Shutdown,
}

/// Sending half of the bridge, bound to one session
///
/// Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct InputSender {
    session: SessionId,
    tx: mpsc::Sender<BridgeMessage>,
}

impl InputSender {
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn message(&self, data: &[u8]) -> BridgeMessage {
        BridgeMessage::Input {
            session: self.session,
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Queue received bytes, waiting for room in the channel
    pub async fn input(&self, data: &[u8]) -> Result<(), PpposError> {
        self.tx
            .send(self.message(data))
            .await
            .map_err(|_| PpposError::ChannelClosed)
    }

    /// Queue received bytes from a thread outside the async runtime
    ///
    /// Must not be called from within an async context.
    pub fn input_blocking(&self, data: &[u8]) -> Result<(), PpposError> {
        self.tx
            .blocking_send(self.message(data))
            .map_err(|_| PpposError::ChannelClosed)
    }

    /// Queue received bytes without waiting
    pub fn try_input(&self, data: &[u8]) -> Result<(), PpposError> {
        self.tx.try_send(self.message(data)).map_err(|e| match e {
            TrySendError::Full(_) => PpposError::ChannelFull,
            TrySendError::Closed(_) => PpposError::ChannelClosed,
        })
    }

    /// Ask the owning context to close the session
    pub async fn close(&self) -> Result<(), PpposError> {
        self.tx
            .send(BridgeMessage::Close {
                session: self.session,
            })
            .await
            .map_err(|_| PpposError::ChannelClosed)
    }

    /// Ask the owning context to close the session, from outside the runtime
    ///
    /// Must not be called from within an async context.
    pub fn close_blocking(&self) -> Result<(), PpposError> {
        self.tx
            .blocking_send(BridgeMessage::Close {
                session: self.session,
            })
            .map_err(|_| PpposError::ChannelClosed)
    }

    /// Stop the dispatcher once everything queued before has been processed
    pub async fn shutdown(&self) -> Result<(), PpposError> {
        self.tx
            .send(BridgeMessage::Shutdown)
            .await
            .map_err(|_| PpposError::ChannelClosed)
    }
}

/// Owner of a set of sessions, processing bridged input in FIFO order
pub struct Dispatcher {
    tx: mpsc::Sender<BridgeMessage>,
    rx: mpsc::Receiver<BridgeMessage>,
    sessions: HashMap<SessionId, PpposSession>,
}

impl Dispatcher {
    /// Create a dispatcher whose input queue holds `capacity` messages
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx,
            sessions: HashMap::new(),
        }
    }

    /// Take ownership of a session, returning the sender feeding it
    pub fn insert(&mut self, session: PpposSession) -> InputSender {
        let id = session.id();
        if self.sessions.insert(id, session).is_some() {
            tracing::warn!("{}: replaced existing session", id);
        }
        self.sender(id)
    }

    /// Sender for `session` (which need not be registered yet)
    #[must_use]
    pub fn sender(&self, session: SessionId) -> InputSender {
        InputSender {
            session,
            tx: self.tx.clone(),
        }
    }

    pub fn remove(&mut self, session: SessionId) -> Option<PpposSession> {
        self.sessions.remove(&session)
    }

    #[must_use]
    pub fn session(&self, session: SessionId) -> Option<&PpposSession> {
        self.sessions.get(&session)
    }

    pub fn session_mut(&mut self, session: SessionId) -> Option<&mut PpposSession> {
        self.sessions.get_mut(&session)
    }

    /// Whether every registered session has been closed
    #[must_use]
    pub fn all_closed(&self) -> bool {
        !self.sessions.is_empty()
            && self
                .sessions
                .values()
                .all(|s| s.phase() == SessionPhase::Closed)
    }

    /// Wait for the next queued message
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }

    /// Process one message, returning `false` on shutdown
    pub fn dispatch<P: ProtocolLayer + ?Sized>(&mut self, msg: BridgeMessage, upper: &mut P) -> bool {
        match msg {
            BridgeMessage::Input { session, data } => match self.sessions.get_mut(&session) {
                Some(s) => {
                    s.input(&data, upper);
                }
                None => {
                    tracing::warn!("{}: dropping {} bytes for unknown session", session, data.len());
                }
            },
            BridgeMessage::Close { session } => match self.sessions.get_mut(&session) {
                Some(s) => s.close(),
                None => tracing::warn!("{}: close for unknown session", session),
            },
            BridgeMessage::Shutdown => {
                tracing::debug!("Dispatcher shutting down");
                return false;
            }
        }
        true
    }

    /// Process every queued message without waiting
    ///
    /// Returns the number of messages handled.
    pub fn drain<P: ProtocolLayer + ?Sized>(&mut self, upper: &mut P) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            handled += 1;
            if !self.dispatch(msg, upper) {
                break;
            }
        }
        handled
    }

    /// Process messages until shutdown, or until a close leaves no open session
    pub async fn run<P: ProtocolLayer + ?Sized>(&mut self, upper: &mut P) {
        while let Some(msg) = self.recv().await {
            let closing = matches!(msg, BridgeMessage::Close { .. });
            if !self.dispatch(msg, upper) {
                break;
            }
            if closing && self.all_closed() {
                tracing::debug!("All sessions closed, dispatcher stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::frame::{protocols, PppFrame};
    use crate::session::DeviceHandle;

    fn open_session(id: u32) -> PpposSession {
        let mut session = PpposSession::create(
            SessionId(id),
            DeviceHandle::new(format!("/dev/ttyS{id}")),
            LinkConfig::default(),
            Box::new(|_, _| {}),
        );
        session.open();
        session
    }

    fn wire(frames: &[PppFrame]) -> Vec<u8> {
        let mut peer = open_session(99);
        frames
            .iter()
            .flat_map(|f| peer.send(f).unwrap().to_vec())
            .collect()
    }

    fn frames(n: u8) -> Vec<PppFrame> {
        (0..n)
            .map(|i| PppFrame::new(protocols::IP, vec![0x45, i, 0x7E, i]))
            .collect()
    }

    #[tokio::test]
    async fn test_fifo_across_chunks() {
        let sent = frames(5);
        let wire = wire(&sent);

        let mut dispatcher = Dispatcher::new(64);
        let tx = dispatcher.insert(open_session(1));

        for chunk in wire.chunks(3) {
            tx.input(chunk).await.unwrap();
        }
        tx.shutdown().await.unwrap();

        let mut received = Vec::new();
        dispatcher
            .run(&mut |session: SessionId, frame: PppFrame| {
                assert_eq!(session, SessionId(1));
                received.push(frame);
            })
            .await;

        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_blocking_input_from_reader_thread() {
        let sent = frames(3);
        let wire = wire(&sent);

        let mut dispatcher = Dispatcher::new(2);
        let tx = dispatcher.insert(open_session(1));

        let reader = std::thread::spawn(move || {
            for chunk in wire.chunks(5) {
                tx.input_blocking(chunk).unwrap();
            }
            tx.input_blocking(&[]).unwrap();
            tx
        });

        let mut received = Vec::new();
        let mut upper = |_: SessionId, frame: PppFrame| received.push(frame);
        while dispatcher.session(SessionId(1)).unwrap().stats().rx_frames < 3 {
            if let Some(msg) = dispatcher.rx.recv().await {
                dispatcher.dispatch(msg, &mut upper);
            }
        }
        let tx = reader.join().unwrap();
        dispatcher.drain(&mut upper);

        assert_eq!(received, sent);
        assert_eq!(tx.session(), SessionId(1));
    }

    #[test]
    fn test_try_input_full() {
        let mut dispatcher = Dispatcher::new(1);
        let tx = dispatcher.insert(open_session(1));

        tx.try_input(&[0x7E]).unwrap();
        assert!(matches!(tx.try_input(&[0x7E]), Err(PpposError::ChannelFull)));

        assert_eq!(dispatcher.drain(&mut |_: SessionId, _: PppFrame| {}), 1);
        tx.try_input(&[0x7E]).unwrap();
    }

    #[test]
    fn test_zero_capacity_from_config() {
        let config = LinkConfig::from_json(r#"{ "channel_capacity": 0 }"#).unwrap();
        let mut dispatcher = Dispatcher::new(config.channel_capacity);
        let tx = dispatcher.insert(open_session(1));

        tx.try_input(&[0x7E]).unwrap();
        assert!(matches!(tx.try_input(&[0x7E]), Err(PpposError::ChannelFull)));
        assert_eq!(dispatcher.drain(&mut |_: SessionId, _: PppFrame| {}), 1);
    }

    #[test]
    fn test_routes_by_session() {
        let sent = frames(2);
        let wire = wire(&sent);

        let mut dispatcher = Dispatcher::new(16);
        let a = dispatcher.insert(open_session(1));
        let b = dispatcher.insert(open_session(2));
        let unknown = dispatcher.sender(SessionId(7));

        a.try_input(&wire).unwrap();
        unknown.try_input(&wire).unwrap();
        b.try_input(&wire).unwrap();

        let mut received = Vec::new();
        dispatcher.drain(&mut |session: SessionId, frame: PppFrame| received.push((session, frame)));

        let ids: Vec<_> = received.iter().map(|(s, _)| s.0).collect();
        assert_eq!(ids, vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn test_run_stops_when_reader_closes() {
        let sent = frames(2);
        let wire = wire(&sent);

        let mut dispatcher = Dispatcher::new(2);
        let a = dispatcher.insert(open_session(1));
        let b = dispatcher.insert(open_session(2));

        let reader = std::thread::spawn(move || {
            a.input_blocking(&wire).unwrap();
            a.close_blocking().unwrap();
            b.close_blocking().unwrap();
        });

        let mut received = Vec::new();
        dispatcher
            .run(&mut |_: SessionId, frame: PppFrame| received.push(frame))
            .await;
        reader.join().unwrap();

        assert_eq!(received, sent);
        assert!(dispatcher.all_closed());
    }

    #[tokio::test]
    async fn test_close_through_bridge() {
        let sent = frames(1);
        let wire = wire(&sent);

        let mut dispatcher = Dispatcher::new(16);
        let tx = dispatcher.insert(open_session(1));

        tx.input(&wire[..wire.len() / 2]).await.unwrap();
        tx.close().await.unwrap();
        tx.input(&wire).await.unwrap();

        let mut received = Vec::new();
        dispatcher.drain(&mut |_: SessionId, frame: PppFrame| received.push(frame));
        assert!(received.is_empty());

        let session = dispatcher.session(SessionId(1)).unwrap();
        assert!(!session.is_open());
        assert!(dispatcher.remove(SessionId(1)).is_some());
        assert!(dispatcher.session_mut(SessionId(1)).is_none());
    }
}
