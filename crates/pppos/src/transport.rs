//! Serial port glue for PPP-over-serial links

use bytes::Bytes;
use serial2::SerialPort;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::InputSender;
use crate::config::LinkConfig;
use crate::types::PpposError;

/// Read timeout of the reader thread
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Back-off after a read that would have blocked
const WOULD_BLOCK_DELAY: Duration = Duration::from_millis(10);

/// Queued for the writer task
enum WriteCommand {
    Send(Bytes),
    Shutdown,
}

/// Serial device carrying one PPP link
///
/// A reader thread hands everything it reads to the bridge and closes the
/// session when the device goes away; a writer task puts encoded frames on
/// the wire.
pub struct SerialTransport {
    write_tx: mpsc::Sender<WriteCommand>,
    writer: Option<JoinHandle<()>>,
    path: String,
}

impl SerialTransport {
    /// Open the serial port at `path` and start moving bytes
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &str, config: &LinkConfig, input: InputSender) -> Result<Self, PpposError> {
        tracing::info!("Opening {} at {} baud", path, config.baud_rate);

        let mut port = SerialPort::open(path, config.baud_rate)?;
        port.set_read_timeout(READ_TIMEOUT)?;
        let reader = port.try_clone()?;

        Ok(Self::start(path, reader, port, config, input))
    }

    /// Run the transport over an already opened reader/writer pair
    fn start<R, W>(path: &str, reader: R, writer: W, config: &LinkConfig, input: InputSender) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel(config.channel_capacity.max(1));
        let writer = tokio::spawn(writer_task(writer, write_rx));

        let read_buffer = config.read_buffer.max(1);
        std::thread::spawn(move || reader_thread(reader, &input, read_buffer));

        Self {
            write_tx,
            writer: Some(writer),
            path: path.to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue encoded bytes for the wire
    pub async fn write(&self, data: Bytes) -> Result<(), PpposError> {
        self.write_tx
            .send(WriteCommand::Send(data))
            .await
            .map_err(|_| PpposError::ChannelClosed)
    }

    /// Stop the writer once everything queued has been written
    pub async fn shutdown(mut self) {
        let _ = self.write_tx.send(WriteCommand::Shutdown).await;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                tracing::error!("{}: writer task failed: {}", self.path, e);
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.writer.is_some() {
            let _ = self.write_tx.try_send(WriteCommand::Shutdown);
        }
    }
}

async fn writer_task<W: Write>(mut port: W, mut rx: mpsc::Receiver<WriteCommand>) {
    while let Some(WriteCommand::Send(data)) = rx.recv().await {
        tracing::trace!("Writing {} bytes: {:02X?}", data.len(), &data[..]);
        if let Err(e) = port.write_all(&data).and_then(|()| port.flush()) {
            tracing::error!("Serial write error: {}", e);
        }
    }
    tracing::debug!("Writer task stopped");
}

/// How long to wait before reading again, `None` if the error is fatal
fn retry_after(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::Interrupted => Some(Duration::ZERO),
        ErrorKind::WouldBlock => Some(WOULD_BLOCK_DELAY),
        _ if err.raw_os_error() == Some(libc::EAGAIN) => Some(WOULD_BLOCK_DELAY),
        _ => None,
    }
}

/// Blocking reads, marshalled onto the context owning the session
fn reader_thread<R: Read>(mut port: R, input: &InputSender, buffer_len: usize) {
    let session = input.session();
    tracing::debug!("{}: reader thread started", session);
    let mut buffer = vec![0u8; buffer_len];

    loop {
        let n = match port.read(&mut buffer) {
            Ok(0) => {
                tracing::warn!("{}: serial device closed", session);
                break;
            }
            Ok(n) => n,
            Err(e) => match retry_after(&e) {
                Some(delay) => {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    continue;
                }
                None => {
                    tracing::error!("{}: serial read error: {}", session, e);
                    break;
                }
            },
        };

        tracing::trace!("{}: read {} bytes", session, n);
        if input.input_blocking(&buffer[..n]).is_err() {
            tracing::debug!("{}: bridge gone, reader thread stopping", session);
            return;
        }
    }

    // the link is gone with the device
    if input.close_blocking().is_err() {
        tracing::debug!("{}: bridge gone before close", session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Dispatcher;
    use crate::frame::{protocols, PppFrame};
    use crate::session::{DeviceHandle, PpposSession};
    use crate::types::SessionId;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Writer keeping everything written in memory
    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn open_session(id: u32) -> PpposSession {
        let mut session = PpposSession::create(
            SessionId(id),
            DeviceHandle::new("/dev/null"),
            LinkConfig::default(),
            Box::new(|_, _| {}),
        );
        session.open();
        session
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(
            retry_after(&io::Error::from(ErrorKind::TimedOut)),
            Some(Duration::ZERO)
        );
        assert_eq!(
            retry_after(&io::Error::from(ErrorKind::WouldBlock)),
            Some(WOULD_BLOCK_DELAY)
        );
        assert_eq!(retry_after(&io::Error::from(ErrorKind::BrokenPipe)), None);
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let mut peer = open_session(9);
        let sent = vec![
            PppFrame::new(protocols::LCP, vec![0x09, 0x01, 0x00, 0x08, 0, 0, 0, 0]),
            PppFrame::new(protocols::IP, vec![0x45, 0x7E, 0x7D, 0x00]),
        ];
        let incoming: Vec<u8> = sent
            .iter()
            .flat_map(|f| peer.send(f).unwrap().to_vec())
            .collect();

        let config = LinkConfig {
            read_buffer: 3,
            ..LinkConfig::default()
        };
        let mut dispatcher = Dispatcher::new(config.channel_capacity);
        let input = dispatcher.insert(open_session(1));
        let wire = Wire::default();
        let transport =
            SerialTransport::start("loopback", Cursor::new(incoming), wire.clone(), &config, input);
        assert_eq!(transport.path(), "loopback");

        // the reader closes the session once the device runs dry
        let mut received = Vec::new();
        dispatcher
            .run(&mut |_: SessionId, frame: PppFrame| received.push(frame))
            .await;
        assert_eq!(received, sent);
        assert!(dispatcher.all_closed());

        let reply = peer.send(&sent[0]).unwrap();
        transport.write(reply.clone()).await.unwrap();
        transport.write(Bytes::from_static(&[0x7E])).await.unwrap();
        transport.shutdown().await;

        let mut expected = reply.to_vec();
        expected.push(0x7E);
        assert_eq!(*wire.0.lock().unwrap(), expected);
    }
}
