//! pppos-monitor - log PPP frames arriving on a serial line

use pppos::{
    protocols, Accm, DeviceHandle, Dispatcher, LinkConfig, PppFrame, PpposSession, ProtocolLayer,
    SerialTransport, SessionId,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bytes of payload shown per frame
const DUMP_LEN: usize = 32;

const DEFAULT_STATS_SECS: u64 = 30;

/// Logs every frame handed up by the decoder
#[derive(Default)]
struct FrameLogger {
    frames: u64,
}

impl ProtocolLayer for FrameLogger {
    fn deliver(&mut self, session: SessionId, frame: PppFrame) {
        self.frames += 1;
        let shown = frame.payload.len().min(DUMP_LEN);
        tracing::info!(
            "{}: {} ({:#06x}) len={} data={:02X?}{}",
            session,
            protocol_name(frame.protocol),
            frame.protocol,
            frame.payload.len(),
            &frame.payload[..shown],
            if shown < frame.payload.len() { " ..." } else { "" }
        );
    }
}

fn protocol_name(protocol: u16) -> &'static str {
    match protocol {
        protocols::IP => "IP",
        protocols::VJC_COMP => "VJ-COMP",
        protocols::VJC_UNCOMP => "VJ-UNCOMP",
        protocols::IPV6 => "IPv6",
        protocols::IPCP => "IPCP",
        protocols::LCP => "LCP",
        protocols::PAP => "PAP",
        protocols::CHAP => "CHAP",
        _ => "unknown",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pppos_monitor=debug,pppos=debug,info".into()),
        )
        .init();

    tracing::info!("Starting PPP-over-serial monitor");

    // Get serial port from env or use default
    let port = std::env::var("PPPOS_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());

    let config = match std::env::var("PPPOS_CONFIG") {
        Ok(path) => LinkConfig::load(&PathBuf::from(path)).await,
        Err(_) => LinkConfig::default(),
    };
    tracing::debug!("Link configuration: {}", serde_json::to_string(&config)?);

    let mut session = PpposSession::create(
        SessionId(0),
        DeviceHandle::new(&port),
        config.clone(),
        Box::new(|id, status| tracing::info!("{}: link status {:?}", id, status)),
    );
    // a passive monitor accepts whatever field compression the peers use
    session.configure_recv(Accm::empty(), true, true);
    session.open();

    let mut dispatcher = Dispatcher::new(config.channel_capacity);
    let input = dispatcher.insert(session);
    let transport = SerialTransport::open(&port, &config, input.clone())?;

    let mut ticker = tokio::time::interval(stats_interval(
        std::env::var("PPPOS_STATS_SECS").ok().as_deref(),
    ));
    ticker.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut logger = FrameLogger::default();

    loop {
        tokio::select! {
            msg = dispatcher.recv() => {
                let Some(msg) = msg else { break };
                if !dispatcher.dispatch(msg, &mut logger) || dispatcher.all_closed() {
                    break;
                }
            }
            _ = ticker.tick() => log_stats(&dispatcher, input.session())?,
            result = &mut ctrl_c => {
                result?;
                tracing::info!("Shutting down");
                if let Some(session) = dispatcher.session_mut(input.session()) {
                    session.close();
                }
                break;
            }
        }
    }

    transport.shutdown().await;

    tracing::info!("Delivered {} frames", logger.frames);
    log_stats(&dispatcher, input.session())?;

    Ok(())
}

/// Interval between statistics lines, in whole seconds (at least one)
fn stats_interval(secs: Option<&str>) -> Duration {
    let secs = secs
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_STATS_SECS);
    Duration::from_secs(secs.max(1))
}

fn log_stats(dispatcher: &Dispatcher, id: SessionId) -> anyhow::Result<()> {
    if let Some(session) = dispatcher.session(id) {
        tracing::info!("{}: {}", id, serde_json::to_string(&session.stats())?);
    }
    Ok(())
}
