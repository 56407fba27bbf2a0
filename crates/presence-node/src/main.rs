//! Presence node entry point.
//!
//! Wires the UDP transport and the simulated device collaborators into a
//! [`Session`] and ticks it at the configured rate until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- platform config.toml, or defaults
//!  └─ UdpDatagramSocket::bind()     -- UDP receive thread
//!  └─ Session::new()                -- registry, connection manager, anchor
//!  └─ tick loop (tokio interval)    -- Session::tick() until Ctrl-C
//!  └─ Session::shutdown()           -- disconnect everyone, drain registry
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use presence_core::LocalAnchorFrame;
use presence_node::application::collaborators::TracingDiagnostics;
use presence_node::application::sync_loop::{Collaborators, Session, SessionConfig};
use presence_node::infrastructure::config::{load_config, AppConfig};
use presence_node::infrastructure::device::{
    LoggingAudio, LoggingPresenceFactory, NoRotationSensor, SimulatedTracker,
};
use presence_node::infrastructure::transport::{PeerTransport, TransportConfig, UdpDatagramSocket};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config is read before logging so its level can seed the filter.
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }
    info!(
        "presence node starting on UDP {} (token {:?}, {} Hz)",
        config.network.port, config.network.discovery_token, config.node.tick_rate_hz
    );

    // ── Transport ──────────────────────────────────────────────────────────────
    let socket = UdpDatagramSocket::bind(config.network.port)?;
    let transport = PeerTransport::new(socket, TransportConfig::default());

    // ── Session ────────────────────────────────────────────────────────────────
    let collaborators = Collaborators {
        tracker: Arc::new(SimulatedTracker::default()),
        sensor: Arc::new(NoRotationSensor),
        local_audio: Arc::new(LoggingAudio),
        presences: Arc::new(LoggingPresenceFactory),
        diagnostics: Arc::new(TracingDiagnostics),
    };
    let session_config = SessionConfig {
        discovery_token: config.network.discovery_token.clone(),
        ..SessionConfig::default()
    };
    // No compass on a headless node: the scene is aligned to north.
    let anchor = LocalAnchorFrame::from_heading(0.0);
    let mut session = Session::new(session_config, Box::new(transport), anchor, collaborators);

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("presence node ready.  Press Ctrl-C to exit.");

    let mut ticker = tokio::time::interval(config.node.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        session.tick(Instant::now());
    }

    let closed = session.shutdown(Instant::now());
    info!("presence node stopped ({closed} peer(s) disconnected)");
    Ok(())
}
