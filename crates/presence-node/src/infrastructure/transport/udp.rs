//! UDP datagram socket with a background receive thread.
//!
//! The node binds one UDP socket on all interfaces at the configured port.
//! Discovery broadcasts, handshakes and data all share it.
//!
//! # How the receive thread works (for beginners)
//!
//! `recv_from` on a standard UDP socket blocks until a datagram arrives.  The
//! session's tick must never block, so a cloned handle of the socket is moved
//! onto a dedicated thread that does nothing but receive:
//!
//! 1. The thread calls `recv_from` with a 500 ms read timeout.
//! 2. Each datagram is pushed into a bounded channel.
//! 3. On each timeout the thread checks the `running` flag and exits once it
//!    is cleared (which happens when the socket is dropped).
//!
//! The tick thread drains the channel with `try_recv`, which never blocks.
//!
//! # Local address
//!
//! A socket bound to `0.0.0.0` does not know which interface address peers
//! will see.  [`probe_local_ip`] asks the OS by "connecting" a throwaway UDP
//! socket to a public address (no packet is sent) and reading back the
//! address the OS picked for the route.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::transport::TransportError;
use crate::infrastructure::transport::{DatagramSocket, MAX_DATAGRAM_SIZE};

/// Datagrams buffered between the receive thread and the tick thread.
const INBOUND_CAPACITY: usize = 256;

/// Address used only to select the outbound interface; nothing is sent to it.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:65530";

/// A UDP socket bound on all interfaces.
pub struct UdpDatagramSocket {
    socket: UdpSocket,
    port: u16,
    local_ip: IpAddr,
    inbound: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    running: Arc<AtomicBool>,
}

impl UdpDatagramSocket {
    /// Binds `0.0.0.0:port` with broadcast enabled and starts the receive
    /// thread.  Port `0` lets the OS choose.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the socket cannot be bound or
    /// configured, or [`TransportError::ReceiverThread`] if the thread cannot
    /// be spawned.
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let bind_failed = |source| TransportError::BindFailed { addr, source };

        let socket = UdpSocket::bind(addr).map_err(bind_failed)?;
        socket.set_broadcast(true).map_err(bind_failed)?;
        let bound = socket.local_addr().map_err(bind_failed)?;

        let receiver = socket.try_clone().map_err(bind_failed)?;
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .map_err(bind_failed)?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let thread_running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("presence-recv".to_string())
            .spawn(move || receive_loop(receiver, tx, thread_running))
            .map_err(TransportError::ReceiverThread)?;

        let local_ip = probe_local_ip().unwrap_or_else(|e| {
            warn!("could not determine local address, self-filtering uses {}: {e}", bound.ip());
            bound.ip()
        });
        info!("listening on UDP {bound} (local address {local_ip})");

        Ok(Self {
            socket,
            port: bound.port(),
            local_ip,
            inbound: rx,
            running,
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(bytes, to).map(|_| ())
    }

    fn try_recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.inbound.try_recv().ok()
    }

    fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.port)
    }

    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }
}

impl Drop for UdpDatagramSocket {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// The receive loop executed on the `presence-recv` thread.
fn receive_loop(socket: UdpSocket, tx: mpsc::Sender<(Vec<u8>, SocketAddr)>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                // Windows reports ICMP port-unreachable as a recv error; keep going.
                error!("UDP recv error: {e}");
                continue;
            }
        };

        if tx.blocking_send((buf[..len].to_vec(), src)).is_err() {
            // Receiver dropped: the socket is gone.
            break;
        }
    }

    debug!("UDP receive thread stopped");
}

/// Returns the address of the interface the OS would route LAN traffic from.
///
/// # Errors
///
/// Returns the I/O error if no route is available (e.g. no network).
pub fn probe_local_ip() -> io::Result<IpAddr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(ROUTE_PROBE_ADDR)?;
    Ok(probe.local_addr()?.ip())
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_is_timeout_error_recognises_timed_out() {
        // Arrange
        let e = io::Error::new(io::ErrorKind::TimedOut, "timed out");

        // Act / Assert
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        let e = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout_error(&e));
    }

    #[test]
    fn test_bind_on_port_zero_picks_a_port() {
        // Arrange / Act
        let socket = UdpDatagramSocket::bind(0).expect("bind");

        // Assert
        let port = socket.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(socket.broadcast_addr(), SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port));
    }

    #[test]
    fn test_loopback_datagram_is_received_by_background_thread() {
        // Arrange
        let mut receiver = UdpDatagramSocket::bind(0).expect("bind receiver");
        let sender = UdpDatagramSocket::bind(0).expect("bind sender");
        let port = receiver.local_addr().unwrap().port();
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

        // Act
        sender.send_to(b"hello", target).expect("send");

        // Assert: poll for up to two seconds; the receive thread hands it over.
        let deadline = Instant::now() + Duration::from_secs(2);
        let received = loop {
            if let Some(datagram) = receiver.try_recv() {
                break Some(datagram);
            }
            if Instant::now() >= deadline {
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        let (bytes, _) = received.expect("datagram must arrive over loopback");
        assert_eq!(bytes, b"hello");
    }
}
