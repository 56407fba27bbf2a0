//! Datagram transports.
//!
//! [`PeerTransport`] holds all connection logic (handshake, keep-alive,
//! reliable channel) and is generic over the [`DatagramSocket`] it sends
//! through:
//!
//! - [`UdpTransport`] – a real UDP socket bound on all interfaces.
//! - [`MemoryTransport`] – a socket on a [`memory::MemoryNetwork`], for tests.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub mod connection;
pub mod memory;
pub mod udp;

pub use connection::PeerTransport;
pub use memory::{MemoryNetwork, MemorySocket};
pub use udp::UdpDatagramSocket;

/// A [`PeerTransport`] over UDP.
pub type UdpTransport = PeerTransport<UdpDatagramSocket>;

/// A [`PeerTransport`] over an in-memory network.
pub type MemoryTransport = PeerTransport<MemorySocket>;

/// Largest datagram a transport will send or receive.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// The raw, connectionless socket underneath a [`PeerTransport`].
pub trait DatagramSocket {
    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()>;

    /// Returns the next received datagram, if any.  Never blocks.
    fn try_recv(&mut self) -> Option<(Vec<u8>, SocketAddr)>;

    /// Where discovery requests are broadcast.
    fn broadcast_addr(&self) -> SocketAddr;

    /// Address other nodes see this socket's datagrams coming from.
    fn local_ip(&self) -> IpAddr;
}

/// Connection timing.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How often a pending connection re-sends its request.
    pub connect_retry_interval: Duration,
    /// How long a pending connection waits for an answer.
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Silence after which a connected peer is dropped.
    pub disconnect_timeout: Duration,
    /// How often unacknowledged reliable frames are re-sent.
    pub resend_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_retry_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            disconnect_timeout: Duration::from_secs(5),
            resend_interval: Duration::from_millis(100),
        }
    }
}
