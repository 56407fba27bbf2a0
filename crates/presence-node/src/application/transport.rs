//! The transport seam: how the application layer talks to the network.
//!
//! The application never touches sockets.  It drives a [`Transport`] once per
//! tick: [`Transport::poll`] returns every event that happened since the last
//! call, and the send methods are fire-and-forget.  Because all events come
//! out of one non-blocking call on the tick thread, nothing in the
//! application layer ever needs a lock.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use presence_core::protocol::DeliveryMethod;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identity of one connection, stable for the connection's lifetime.
pub type ConnectionId = Uuid;

/// Lifecycle state of a live connection.  A closed connection has no state;
/// it simply disappears from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake sent, waiting for the remote side to accept.
    Pending,
    /// Handshake complete; data flows in both directions.
    Connected,
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The handshake was rejected or never answered.
    ConnectionFailed,
    /// Nothing was heard from the remote side for too long.
    Timeout,
    /// The remote side said goodbye.
    RemoteClose,
    /// This node closed the connection.
    LocalClose,
    /// The remote endpoint started a new session on the same address.
    Superseded,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::ConnectionFailed => "connection failed",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::RemoteClose => "closed by remote peer",
            DisconnectReason::LocalClose => "closed locally",
            DisconnectReason::Superseded => "replaced by a new session",
        };
        f.write_str(text)
    }
}

/// Everything a transport can report from [`Transport::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An unconnected node is looking for peers.
    DiscoveryRequest { from: SocketAddr, token: String },
    /// A node answered our discovery request.
    DiscoveryResponse { from: SocketAddr, token: String },
    /// An unknown endpoint, or a known one that restarted, wants to
    /// connect.  Answer with [`Transport::accept`] or [`Transport::reject`].
    ConnectionRequest { from: SocketAddr, token: String },
    /// A connection finished its handshake.
    Connected { id: ConnectionId, endpoint: SocketAddr },
    /// A pending or connected connection closed.
    Disconnected {
        id: ConnectionId,
        endpoint: SocketAddr,
        reason: DisconnectReason,
    },
    /// An application payload arrived on a connection.
    Received {
        id: ConnectionId,
        payload: Vec<u8>,
        delivery: DeliveryMethod,
    },
}

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be bound or configured.
    #[error("failed to bind transport socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// A datagram could not be sent.
    #[error("send failed: {0}")]
    Send(#[from] std::io::Error),
    /// The background receive thread could not be started.
    #[error("failed to start receive thread: {0}")]
    ReceiverThread(#[source] std::io::Error),
}

/// A connection-oriented transport over datagrams.
pub trait Transport {
    /// Drains every pending inbound datagram, runs connection timers, and
    /// returns the resulting events.  Never blocks.
    fn poll(&mut self, now: Instant) -> Vec<TransportEvent>;

    /// Broadcasts a discovery request on the transport's port.
    fn send_discovery_request(&mut self, token: &str) -> Result<(), TransportError>;

    /// Answers a discovery request from `to`.
    fn send_discovery_response(&mut self, to: SocketAddr, token: &str) -> Result<(), TransportError>;

    /// Starts a handshake with `to`.  Idempotent: returns the id of the
    /// existing connection if one is already pending or connected.
    fn connect(&mut self, to: SocketAddr, token: &str) -> Result<ConnectionId, TransportError>;

    /// Accepts a connection request from `from`.
    fn accept(&mut self, from: SocketAddr) -> Result<ConnectionId, TransportError>;

    /// Refuses a connection request from `from`.
    fn reject(&mut self, from: SocketAddr) -> Result<(), TransportError>;

    /// Sends `payload` to every connected peer and returns how many peers it
    /// was queued to.
    fn send_to_all(&mut self, payload: &[u8], delivery: DeliveryMethod) -> usize;

    /// State of the connection to `endpoint`, if there is one.
    fn state_of(&self, endpoint: SocketAddr) -> Option<ConnectionState>;

    fn connected_count(&self) -> usize;

    /// Closes every connection.  The matching `Disconnected` events come out
    /// of the next [`Transport::poll`].
    fn disconnect_all(&mut self);

    /// Address other nodes see this node's datagrams coming from.
    fn local_ip(&self) -> IpAddr;
}
