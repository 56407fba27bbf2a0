//! ConnectionManager: LAN discovery and peer connection lifecycle.
//!
//! # Discovery and connection flow (for beginners)
//!
//! ```text
//! Node A                                   Node B
//! ──────                                   ──────
//! broadcast DiscoveryRequest(token) ──►    token ok, not from self
//!                                   ◄──    DiscoveryResponse(token)
//! token ok → connect(B, token)      ──►    ConnectionRequest(token)
//!                                   ◄──    token ok → accept
//! Connected { id, B }                      Connected { id', A }
//! ```
//!
//! Both nodes broadcast, so both usually end up calling `connect` on each
//! other at about the same moment.  The transport folds that into a single
//! connection per endpoint, so each side still sees exactly one `Connected`.
//!
//! # States
//!
//! - **Unconnected** – no peers.  A discovery request is broadcast every
//!   `discovery_interval` (2 s by default).  The interval restarts only after
//!   a *successful* send; a failed send is logged and retried on the next
//!   tick.
//! - **Connecting** – a handshake is in flight and no peer is connected yet.
//!   Discovery keeps running.
//! - **Connected** – at least one peer.  The sync loop stops calling
//!   [`ConnectionManager::progress_discovery`].  When the last peer leaves
//!   the manager falls back to Unconnected and resets the handshake token.
//!
//! Datagrams from this node's own address are ignored, so a node can never
//! connect to itself through its own broadcast.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::application::transport::{
    ConnectionId, ConnectionState, DisconnectReason, Transport, TransportEvent,
};

/// Interval between discovery broadcasts while unconnected.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);

/// Shared discovery and handshake token.
pub const DEFAULT_DISCOVERY_TOKEN: &str = "DISCOVERY";

/// Node-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected,
    Connecting,
    Connected,
}

/// What a transport event means for the peer registry.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Register a record for this connection.
    Joined { id: ConnectionId, endpoint: SocketAddr },
    /// Tear down the record for this connection.
    Left {
        id: ConnectionId,
        endpoint: SocketAddr,
        reason: DisconnectReason,
    },
    /// Route this application payload.
    Payload { id: ConnectionId, payload: Vec<u8> },
}

/// Drives discovery and reacts to connection events.
pub struct ConnectionManager {
    discovery_token: String,
    handshake_token: String,
    discovery_interval: Duration,
    last_discovery: Option<Instant>,
    discovery_failures: u64,
    /// Outgoing handshakes not yet resolved.
    connecting: HashMap<ConnectionId, SocketAddr>,
    local_ip: IpAddr,
}

impl ConnectionManager {
    /// Creates a manager that validates discovery and handshakes against
    /// `discovery_token` and ignores datagrams from `local_ip`.
    pub fn new(discovery_token: impl Into<String>, discovery_interval: Duration, local_ip: IpAddr) -> Self {
        let discovery_token = discovery_token.into();
        Self {
            handshake_token: discovery_token.clone(),
            discovery_token,
            discovery_interval,
            last_discovery: None,
            discovery_failures: 0,
            connecting: HashMap::new(),
            local_ip,
        }
    }

    /// Current state, given how many peers the transport has connected.
    pub fn link_state(&self, connected_peers: usize) -> LinkState {
        if connected_peers > 0 {
            LinkState::Connected
        } else if !self.connecting.is_empty() {
            LinkState::Connecting
        } else {
            LinkState::Unconnected
        }
    }

    /// Token carried by outgoing connection requests and required on
    /// incoming ones.
    pub fn handshake_token(&self) -> &str {
        &self.handshake_token
    }

    /// Number of discovery broadcasts that failed to send.
    pub fn discovery_failures(&self) -> u64 {
        self.discovery_failures
    }

    /// Broadcasts a discovery request if the interval has elapsed.
    ///
    /// Returns `true` if a request was sent.  The first call always sends.
    pub fn progress_discovery(&mut self, transport: &mut dyn Transport, now: Instant) -> bool {
        if let Some(last) = self.last_discovery {
            if now.saturating_duration_since(last) < self.discovery_interval {
                return false;
            }
        }

        match transport.send_discovery_request(&self.discovery_token) {
            Ok(()) => {
                self.last_discovery = Some(now);
                debug!("discovery request broadcast");
                true
            }
            Err(e) => {
                self.discovery_failures += 1;
                warn!("discovery request failed: {e}");
                false
            }
        }
    }

    /// Handles one transport event, answering discovery and handshakes on
    /// `transport` as needed.
    ///
    /// Returns the registry-level consequence, if any.
    pub fn handle_event(&mut self, event: TransportEvent, transport: &mut dyn Transport) -> Option<PeerEvent> {
        match event {
            TransportEvent::DiscoveryRequest { from, token } => {
                if self.accepts_unconnected(from, &token, "discovery request") {
                    if let Err(e) = transport.send_discovery_response(from, &self.discovery_token) {
                        warn!("failed to answer discovery request from {from}: {e}");
                    }
                }
                None
            }
            TransportEvent::DiscoveryResponse { from, token } => {
                if !self.accepts_unconnected(from, &token, "discovery response") {
                    return None;
                }
                if transport.state_of(from) == Some(ConnectionState::Connected) {
                    debug!("already connected to {from}; ignoring discovery response");
                    return None;
                }
                match transport.connect(from, &self.handshake_token) {
                    Ok(id) => {
                        if self.connecting.insert(id, from).is_none() {
                            info!("connecting to {from}");
                        }
                    }
                    Err(e) => warn!("failed to connect to {from}: {e}"),
                }
                None
            }
            TransportEvent::ConnectionRequest { from, token } => {
                if from.ip() == self.local_ip {
                    debug!("ignoring connection request from own address {from}");
                    return None;
                }
                if token == self.handshake_token {
                    if let Err(e) = transport.accept(from) {
                        warn!("failed to accept connection from {from}: {e}");
                    }
                } else {
                    warn!("rejecting connection request from {from}: token mismatch");
                    if let Err(e) = transport.reject(from) {
                        warn!("failed to reject connection from {from}: {e}");
                    }
                }
                None
            }
            TransportEvent::Connected { id, endpoint } => {
                self.connecting.remove(&id);
                info!("peer connected: {endpoint} ({id})");
                Some(PeerEvent::Joined { id, endpoint })
            }
            TransportEvent::Disconnected { id, endpoint, reason } => {
                let never_joined = self.connecting.remove(&id).is_some();
                if transport.connected_count() == 0 {
                    self.handshake_token = self.discovery_token.clone();
                    debug!("no peers left; handshake token reset");
                }
                if never_joined {
                    info!("connection to {endpoint} failed: {reason}");
                    return None;
                }
                info!("peer disconnected: {endpoint} ({reason})");
                Some(PeerEvent::Left { id, endpoint, reason })
            }
            TransportEvent::Received { id, payload, .. } => Some(PeerEvent::Payload { id, payload }),
        }
    }

    /// Self-filter and token check for unconnected datagrams.
    fn accepts_unconnected(&self, from: SocketAddr, token: &str, what: &str) -> bool {
        if from.ip() == self.local_ip {
            debug!("ignoring {what} from own address {from}");
            return false;
        }
        if token != self.discovery_token {
            debug!("ignoring {what} from {from}: token mismatch");
            return false;
        }
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::TransportError;
    use presence_core::protocol::DeliveryMethod;
    use uuid::Uuid;

    // ── Scripted transport ────────────────────────────────────────────────────

    #[derive(Default)]
    struct ScriptedTransport {
        discovery_requests: usize,
        responses: Vec<SocketAddr>,
        connects: Vec<(SocketAddr, String)>,
        accepts: Vec<SocketAddr>,
        rejects: Vec<SocketAddr>,
        states: HashMap<SocketAddr, ConnectionState>,
        ids: HashMap<SocketAddr, ConnectionId>,
        connected: usize,
        fail_discovery: bool,
    }

    impl Transport for ScriptedTransport {
        fn poll(&mut self, _now: Instant) -> Vec<TransportEvent> {
            Vec::new()
        }
        fn send_discovery_request(&mut self, _token: &str) -> Result<(), TransportError> {
            if self.fail_discovery {
                return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into());
            }
            self.discovery_requests += 1;
            Ok(())
        }
        fn send_discovery_response(&mut self, to: SocketAddr, _token: &str) -> Result<(), TransportError> {
            self.responses.push(to);
            Ok(())
        }
        fn connect(&mut self, to: SocketAddr, token: &str) -> Result<ConnectionId, TransportError> {
            self.connects.push((to, token.to_string()));
            Ok(*self.ids.entry(to).or_insert_with(Uuid::new_v4))
        }
        fn accept(&mut self, from: SocketAddr) -> Result<ConnectionId, TransportError> {
            self.accepts.push(from);
            Ok(Uuid::new_v4())
        }
        fn reject(&mut self, from: SocketAddr) -> Result<(), TransportError> {
            self.rejects.push(from);
            Ok(())
        }
        fn send_to_all(&mut self, _payload: &[u8], _delivery: DeliveryMethod) -> usize {
            self.connected
        }
        fn state_of(&self, endpoint: SocketAddr) -> Option<ConnectionState> {
            self.states.get(&endpoint).copied()
        }
        fn connected_count(&self) -> usize {
            self.connected
        }
        fn disconnect_all(&mut self) {}
        fn local_ip(&self) -> IpAddr {
            local_ip()
        }
    }

    fn local_ip() -> IpAddr {
        "192.168.1.10".parse().unwrap()
    }

    fn remote() -> SocketAddr {
        "192.168.1.20:8888".parse().unwrap()
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(DEFAULT_DISCOVERY_TOKEN, DEFAULT_DISCOVERY_INTERVAL, local_ip())
    }

    // ── Discovery timer ───────────────────────────────────────────────────────

    #[test]
    fn test_first_progress_sends_immediately_then_waits_for_interval() {
        // Arrange
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        let t0 = Instant::now();

        // Act / Assert
        assert!(mgr.progress_discovery(&mut transport, t0));
        assert!(!mgr.progress_discovery(&mut transport, t0 + Duration::from_millis(1999)));
        assert!(mgr.progress_discovery(&mut transport, t0 + Duration::from_secs(2)));
        assert_eq!(transport.discovery_requests, 2);
    }

    #[test]
    fn test_failed_discovery_does_not_reset_the_timer() {
        // Arrange
        let mut mgr = manager();
        let mut transport = ScriptedTransport {
            fail_discovery: true,
            ..Default::default()
        };
        let t0 = Instant::now();

        // Act – every attempt fails, so every tick retries
        assert!(!mgr.progress_discovery(&mut transport, t0));
        assert!(!mgr.progress_discovery(&mut transport, t0 + Duration::from_millis(16)));

        // Recovery: the very next tick sends
        transport.fail_discovery = false;
        let sent = mgr.progress_discovery(&mut transport, t0 + Duration::from_millis(32));

        // Assert
        assert!(sent);
        assert_eq!(mgr.discovery_failures(), 2);
    }

    // ── Discovery handling ────────────────────────────────────────────────────

    #[test]
    fn test_discovery_request_is_answered_with_response() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();

        let out = mgr.handle_event(
            TransportEvent::DiscoveryRequest {
                from: remote(),
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );

        assert_eq!(out, None);
        assert_eq!(transport.responses, vec![remote()]);
    }

    #[test]
    fn test_own_discovery_request_is_ignored() {
        // Arrange: our own broadcast looped back to us
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        let own: SocketAddr = SocketAddr::new(local_ip(), 8888);

        // Act
        mgr.handle_event(
            TransportEvent::DiscoveryRequest {
                from: own,
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );
        mgr.handle_event(
            TransportEvent::DiscoveryResponse {
                from: own,
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );

        // Assert
        assert!(transport.responses.is_empty());
        assert!(transport.connects.is_empty());
    }

    #[test]
    fn test_discovery_with_wrong_token_is_ignored() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();

        mgr.handle_event(
            TransportEvent::DiscoveryRequest {
                from: remote(),
                token: "OTHER-ROOM".to_string(),
            },
            &mut transport,
        );

        assert!(transport.responses.is_empty());
    }

    #[test]
    fn test_discovery_response_connects_with_handshake_token() {
        // Arrange
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();

        // Act
        mgr.handle_event(
            TransportEvent::DiscoveryResponse {
                from: remote(),
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );

        // Assert
        assert_eq!(transport.connects, vec![(remote(), DEFAULT_DISCOVERY_TOKEN.to_string())]);
        assert_eq!(mgr.link_state(0), LinkState::Connecting);
    }

    #[test]
    fn test_discovery_response_from_connected_peer_does_not_reconnect() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        transport.states.insert(remote(), ConnectionState::Connected);

        mgr.handle_event(
            TransportEvent::DiscoveryResponse {
                from: remote(),
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );

        assert!(transport.connects.is_empty());
    }

    // ── Handshake handling ────────────────────────────────────────────────────

    #[test]
    fn test_connection_request_with_valid_token_is_accepted() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();

        mgr.handle_event(
            TransportEvent::ConnectionRequest {
                from: remote(),
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );

        assert_eq!(transport.accepts, vec![remote()]);
        assert!(transport.rejects.is_empty());
    }

    #[test]
    fn test_connection_request_with_wrong_token_is_rejected() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();

        mgr.handle_event(
            TransportEvent::ConnectionRequest {
                from: remote(),
                token: "nope".to_string(),
            },
            &mut transport,
        );

        assert!(transport.accepts.is_empty());
        assert_eq!(transport.rejects, vec![remote()]);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn test_connected_then_disconnected_yields_join_and_leave() {
        // Arrange
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        let id = Uuid::new_v4();

        // Act
        let joined = mgr.handle_event(TransportEvent::Connected { id, endpoint: remote() }, &mut transport);
        let left = mgr.handle_event(
            TransportEvent::Disconnected {
                id,
                endpoint: remote(),
                reason: DisconnectReason::Timeout,
            },
            &mut transport,
        );

        // Assert
        assert_eq!(joined, Some(PeerEvent::Joined { id, endpoint: remote() }));
        assert_eq!(
            left,
            Some(PeerEvent::Left {
                id,
                endpoint: remote(),
                reason: DisconnectReason::Timeout
            })
        );
        assert_eq!(mgr.link_state(0), LinkState::Unconnected);
        assert_eq!(mgr.handshake_token(), DEFAULT_DISCOVERY_TOKEN);
    }

    #[test]
    fn test_failed_outgoing_handshake_does_not_yield_leave() {
        // Arrange: a connect that never completes
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        mgr.handle_event(
            TransportEvent::DiscoveryResponse {
                from: remote(),
                token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            },
            &mut transport,
        );
        let id = transport.ids[&remote()];

        // Act
        let out = mgr.handle_event(
            TransportEvent::Disconnected {
                id,
                endpoint: remote(),
                reason: DisconnectReason::ConnectionFailed,
            },
            &mut transport,
        );

        // Assert
        assert_eq!(out, None);
        assert_eq!(mgr.link_state(0), LinkState::Unconnected);
    }

    #[test]
    fn test_received_payload_is_forwarded_for_routing() {
        let mut mgr = manager();
        let mut transport = ScriptedTransport::default();
        let id = Uuid::new_v4();

        let out = mgr.handle_event(
            TransportEvent::Received {
                id,
                payload: vec![2],
                delivery: DeliveryMethod::ReliableOrdered,
            },
            &mut transport,
        );

        assert_eq!(out, Some(PeerEvent::Payload { id, payload: vec![2] }));
    }

    #[test]
    fn test_link_state_is_connected_with_any_peer() {
        let mgr = manager();
        assert_eq!(mgr.link_state(1), LinkState::Connected);
    }
}
