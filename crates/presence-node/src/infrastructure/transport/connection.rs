//! PeerTransport: the connection table.
//!
//! One entry per remote endpoint.  Each entry moves through:
//!
//! ```text
//!            connect()           ConnectAccept / matching ConnectRequest
//!   (none) ───────────► Pending ─────────────────────────────────────► Connected
//!     │                    │  no answer in connect_timeout,                │
//!     │                    │  or ConnectReject                              │ Disconnect,
//!     │                    ▼                                                │ silence for disconnect_timeout,
//!     │                 (closed: ConnectionFailed)                          │ new remote session,
//!     │   accept()                                                          │ or disconnect_all()
//!     └──────────────────────────────────────────────────────────────► Connected ──► (closed)
//! ```
//!
//! A pending entry is only promoted by the handshake itself.  Data, acks and
//! keep-alive frames from an endpoint we have not heard accept us are
//! dropped; a lost `ConnectAccept` is recovered by the next request retry.
//!
//! # Simultaneous open
//!
//! Two nodes that discover each other at the same moment both call
//! `connect`.  When a `ConnectRequest` arrives from an endpoint we already
//! have a pending connection to, that connection is promoted in place
//! instead of creating a second one.  Each side therefore reports exactly one
//! `Connected` event for the pair.
//!
//! # Restarted peers
//!
//! Every transport draws a random session nonce at construction and sends it
//! in its `ConnectRequest` and `ConnectAccept`.  A request from a connected
//! endpoint is a retransmission only if it carries the session that endpoint
//! announced before.  A different session means the node on that address
//! restarted: the old connection, with its sequence numbers, is closed with
//! [`DisconnectReason::Superseded`] and the request is surfaced to the
//! application like one from an unknown endpoint.
//!
//! # Threading
//!
//! The table is only touched from [`Transport`] methods, which the session
//! calls on its tick thread.  The socket underneath may receive on its own
//! thread; datagrams are queued and drained here in [`Transport::poll`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use presence_core::protocol::{DeliveryMethod, OrderedReceiver, ReliableSender};
use presence_core::{decode_frame, encode_frame, Frame};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::transport::{
    ConnectionId, ConnectionState, DisconnectReason, Transport, TransportError, TransportEvent,
};
use crate::infrastructure::transport::{DatagramSocket, TransportConfig};

#[derive(Debug)]
enum Phase {
    Pending { started: Instant, last_request: Instant },
    Connected,
}

struct Link {
    id: ConnectionId,
    phase: Phase,
    /// Handshake token the connection was requested or accepted with.
    token: String,
    /// Session nonce the remote side announced.  `None` until it has.
    remote_session: Option<u32>,
    last_heard: Instant,
    last_ping: Instant,
    next_ping_id: u16,
    sender: ReliableSender,
    receiver: OrderedReceiver,
}

impl Link {
    fn pending(token: &str, now: Instant) -> Self {
        Self::with_phase(
            Phase::Pending {
                started: now,
                last_request: now,
            },
            token.to_string(),
            None,
            now,
        )
    }

    fn connected(token: String, remote_session: Option<u32>, now: Instant) -> Self {
        Self::with_phase(Phase::Connected, token, remote_session, now)
    }

    fn with_phase(phase: Phase, token: String, remote_session: Option<u32>, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
            token,
            remote_session,
            last_heard: now,
            last_ping: now,
            next_ping_id: 0,
            sender: ReliableSender::new(),
            receiver: OrderedReceiver::new(),
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected)
    }

    /// Moves a pending link to connected.  Returns `true` if it changed.
    fn promote(&mut self, now: Instant) -> bool {
        if self.is_connected() {
            return false;
        }
        self.phase = Phase::Connected;
        self.last_ping = now;
        true
    }

    /// Whether a `ConnectRequest` carrying `token` may join this link.
    ///
    /// A link accepted without an outstanding request has no session yet and
    /// adopts the token of the first request it hears.
    fn admits(&self, token: &str) -> bool {
        self.token == token || (self.is_connected() && self.remote_session.is_none())
    }
}

/// A connection request surfaced to the application and not yet answered.
#[derive(Debug)]
struct Offer {
    token: String,
    session: u32,
}

/// A connection-oriented transport over any [`DatagramSocket`].
pub struct PeerTransport<S: DatagramSocket> {
    socket: S,
    config: TransportConfig,
    /// Nonce announced in this transport's handshakes.
    session: u32,
    links: HashMap<SocketAddr, Link>,
    offers: HashMap<SocketAddr, Offer>,
    events: Vec<TransportEvent>,
    /// Time of the last [`Transport::poll`]; timestamps sends made between polls.
    clock: Instant,
}

impl<S: DatagramSocket> PeerTransport<S> {
    pub fn new(socket: S, config: TransportConfig) -> Self {
        Self {
            socket,
            config,
            session: Uuid::new_v4().as_u128() as u32,
            links: HashMap::new(),
            offers: HashMap::new(),
            events: Vec::new(),
            clock: Instant::now(),
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping malformed frame from {from}: {e}");
                return;
            }
        };

        match frame {
            Frame::DiscoveryRequest { token } => {
                self.events.push(TransportEvent::DiscoveryRequest { from, token });
            }
            Frame::DiscoveryResponse { token } => {
                self.events.push(TransportEvent::DiscoveryResponse { from, token });
            }
            Frame::ConnectRequest { token, session } => self.on_connect_request(from, token, session),
            other => self.on_link_frame(from, other),
        }
    }

    fn on_connect_request(&mut self, from: SocketAddr, token: String, session: u32) {
        let now = self.clock;
        let Some(link) = self.links.get_mut(&from) else {
            self.offer(from, token, session);
            return;
        };

        if link.remote_session.is_some_and(|known| known != session) {
            info!("{from} started a new session; replacing its connection");
            self.close(from, DisconnectReason::Superseded);
            self.offer(from, token, session);
            return;
        }
        if !link.admits(&token) {
            if link.is_connected() {
                warn!("rejecting connection request from {from}: token differs from the established connection");
                if let Err(e) = send_frame(&self.socket, from, &Frame::ConnectReject) {
                    warn!("failed to reject connection request from {from}: {e}");
                }
            } else {
                debug!("ignoring connection request from {from}: token differs from our pending request");
            }
            return;
        }

        link.last_heard = now;
        link.token = token;
        link.remote_session = Some(session);
        if link.promote(now) {
            self.events.push(TransportEvent::Connected { id: link.id, endpoint: from });
        }
        let accept = Frame::ConnectAccept { session: self.session };
        if let Err(e) = send_frame(&self.socket, from, &accept) {
            warn!("failed to acknowledge connection request from {from}: {e}");
        }
    }

    /// Surfaces a connection request and remembers it until it is answered.
    fn offer(&mut self, from: SocketAddr, token: String, session: u32) {
        self.events.push(TransportEvent::ConnectionRequest {
            from,
            token: token.clone(),
        });
        self.offers.insert(from, Offer { token, session });
    }

    fn on_link_frame(&mut self, from: SocketAddr, frame: Frame) {
        let now = self.clock;
        let Some(link) = self.links.get_mut(&from) else {
            debug!("ignoring {:?} frame from unknown endpoint {from}", frame.kind());
            return;
        };

        if !link.is_connected() {
            let close = match frame {
                Frame::ConnectAccept { session } => {
                    link.last_heard = now;
                    link.remote_session = Some(session);
                    if link.promote(now) {
                        self.events.push(TransportEvent::Connected { id: link.id, endpoint: from });
                    }
                    None
                }
                Frame::ConnectReject => Some(DisconnectReason::ConnectionFailed),
                Frame::Disconnect => Some(DisconnectReason::RemoteClose),
                other => {
                    debug!("ignoring {:?} frame from {from}: handshake not accepted yet", other.kind());
                    None
                }
            };
            if let Some(reason) = close {
                self.close(from, reason);
            }
            return;
        }

        link.last_heard = now;
        match frame {
            Frame::Disconnect => self.close(from, DisconnectReason::RemoteClose),
            Frame::Unreliable { payload } => {
                self.events.push(TransportEvent::Received {
                    id: link.id,
                    payload,
                    delivery: DeliveryMethod::Unreliable,
                });
            }
            Frame::Reliable { sequence, payload } => match link.receiver.receive(sequence, payload) {
                Some(released) => {
                    if let Err(e) = send_frame(&self.socket, from, &Frame::Ack { sequence }) {
                        warn!("failed to acknowledge reliable frame to {from}: {e}");
                    }
                    for payload in released {
                        self.events.push(TransportEvent::Received {
                            id: link.id,
                            payload,
                            delivery: DeliveryMethod::ReliableOrdered,
                        });
                    }
                }
                None => debug!(
                    "reliable frame {} from {from} is outside the receive window",
                    sequence.0
                ),
            },
            Frame::Ack { sequence } => {
                link.sender.acknowledge(sequence);
            }
            Frame::Ping { id } => {
                if let Err(e) = send_frame(&self.socket, from, &Frame::Pong { id }) {
                    warn!("failed to answer ping from {from}: {e}");
                }
            }
            Frame::ConnectAccept { session } => {
                if *link.remote_session.get_or_insert(session) != session {
                    debug!("ignoring accept from {from} for another session");
                }
            }
            Frame::ConnectReject => debug!("ignoring reject from {from}: already connected"),
            Frame::Pong { .. } => {}
            Frame::DiscoveryRequest { .. } | Frame::DiscoveryResponse { .. } | Frame::ConnectRequest { .. } => {}
        }
    }

    /// Runs handshake retries, keep-alive, liveness and reliable resends.
    fn service_links(&mut self, now: Instant) {
        let mut expired = Vec::new();

        for (endpoint, link) in self.links.iter_mut() {
            if let Phase::Pending { started, last_request } = &mut link.phase {
                if now.saturating_duration_since(*started) >= self.config.connect_timeout {
                    expired.push((*endpoint, DisconnectReason::ConnectionFailed));
                } else if now.saturating_duration_since(*last_request) >= self.config.connect_retry_interval {
                    let request = Frame::ConnectRequest {
                        token: link.token.clone(),
                        session: self.session,
                    };
                    if let Err(e) = send_frame(&self.socket, *endpoint, &request) {
                        warn!("failed to resend connection request to {endpoint}: {e}");
                    }
                    *last_request = now;
                }
                continue;
            }

            if now.saturating_duration_since(link.last_heard) >= self.config.disconnect_timeout {
                expired.push((*endpoint, DisconnectReason::Timeout));
                continue;
            }
            if now.saturating_duration_since(link.last_ping) >= self.config.ping_interval {
                let ping = Frame::Ping { id: link.next_ping_id };
                link.next_ping_id = link.next_ping_id.wrapping_add(1);
                link.last_ping = now;
                if let Err(e) = send_frame(&self.socket, *endpoint, &ping) {
                    debug!("failed to ping {endpoint}: {e}");
                }
            }
            flush_reliable(&self.socket, *endpoint, link, now, &self.config);
        }

        for (endpoint, reason) in expired {
            self.close(endpoint, reason);
        }
    }

    fn close(&mut self, endpoint: SocketAddr, reason: DisconnectReason) {
        if let Some(link) = self.links.remove(&endpoint) {
            info!("connection to {endpoint} closed: {reason}");
            self.events.push(TransportEvent::Disconnected {
                id: link.id,
                endpoint,
                reason,
            });
        }
    }
}

impl<S: DatagramSocket> Transport for PeerTransport<S> {
    fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        self.clock = now;
        while let Some((bytes, from)) = self.socket.try_recv() {
            self.handle_datagram(&bytes, from);
        }
        self.service_links(now);
        std::mem::take(&mut self.events)
    }

    fn send_discovery_request(&mut self, token: &str) -> Result<(), TransportError> {
        let frame = Frame::DiscoveryRequest {
            token: token.to_string(),
        };
        send_frame(&self.socket, self.socket.broadcast_addr(), &frame)?;
        Ok(())
    }

    fn send_discovery_response(&mut self, to: SocketAddr, token: &str) -> Result<(), TransportError> {
        let frame = Frame::DiscoveryResponse {
            token: token.to_string(),
        };
        send_frame(&self.socket, to, &frame)?;
        Ok(())
    }

    fn connect(&mut self, to: SocketAddr, token: &str) -> Result<ConnectionId, TransportError> {
        if let Some(link) = self.links.get(&to) {
            return Ok(link.id);
        }
        let request = Frame::ConnectRequest {
            token: token.to_string(),
            session: self.session,
        };
        send_frame(&self.socket, to, &request)?;
        let link = Link::pending(token, self.clock);
        let id = link.id;
        self.links.insert(to, link);
        debug!("connection request sent to {to}");
        Ok(id)
    }

    fn accept(&mut self, from: SocketAddr) -> Result<ConnectionId, TransportError> {
        let now = self.clock;
        let offer = self.offers.remove(&from);
        send_frame(&self.socket, from, &Frame::ConnectAccept { session: self.session })?;
        let (id, newly_connected) = match self.links.get_mut(&from) {
            Some(link) => {
                if let Some(offer) = offer {
                    link.token = offer.token;
                    link.remote_session = Some(offer.session);
                }
                (link.id, link.promote(now))
            }
            None => {
                let link = match offer {
                    Some(offer) => Link::connected(offer.token, Some(offer.session), now),
                    None => Link::connected(String::new(), None, now),
                };
                let id = link.id;
                self.links.insert(from, link);
                (id, true)
            }
        };
        if newly_connected {
            self.events.push(TransportEvent::Connected { id, endpoint: from });
        }
        Ok(id)
    }

    fn reject(&mut self, from: SocketAddr) -> Result<(), TransportError> {
        self.offers.remove(&from);
        send_frame(&self.socket, from, &Frame::ConnectReject)?;
        Ok(())
    }

    fn send_to_all(&mut self, payload: &[u8], delivery: DeliveryMethod) -> usize {
        let mut queued = 0;
        for (endpoint, link) in self.links.iter_mut().filter(|(_, l)| l.is_connected()) {
            match delivery {
                DeliveryMethod::Unreliable => {
                    let frame = Frame::Unreliable {
                        payload: payload.to_vec(),
                    };
                    match send_frame(&self.socket, *endpoint, &frame) {
                        Ok(()) => queued += 1,
                        Err(e) => debug!("unreliable send to {endpoint} failed: {e}"),
                    }
                }
                DeliveryMethod::ReliableOrdered => {
                    link.sender.push(payload.to_vec());
                    flush_reliable(&self.socket, *endpoint, link, self.clock, &self.config);
                    queued += 1;
                }
            }
        }
        queued
    }

    fn state_of(&self, endpoint: SocketAddr) -> Option<ConnectionState> {
        self.links.get(&endpoint).map(|link| match link.phase {
            Phase::Pending { .. } => ConnectionState::Pending,
            Phase::Connected => ConnectionState::Connected,
        })
    }

    fn connected_count(&self) -> usize {
        self.links.values().filter(|l| l.is_connected()).count()
    }

    fn disconnect_all(&mut self) {
        self.offers.clear();
        let endpoints: Vec<SocketAddr> = self.links.keys().copied().collect();
        for endpoint in endpoints {
            if let Err(e) = send_frame(&self.socket, endpoint, &Frame::Disconnect) {
                debug!("failed to send disconnect to {endpoint}: {e}");
            }
            self.close(endpoint, DisconnectReason::LocalClose);
        }
    }

    fn local_ip(&self) -> IpAddr {
        self.socket.local_ip()
    }
}

/// Sends every reliable frame on `link` that is due at `now`.
fn flush_reliable<S: DatagramSocket>(
    socket: &S,
    endpoint: SocketAddr,
    link: &mut Link,
    now: Instant,
    config: &TransportConfig,
) {
    for (sequence, payload) in link.sender.due(now, config.resend_interval) {
        let frame = Frame::Reliable { sequence, payload };
        if let Err(e) = send_frame(socket, endpoint, &frame) {
            debug!("reliable send to {endpoint} failed, will retry: {e}");
        }
    }
}

fn send_frame<S: DatagramSocket>(socket: &S, to: SocketAddr, frame: &Frame) -> std::io::Result<()> {
    socket.send_to(&encode_frame(frame), to)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
