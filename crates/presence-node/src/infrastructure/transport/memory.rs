//! In-memory datagram network for multi-node tests.
//!
//! Every [`MemorySocket`] bound on a [`MemoryNetwork`] gets an inbound queue
//! keyed by its address.  Sends append to the destination's queue; a send to
//! the broadcast address `255.255.255.255:port` is copied to every socket on
//! that port, the sender included, as a real LAN broadcast would be.
//!
//! The network can also misbehave on request: drop the next N datagrams,
//! reverse a queue to simulate reordering, or fail every send.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::infrastructure::transport::DatagramSocket;

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Default)]
struct Hub {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    drop_next: usize,
    fail_sends: bool,
}

impl Hub {
    fn deliver(&mut self, bytes: &[u8], from: SocketAddr, to: SocketAddr) {
        if self.drop_next > 0 {
            self.drop_next -= 1;
            trace!("memory network dropped datagram {from} -> {to}");
            return;
        }
        match self.queues.get_mut(&to) {
            Some(queue) => queue.push_back((bytes.to_vec(), from)),
            None => trace!("memory network: nothing bound at {to}"),
        }
    }
}

/// Shared handle to an in-memory network.  Clones refer to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a socket at `addr`.  Rebinding an address replaces its queue.
    pub fn bind(&self, addr: SocketAddr) -> MemorySocket {
        self.lock().queues.insert(addr, VecDeque::new());
        MemorySocket {
            addr,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Silently discards the next `count` datagrams sent on the network.
    pub fn drop_next(&self, count: usize) {
        self.lock().drop_next = count;
    }

    /// Reverses the order of the datagrams waiting at `addr`.
    pub fn reorder_pending(&self, addr: SocketAddr) {
        if let Some(queue) = self.lock().queues.get_mut(&addr) {
            queue.make_contiguous().reverse();
        }
    }

    /// When `true`, every send fails with `io::ErrorKind::NetworkUnreachable`.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Number of datagrams waiting at `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A socket on a [`MemoryNetwork`].  Dropping it unbinds its address.
pub struct MemorySocket {
    addr: SocketAddr,
    hub: Arc<Mutex<Hub>>,
}

impl MemorySocket {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        let mut hub = self.lock();
        if hub.fail_sends {
            return Err(io::Error::new(
                io::ErrorKind::NetworkUnreachable,
                "memory network is failing sends",
            ));
        }

        if to.ip() == IpAddr::V4(Ipv4Addr::BROADCAST) {
            let targets: Vec<SocketAddr> = hub
                .queues
                .keys()
                .filter(|addr| addr.port() == to.port())
                .copied()
                .collect();
            for target in targets {
                hub.deliver(bytes, self.addr, target);
            }
        } else {
            hub.deliver(bytes, self.addr, to);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.lock().queues.get_mut(&self.addr)?.pop_front()
    }

    fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.addr.port())
    }

    fn local_ip(&self) -> IpAddr {
        self.addr.ip()
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        let addr = self.addr;
        self.lock().queues.remove(&addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
    }

    #[test]
    fn test_unicast_reaches_only_the_destination() {
        // Arrange
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1, 8888));
        let mut b = net.bind(addr(2, 8888));
        let mut c = net.bind(addr(3, 8888));

        // Act
        a.send_to(b"hi", addr(2, 8888)).unwrap();

        // Assert
        assert_eq!(b.try_recv(), Some((b"hi".to_vec(), addr(1, 8888))));
        assert_eq!(c.try_recv(), None);
    }

    #[test]
    fn test_broadcast_reaches_every_socket_on_the_port_including_sender() {
        let net = MemoryNetwork::new();
        let mut a = net.bind(addr(1, 8888));
        let mut b = net.bind(addr(2, 8888));
        let mut other_port = net.bind(addr(3, 9999));

        a.send_to(b"d", a.broadcast_addr()).unwrap();

        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
        assert!(other_port.try_recv().is_none());
    }

    #[test]
    fn test_drop_next_discards_datagrams() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1, 8888));
        let _b = net.bind(addr(2, 8888));

        net.drop_next(2);
        for _ in 0..3 {
            a.send_to(b"x", addr(2, 8888)).unwrap();
        }

        assert_eq!(net.pending(addr(2, 8888)), 1);
    }

    #[test]
    fn test_reorder_pending_reverses_queue() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1, 8888));
        let mut b = net.bind(addr(2, 8888));
        a.send_to(&[1], addr(2, 8888)).unwrap();
        a.send_to(&[2], addr(2, 8888)).unwrap();

        net.reorder_pending(addr(2, 8888));

        assert_eq!(b.try_recv().unwrap().0, vec![2]);
        assert_eq!(b.try_recv().unwrap().0, vec![1]);
    }

    #[test]
    fn test_fail_sends_returns_error() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1, 8888));

        net.fail_sends(true);

        assert!(a.send_to(b"x", addr(2, 8888)).is_err());
    }

    #[test]
    fn test_dropping_socket_unbinds_address() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1, 8888));
        let b = net.bind(addr(2, 8888));

        drop(b);
        a.send_to(b"x", addr(2, 8888)).unwrap();

        assert_eq!(net.pending(addr(2, 8888)), 0);
    }
}
