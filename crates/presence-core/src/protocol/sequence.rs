//! Sequence numbering for the reliable-ordered channel.
//!
//! # How the reliable channel works (for beginners)
//!
//! UDP may drop, duplicate, or reorder datagrams.  Sound events must arrive
//! exactly once and in the order they were sent, otherwise a stale "play"
//! could overtake a "stop".  The channel fixes this with three pieces:
//!
//! 1. **Sequence numbers** – every reliable payload is stamped with a 16-bit
//!    counter that wraps from 65535 back to 0.
//! 2. **Acknowledgement and retransmission** – the [`ReliableSender`] keeps each
//!    payload until the receiver acks its sequence number, resending it on a
//!    fixed interval in the meantime.
//! 3. **Reordering** – the [`OrderedReceiver`] releases payloads only in
//!    sequence order.  Early arrivals wait in a buffer; duplicates are dropped.
//!
//! # Wrap-around comparison
//!
//! With a 16-bit counter, 2 is "newer" than 65534.  Comparisons therefore use
//! the signed distance between two numbers, which stays correct as long as
//! the two are less than half the number space apart.  The in-flight window
//! ([`RELIABLE_WINDOW`]) is far below that bound.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Maximum number of unacknowledged payloads in flight, and the number of
/// early arrivals a receiver will buffer.
pub const RELIABLE_WINDOW: u16 = 64;

/// A wrapping 16-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    /// The number following this one, wrapping at `u16::MAX`.
    pub fn next(self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1))
    }

    /// Forward distance from `earlier` to `self`, modulo 2^16.
    pub fn distance_from(self, earlier: SequenceNumber) -> u16 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Returns `true` if `self` comes after `other` in wrap-around order.
    pub fn is_newer_than(self, other: SequenceNumber) -> bool {
        (self.0.wrapping_sub(other.0) as i16) > 0
    }
}

#[derive(Debug)]
struct Outstanding {
    sequence: SequenceNumber,
    payload: Vec<u8>,
    last_sent: Option<Instant>,
}

/// Sending half of the reliable channel for one connection.
#[derive(Debug, Default)]
pub struct ReliableSender {
    next: SequenceNumber,
    outstanding: VecDeque<Outstanding>,
}

impl ReliableSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `payload` and returns the sequence number assigned to it.
    ///
    /// Nothing is transmitted here; the caller picks the payload up from
    /// [`ReliableSender::due`].
    pub fn push(&mut self, payload: Vec<u8>) -> SequenceNumber {
        let sequence = self.next;
        self.next = sequence.next();
        self.outstanding.push_back(Outstanding {
            sequence,
            payload,
            last_sent: None,
        });
        sequence
    }

    /// Returns every payload inside the window that has never been sent or
    /// whose last transmission is at least `resend_interval` old, and marks
    /// them as sent at `now`.
    pub fn due(&mut self, now: Instant, resend_interval: Duration) -> Vec<(SequenceNumber, Vec<u8>)> {
        self.outstanding
            .iter_mut()
            .take(RELIABLE_WINDOW as usize)
            .filter(|o| match o.last_sent {
                None => true,
                Some(sent) => now.saturating_duration_since(sent) >= resend_interval,
            })
            .map(|o| {
                o.last_sent = Some(now);
                (o.sequence, o.payload.clone())
            })
            .collect()
    }

    /// Removes the payload with `sequence`.  Returns `false` for an unknown or
    /// already acknowledged sequence number.
    pub fn acknowledge(&mut self, sequence: SequenceNumber) -> bool {
        match self.outstanding.iter().position(|o| o.sequence == sequence) {
            Some(index) => {
                self.outstanding.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of payloads not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }
}

/// Receiving half of the reliable channel for one connection.
#[derive(Debug, Default)]
pub struct OrderedReceiver {
    expected: SequenceNumber,
    early: HashMap<SequenceNumber, Vec<u8>>,
}

impl OrderedReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one reliable payload.
    ///
    /// Returns `None` when `sequence` lies beyond the receive window; the frame
    /// must not be acknowledged so the sender retries it later.  Otherwise
    /// returns the (possibly empty) run of payloads that are now releasable, in
    /// order, and the frame should be acknowledged.  Duplicates of already
    /// released payloads are acknowledged but release nothing.
    pub fn receive(&mut self, sequence: SequenceNumber, payload: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        if !sequence.is_newer_than(self.expected) && sequence != self.expected {
            // Already released; the ack for it was probably lost.
            return Some(Vec::new());
        }
        if sequence.distance_from(self.expected) >= RELIABLE_WINDOW {
            return None;
        }

        if sequence != self.expected {
            self.early.entry(sequence).or_insert(payload);
            return Some(Vec::new());
        }

        let mut released = vec![payload];
        self.expected = self.expected.next();
        while let Some(next) = self.early.remove(&self.expected) {
            released.push(next);
            self.expected = self.expected.next();
        }
        Some(released)
    }

    /// The next sequence number this receiver will release.
    pub fn expected(&self) -> SequenceNumber {
        self.expected
    }

    /// Number of early arrivals waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.early.len()
    }
}
