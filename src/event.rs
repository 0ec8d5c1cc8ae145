//! Semantic events emitted toward the application.
//!
//! The discovery and delivery subsystems report what happened on a bounded
//! event queue; the application consumes it at its own pace. Events carry a
//! Unix-millisecond timestamp taken when the event was built.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::peer::{PeerAddress, PeerID};

/// Returns current time as milliseconds since Unix epoch. Doubles as a
/// convenient monotonic-enough nonce source for [`PeerAddress`] freshness.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Something the application should know about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A cast or broadcast body was delivered to this node. `from` is the
    /// authenticated sender when the transport knows it.
    MessageReceived {
        time_ms: u64,
        body: Vec<u8>,
        from: Option<PeerID>,
    },
    /// The directory learned a new or fresher address for a peer.
    PeerChanged {
        time_ms: u64,
        peer_address: PeerAddress,
    },
}

impl Event {
    pub fn message_received(body: Vec<u8>, from: Option<PeerID>) -> Self {
        Event::MessageReceived {
            time_ms: now_ms(),
            body,
            from,
        }
    }

    pub fn peer_changed(peer_address: PeerAddress) -> Self {
        Event::PeerChanged {
            time_ms: now_ms(),
            peer_address,
        }
    }
}

/// Producer half of the event queue.
pub type EventSender = mpsc::Sender<Event>;

/// Consumer half of the event queue.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create a bounded event queue.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}
