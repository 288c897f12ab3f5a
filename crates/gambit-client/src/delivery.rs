//! In-order, exactly-once hand-off of move events to the application.
//!
//! Moves reach the client from three places: live pushes, the backlog in a
//! `Subscribed` reply, and explicit catch-up fetches. The same sequence
//! number can arrive from more than one of them, and a live push can beat
//! the backlog that precedes it. [`Delivery`] absorbs both: anything at or
//! below the last delivered sequence is dropped, anything past a gap is held
//! until the gap fills.

use std::collections::BTreeMap;

use gambit_protocol::{MoveEvent, SessionId, SessionSnapshot};
use tokio::sync::mpsc;

/// What the application receives from its [`Inbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The next move, in sequence order. Never repeated.
    Move(MoveEvent),
    /// Someone joined, or a participant's connection status changed.
    SessionUpdated(SessionSnapshot),
    /// The session is gone; no more moves will come.
    SessionClosed(SessionId),
    /// The connection dropped without being asked to. Call
    /// [`resume()`](crate::ConnectionManager::resume) to recover.
    LinkLost,
}

/// Receiving end of a manager's event stream.
#[derive(Debug)]
pub struct Inbox {
    receiver: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Inbox {
    /// Waits for the next event. `None` once the manager is dropped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.receiver.recv().await
    }

    /// Takes an event if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.receiver.try_recv().ok()
    }
}

pub(crate) struct Delivery {
    last_seq: u64,
    held: BTreeMap<u64, MoveEvent>,
    sink: mpsc::UnboundedSender<ClientEvent>,
}

impl Delivery {
    pub(crate) fn new() -> (Self, Inbox) {
        let (sink, receiver) = mpsc::unbounded_channel();
        let delivery = Self {
            last_seq: 0,
            held: BTreeMap::new(),
            sink,
        };
        (delivery, Inbox { receiver })
    }

    /// Highest sequence handed to the application.
    pub(crate) fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Number of events waiting for a gap to fill.
    pub(crate) fn held(&self) -> usize {
        self.held.len()
    }

    /// Offers one event. Returns how many events were delivered as a result.
    pub(crate) fn offer(&mut self, event: MoveEvent) -> usize {
        if event.seq <= self.last_seq {
            return 0;
        }
        self.held.entry(event.seq).or_insert(event);

        let mut delivered = 0;
        while let Some(next) = self.held.remove(&(self.last_seq + 1)) {
            self.last_seq = next.seq;
            // A dropped inbox still advances the cursor.
            let _ = self.sink.send(ClientEvent::Move(next));
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn offer_all(&mut self, events: impl IntoIterator<Item = MoveEvent>) -> usize {
        events.into_iter().map(|event| self.offer(event)).sum()
    }

    /// Passes a non-move event straight through.
    pub(crate) fn notify(&self, event: ClientEvent) {
        let _ = self.sink.send(event);
    }
}
