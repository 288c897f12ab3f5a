//! The topic actor: one Tokio task per session.
//!
//! Nothing outside this module touches a topic's subscriber map. Callers
//! hold a [`TopicHandle`] and talk to the actor through its command queue;
//! commands that need an answer carry a `oneshot` reply sender.
//!
//! The queue is unbounded, so publishing and closing never suspend. A
//! caller can commit a change and publish it without an `.await` in
//! between, and a cancelled caller can't leave the two halves apart.
//!
//! Because one task processes commands in arrival order, every subscriber
//! sees published events in exactly the order they were published.

use std::collections::HashMap;

use gambit_protocol::SessionId;
use tokio::sync::{mpsc, oneshot};

use crate::{ChannelError, ChannelEvent, SubscriberId};

type EventSender = mpsc::UnboundedSender<ChannelEvent>;

pub(crate) enum TopicCommand {
    Subscribe {
        subscriber: SubscriberId,
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<ChannelEvent>)>,
    },

    /// Removes `subscriber` only if its current generation still matches,
    /// so a stale handle can't evict its replacement.
    Unsubscribe {
        subscriber: SubscriberId,
        generation: u64,
    },

    Publish {
        event: ChannelEvent,
    },

    Count {
        reply: oneshot::Sender<usize>,
    },

    Close,
}

/// Cloneable handle to a running topic actor.
#[derive(Clone)]
pub(crate) struct TopicHandle {
    session_id: SessionId,
    sender: mpsc::UnboundedSender<TopicCommand>,
}

impl TopicHandle {
    fn unavailable(&self) -> ChannelError {
        ChannelError::Unavailable(self.session_id.clone())
    }

    pub(crate) async fn subscribe(
        &self,
        subscriber: SubscriberId,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(TopicCommand::Subscribe {
                subscriber: subscriber.clone(),
                reply: reply_tx,
            })
            .map_err(|_| self.unavailable())?;
        let (generation, receiver) = reply_rx.await.map_err(|_| self.unavailable())?;

        Ok(SubscriptionHandle {
            session_id: self.session_id.clone(),
            subscriber_id: subscriber,
            generation,
            receiver,
        })
    }

    pub(crate) fn unsubscribe(&self, subscriber: SubscriberId, generation: u64) {
        // A stopped actor has already dropped everyone.
        let _ = self.sender.send(TopicCommand::Unsubscribe {
            subscriber,
            generation,
        });
    }

    pub(crate) fn publish(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        self.sender
            .send(TopicCommand::Publish { event })
            .map_err(|_| self.unavailable())
    }

    pub(crate) async fn subscriber_count(&self) -> Result<usize, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(TopicCommand::Count { reply: reply_tx })
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Queued behind every earlier publish, so those still go out first.
    pub(crate) fn close(&self) {
        let _ = self.sender.send(TopicCommand::Close);
    }
}

/// Publish-only handle to one session's topic.
///
/// [`publish`](Self::publish) never suspends, so it is safe to call while
/// holding a lock and right after committing the change it announces.
#[derive(Clone)]
pub struct TopicPublisher {
    topic: TopicHandle,
}

impl TopicPublisher {
    pub(crate) fn new(topic: TopicHandle) -> Self {
        Self { topic }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.topic.session_id
    }

    /// Queues `event` for every current subscriber.
    ///
    /// # Errors
    /// [`ChannelError::Unavailable`] once the topic has closed.
    pub fn publish(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        self.topic.publish(event)
    }
}

/// A live subscription to one session's topic.
///
/// Events arrive through [`recv`](Self::recv). The stream ends (`None`)
/// when the subscriber is replaced by a newer subscription with the same
/// id, when it unsubscribes, or when the topic closes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    session_id: SessionId,
    subscriber_id: SubscriberId,
    generation: u64,
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl SubscriptionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the next event. Cancel-safe.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.try_recv().ok()
    }
}

struct TopicActor {
    session_id: SessionId,
    subscribers: HashMap<SubscriberId, (u64, EventSender)>,
    next_generation: u64,
    receiver: mpsc::UnboundedReceiver<TopicCommand>,
}

impl TopicActor {
    async fn run(mut self) {
        tracing::debug!(session_id = %self.session_id, "topic actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                TopicCommand::Subscribe { subscriber, reply } => {
                    let _ = reply.send(self.handle_subscribe(subscriber));
                }
                TopicCommand::Unsubscribe {
                    subscriber,
                    generation,
                } => self.handle_unsubscribe(subscriber, generation),
                TopicCommand::Publish { event } => self.handle_publish(event),
                TopicCommand::Count { reply } => {
                    let _ = reply.send(self.subscribers.len());
                }
                TopicCommand::Close => break,
            }
        }

        // Refuse new commands first, then end every subscriber's stream.
        self.receiver.close();
        self.subscribers.clear();
        tracing::debug!(session_id = %self.session_id, "topic actor stopped");
    }

    fn handle_subscribe(
        &mut self,
        subscriber: SubscriberId,
    ) -> (u64, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_generation += 1;
        let generation = self.next_generation;

        let replaced = self
            .subscribers
            .insert(subscriber.clone(), (generation, tx))
            .is_some();
        tracing::debug!(
            session_id = %self.session_id,
            %subscriber,
            replaced,
            subscribers = self.subscribers.len(),
            "subscriber attached"
        );
        (generation, rx)
    }

    fn handle_unsubscribe(&mut self, subscriber: SubscriberId, generation: u64) {
        let current = matches!(self.subscribers.get(&subscriber), Some((g, _)) if *g == generation);
        if current {
            self.subscribers.remove(&subscriber);
            tracing::debug!(
                session_id = %self.session_id,
                %subscriber,
                subscribers = self.subscribers.len(),
                "subscriber detached"
            );
        }
    }

    fn handle_publish(&mut self, event: ChannelEvent) {
        let session_id = &self.session_id;
        self.subscribers.retain(|subscriber, (_, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(%session_id, %subscriber, "dropping gone subscriber");
            }
            alive
        });
    }
}

/// Spawns a topic actor and returns a handle to it.
pub(crate) fn spawn_topic(session_id: SessionId) -> TopicHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    let actor = TopicActor {
        session_id: session_id.clone(),
        subscribers: HashMap::new(),
        next_generation: 0,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    TopicHandle {
        session_id,
        sender: tx,
    }
}
