//! [`BroadcastChannel`]: the registry of topic actors, keyed by session.

use std::collections::HashMap;
use std::sync::Arc;

use gambit_protocol::SessionId;
use tokio::sync::RwLock;

use crate::topic::{spawn_topic, TopicHandle};
use crate::{ChannelError, ChannelEvent, SubscriberId, SubscriptionHandle, TopicPublisher};

/// Shared publish/subscribe service. Cloning is cheap; clones share the
/// same topics.
#[derive(Clone, Default)]
pub struct BroadcastChannel {
    topics: Arc<RwLock<HashMap<SessionId, TopicHandle>>>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the topic for `session_id`. Opening an open topic is a no-op.
    pub async fn open(&self, session_id: &SessionId) {
        let mut topics = self.topics.write().await;
        if topics.contains_key(session_id) {
            return;
        }
        topics.insert(
            session_id.clone(),
            spawn_topic(session_id.clone()),
        );
        tracing::debug!(%session_id, "topic opened");
    }

    /// Attaches `subscriber` to the session's topic.
    ///
    /// Subscribing again with the same id replaces the previous
    /// subscription; the old handle's stream ends.
    ///
    /// # Errors
    /// [`ChannelError::NotFound`] if no topic is open for the session.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        subscriber: impl Into<SubscriberId>,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let topic = self.topic(session_id).await?;
        topic.subscribe(subscriber.into()).await
    }

    /// Fans `event` out to every current subscriber of the session.
    pub async fn publish(
        &self,
        session_id: &SessionId,
        event: ChannelEvent,
    ) -> Result<(), ChannelError> {
        self.topic(session_id).await?.publish(event)
    }

    /// A publisher bound to the session's topic, for callers that must
    /// publish without suspending.
    ///
    /// # Errors
    /// [`ChannelError::NotFound`] if no topic is open for the session.
    pub async fn publisher(&self, session_id: &SessionId) -> Result<TopicPublisher, ChannelError> {
        self.topic(session_id).await.map(TopicPublisher::new)
    }

    /// Detaches the endpoint behind `handle`. Never fails: an unknown
    /// topic or an already-replaced handle is simply ignored.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Ok(topic) = self.topic(handle.session_id()).await {
            topic.unsubscribe(handle.subscriber_id().clone(), handle.generation());
        }
    }

    /// Stops the session's topic; every subscription stream ends after the
    /// events already published.
    ///
    /// # Errors
    /// [`ChannelError::NotFound`] if no topic is open for the session.
    pub async fn close(&self, session_id: &SessionId) -> Result<(), ChannelError> {
        let topic = self
            .topics
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ChannelError::NotFound(session_id.clone()))?;
        topic.close();
        tracing::debug!(%session_id, "topic closed");
        Ok(())
    }

    /// Number of live subscribers on the session's topic.
    pub async fn subscriber_count(&self, session_id: &SessionId) -> Result<usize, ChannelError> {
        let topic = self.topic(session_id).await?;
        topic.subscriber_count().await
    }

    /// Number of open topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Clones the handle out so the map lock is released before we talk to
    /// the actor.
    async fn topic(&self, session_id: &SessionId) -> Result<TopicHandle, ChannelError> {
        self.topics
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ChannelError::NotFound(session_id.clone()))
    }
}
