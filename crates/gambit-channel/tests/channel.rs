//! Integration tests for the broadcast channel.

use std::time::Duration;

use gambit_channel::{BroadcastChannel, ChannelError, ChannelEvent, SubscriberId};
use gambit_protocol::{
    Coord, MoveEvent, Nonce, ParticipantId, SessionId, SessionSnapshot, SessionState,
};

// =========================================================================
// Helpers
// =========================================================================

fn sid(id: &str) -> SessionId {
    SessionId::from(id)
}

fn move_in(session: &str, seq: u64) -> ChannelEvent {
    ChannelEvent::Move(MoveEvent {
        session_id: sid(session),
        participant_id: ParticipantId::from("alice"),
        seq,
        nonce: Nonce::from(format!("n{seq}")),
        from: Coord::new(6, 3),
        to: Coord::new(4, 3),
    })
}

async fn recv_within(handle: &mut gambit_channel::SubscriptionHandle) -> Option<ChannelEvent> {
    tokio::time::timeout(Duration::from_secs(1), handle.recv())
        .await
        .expect("event should arrive in time")
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_subscribe_without_topic_is_not_found() {
    let channel = BroadcastChannel::new();
    let result = channel.subscribe(&sid("S1"), "alice").await;
    assert!(matches!(result, Err(ChannelError::NotFound(id)) if id == sid("S1")));
}

#[tokio::test]
async fn test_publish_without_topic_is_not_found() {
    let channel = BroadcastChannel::new();
    let result = channel.publish(&sid("S1"), move_in("S1", 1)).await;
    assert!(matches!(result, Err(ChannelError::NotFound(_))));
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();

    // A second open must not replace the topic (and kill the subscription).
    channel.open(&sid("S1")).await;
    assert_eq!(channel.topic_count().await, 1);

    channel.publish(&sid("S1"), move_in("S1", 1)).await.unwrap();
    assert_eq!(recv_within(&mut sub).await, Some(move_in("S1", 1)));
}

#[tokio::test]
async fn test_subscribers_see_all_events_in_publish_order() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut alice = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let mut bob = channel.subscribe(&sid("S1"), "bob").await.unwrap();

    for seq in 1..=20 {
        channel.publish(&sid("S1"), move_in("S1", seq)).await.unwrap();
    }

    for sub in [&mut alice, &mut bob] {
        for seq in 1..=20 {
            assert_eq!(recv_within(sub).await, Some(move_in("S1", seq)));
        }
        assert!(sub.try_recv().is_none());
    }
}

#[tokio::test]
async fn test_topics_are_isolated_per_session() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    channel.open(&sid("S2")).await;
    let mut one = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let mut two = channel.subscribe(&sid("S2"), "alice").await.unwrap();

    channel.publish(&sid("S2"), move_in("S2", 1)).await.unwrap();

    assert_eq!(recv_within(&mut two).await, Some(move_in("S2", 1)));
    assert!(one.try_recv().is_none());
}

#[tokio::test]
async fn test_resubscribe_replaces_prior_handle() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut old = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let mut new = channel
        .subscribe(&sid("S1"), SubscriberId::new("alice"))
        .await
        .unwrap();

    assert_eq!(recv_within(&mut old).await, None);
    assert_eq!(channel.subscriber_count(&sid("S1")).await.unwrap(), 1);

    channel.publish(&sid("S1"), move_in("S1", 1)).await.unwrap();
    assert_eq!(recv_within(&mut new).await, Some(move_in("S1", 1)));
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_ignores_stale_handles() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let old = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let current = channel.subscribe(&sid("S1"), "alice").await.unwrap();

    channel.unsubscribe(&old).await;
    assert_eq!(channel.subscriber_count(&sid("S1")).await.unwrap(), 1);

    channel.unsubscribe(&current).await;
    channel.unsubscribe(&current).await;
    assert_eq!(channel.subscriber_count(&sid("S1")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsubscribe_after_close_does_not_fail() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();

    channel.close(&sid("S1")).await.unwrap();
    channel.unsubscribe(&sub).await;
    assert_eq!(channel.topic_count().await, 0);
}

#[tokio::test]
async fn test_close_delivers_closed_then_ends_stream() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();

    channel.publish(&sid("S1"), ChannelEvent::Closed).await.unwrap();
    channel.close(&sid("S1")).await.unwrap();

    assert_eq!(recv_within(&mut sub).await, Some(ChannelEvent::Closed));
    assert_eq!(recv_within(&mut sub).await, None);
    assert!(matches!(
        channel.close(&sid("S1")).await,
        Err(ChannelError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_updated_events_are_fanned_out() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();

    let snapshot = SessionSnapshot {
        session_id: sid("S1"),
        state: SessionState::Active,
        participants: vec![],
        seq: 0,
    };
    channel
        .publish(&sid("S1"), ChannelEvent::Updated(snapshot.clone()))
        .await
        .unwrap();

    assert_eq!(recv_within(&mut sub).await, Some(ChannelEvent::Updated(snapshot)));
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_publisher() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut slow = channel.subscribe(&sid("S1"), "slow").await.unwrap();

    // Nobody reads `slow` while we publish.
    let publish_all = async {
        for seq in 1..=500 {
            channel.publish(&sid("S1"), move_in("S1", seq)).await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(2), publish_all)
        .await
        .expect("publishing must not wait on subscribers");

    for seq in 1..=500 {
        assert_eq!(recv_within(&mut slow).await, Some(move_in("S1", seq)));
    }
}

#[tokio::test]
async fn test_publisher_publishes_without_waiting() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let publisher = channel.publisher(&sid("S1")).await.unwrap();
    assert_eq!(publisher.session_id(), &sid("S1"));

    publisher.publish(move_in("S1", 1)).unwrap();
    publisher.publish(move_in("S1", 2)).unwrap();

    assert_eq!(recv_within(&mut sub).await, Some(move_in("S1", 1)));
    assert_eq!(recv_within(&mut sub).await, Some(move_in("S1", 2)));
}

#[tokio::test]
async fn test_publisher_outliving_its_topic_is_unavailable() {
    let channel = BroadcastChannel::new();
    channel.open(&sid("S1")).await;
    let mut sub = channel.subscribe(&sid("S1"), "alice").await.unwrap();
    let publisher = channel.publisher(&sid("S1")).await.unwrap();

    channel.close(&sid("S1")).await.unwrap();
    assert_eq!(recv_within(&mut sub).await, None);

    assert!(matches!(
        publisher.publish(move_in("S1", 1)),
        Err(ChannelError::Unavailable(_))
    ));
    assert!(matches!(
        channel.publisher(&sid("S1")).await,
        Err(ChannelError::NotFound(_))
    ));
}
