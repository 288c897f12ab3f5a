//! Integration tests for the session service together with the broadcast
//! channel it publishes to.

use std::time::Duration;

use gambit_channel::{ChannelEvent, SubscriptionHandle};
use gambit_protocol::{
    ConnectionStatus, Coord, MoveEvent, Nonce, ParticipantId, SessionId, SessionState, Side,
};
use gambit_session::{MoveRequest, SessionConfig, SessionError, SessionService};

// =========================================================================
// Helpers
// =========================================================================

fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

fn service() -> SessionService {
    SessionService::new(SessionConfig::default())
}

fn request(who: &str, nonce: &str) -> MoveRequest {
    MoveRequest {
        participant_id: pid(who),
        nonce: Nonce::from(nonce),
        from: Coord::new(6, 3),
        to: Coord::new(4, 3),
    }
}

/// alice (WHITE) creates, bob joins. Returns the ACTIVE session's id.
async fn active_session(service: &SessionService) -> SessionId {
    let id = service
        .create_session(pid("alice"), Side::White)
        .await
        .unwrap();
    service.join_session(&id, pid("bob")).await.unwrap();
    id
}

async fn next_move(sub: &mut SubscriptionHandle) -> MoveEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event in time")
            .expect("stream open");
        if let ChannelEvent::Move(event) = event {
            return event;
        }
    }
}

// =========================================================================
// The two-player scenario end to end
// =========================================================================

#[tokio::test]
async fn test_scenario_create_join_move_and_resubmit() {
    let service = service();

    let id = service
        .create_session(pid("alice"), Side::White)
        .await
        .unwrap();
    assert_eq!(service.session(&id).await.unwrap().state, SessionState::Open);

    let snap = service.join_session(&id, pid("bob")).await.unwrap();
    assert_eq!(snap.state, SessionState::Active);
    let names: Vec<&str> = snap.participants.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
    assert_eq!(snap.participants[1].side, Side::Black);

    let mut alice = service.channel().subscribe(&id, &pid("alice")).await.unwrap();
    let mut bob = service.channel().subscribe(&id, &pid("bob")).await.unwrap();

    let event = service.submit_move(&id, request("alice", "n1")).await.unwrap();
    assert_eq!(event.seq, 1);
    assert_eq!(event.from, Coord::new(6, 3));
    assert_eq!(event.to, Coord::new(4, 3));
    assert_eq!(next_move(&mut alice).await, event);
    assert_eq!(next_move(&mut bob).await, event);

    let err = service
        .submit_move(&id, request("alice", "n1"))
        .await
        .unwrap_err();
    match err {
        SessionError::DuplicateSubmission(original) => assert_eq!(*original, event),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(service.session(&id).await.unwrap().seq, 1);

    // The duplicate was not republished.
    tokio::task::yield_now().await;
    assert!(alice.try_recv().is_none());
}

// =========================================================================
// create_session / join_session
// =========================================================================

#[tokio::test]
async fn test_create_session_empty_participant_returns_invalid_input() {
    let service = service();
    let err = service
        .create_session(pid(""), Side::White)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert!(service.registry().is_empty().await);
}

#[tokio::test]
async fn test_create_session_returns_distinct_ids_and_opens_topics() {
    let service = service();
    let a = service.create_session(pid("alice"), Side::White).await.unwrap();
    let b = service.create_session(pid("alice"), Side::White).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 32);
    assert_eq!(service.channel().topic_count().await, 2);
}

#[tokio::test]
async fn test_join_session_unknown_id_returns_not_found() {
    let service = service();
    let err = service
        .join_session(&SessionId::from("missing"), pid("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn test_join_session_full_returns_full_without_mutation() {
    let service = service();
    let id = active_session(&service).await;
    let before = service.session(&id).await.unwrap();

    let err = service.join_session(&id, pid("carol")).await.unwrap_err();

    assert!(matches!(err, SessionError::SessionFull(_)));
    assert_eq!(service.session(&id).await.unwrap(), before);
}

#[tokio::test]
async fn test_join_session_empty_or_duplicate_participant_returns_invalid_input() {
    let service = service();
    let id = service.create_session(pid("alice"), Side::White).await.unwrap();

    assert!(matches!(
        service.join_session(&id, pid("")).await,
        Err(SessionError::InvalidInput(_))
    ));
    assert!(matches!(
        service.join_session(&id, pid("alice")).await,
        Err(SessionError::InvalidInput(_))
    ));
    assert_eq!(service.session(&id).await.unwrap().state, SessionState::Open);
}

#[tokio::test]
async fn test_join_session_notifies_waiting_creator() {
    let service = service();
    let id = service.create_session(pid("alice"), Side::White).await.unwrap();
    let mut alice = service.channel().subscribe(&id, &pid("alice")).await.unwrap();

    service.join_session(&id, pid("bob")).await.unwrap();

    match alice.recv().await {
        Some(ChannelEvent::Updated(snap)) => {
            assert_eq!(snap.state, SessionState::Active);
            assert_eq!(snap.participants.len(), 2);
        }
        other => panic!("expected snapshot update, got {other:?}"),
    }
}

// =========================================================================
// submit_move
// =========================================================================

#[tokio::test]
async fn test_submit_move_before_join_returns_not_active() {
    let service = service();
    let id = service.create_session(pid("alice"), Side::White).await.unwrap();
    let err = service
        .submit_move(&id, request("alice", "n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotActive { .. }));
}

#[tokio::test]
async fn test_submit_move_unknown_session_returns_not_found() {
    let service = service();
    let err = service
        .submit_move(&SessionId::from("missing"), request("alice", "n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn test_submit_move_stranger_returns_unknown_participant() {
    let service = service();
    let id = active_session(&service).await;
    let err = service
        .submit_move(&id, request("mallory", "n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownParticipant { .. }));
    assert_eq!(service.session(&id).await.unwrap().seq, 0);
}

#[tokio::test]
async fn test_submit_move_bad_input_returns_invalid_input() {
    let service = service();
    let id = active_session(&service).await;

    assert!(matches!(
        service.submit_move(&id, request("alice", "")).await,
        Err(SessionError::InvalidInput(_))
    ));

    let off_board = MoveRequest {
        to: Coord::new(8, 0),
        ..request("alice", "n1")
    };
    assert!(matches!(
        service.submit_move(&id, off_board).await,
        Err(SessionError::InvalidInput(_))
    ));
    assert_eq!(service.session(&id).await.unwrap().seq, 0);
}

#[tokio::test]
async fn test_submit_move_concurrent_submissions_get_gapless_sequence() {
    let service = service();
    let id = active_session(&service).await;
    let mut watcher = service.channel().subscribe(&id, &pid("watcher")).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let service = service.clone();
        let id = id.clone();
        let who = if i % 2 == 0 { "alice" } else { "bob" };
        tasks.push(tokio::spawn(async move {
            service
                .submit_move(&id, request(who, &format!("n{i}")))
                .await
                .unwrap()
                .seq
        }));
    }

    let mut seqs = Vec::new();
    for task in tasks {
        seqs.push(task.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=50).collect::<Vec<u64>>());

    for expected in 1..=50 {
        assert_eq!(next_move(&mut watcher).await.seq, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_move_cancelled_submissions_leave_no_gap_in_live_stream() {
    let service = service();
    let id = active_session(&service).await;
    let mut watcher = service.channel().subscribe(&id, &pid("watcher")).await.unwrap();

    // Deadlines this short cut submissions off at every await point.
    let mut tasks = Vec::new();
    for i in 0..200u64 {
        let service = service.clone();
        let id = id.clone();
        let who = if i % 2 == 0 { "alice" } else { "bob" };
        tasks.push(tokio::spawn(async move {
            let deadline = Duration::from_micros(i % 7 * 15);
            let _ = tokio::time::timeout(
                deadline,
                service.submit_move(&id, request(who, &format!("n{i}"))),
            )
            .await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // One submission dropped after its first poll, as a request timeout does.
    {
        let pending = service.submit_move(&id, request("alice", "last"));
        tokio::pin!(pending);
        tokio::select! {
            biased;
            _ = &mut pending => {}
            _ = std::future::ready(()) => {}
        }
    }

    let logged: Vec<u64> = service
        .moves_after(&id, 0)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    let mut live = Vec::with_capacity(logged.len());
    for _ in 0..logged.len() {
        live.push(next_move(&mut watcher).await.seq);
    }
    assert_eq!(live, logged);
    assert_eq!(logged, (1..=logged.len() as u64).collect::<Vec<u64>>());
}

// =========================================================================
// moves_after / set_connection_status
// =========================================================================

#[tokio::test]
async fn test_moves_after_returns_only_newer_moves() {
    let service = service();
    let id = active_session(&service).await;
    for i in 0..6 {
        service
            .submit_move(&id, request("alice", &format!("n{i}")))
            .await
            .unwrap();
    }

    let tail: Vec<u64> = service
        .moves_after(&id, 4)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(tail, vec![5, 6]);
}

#[tokio::test]
async fn test_set_connection_status_publishes_only_on_change() {
    let service = service();
    let id = active_session(&service).await;
    let mut alice = service.channel().subscribe(&id, &pid("alice")).await.unwrap();

    let snap = service
        .set_connection_status(&id, &pid("bob"), ConnectionStatus::Connected)
        .await
        .unwrap();
    assert_eq!(snap.participants[1].status, ConnectionStatus::Connected);
    assert!(matches!(alice.recv().await, Some(ChannelEvent::Updated(_))));

    service
        .set_connection_status(&id, &pid("bob"), ConnectionStatus::Connected)
        .await
        .unwrap();
    tokio::task::yield_now().await;
    assert!(alice.try_recv().is_none());
}

// =========================================================================
// close_session / expire_idle
// =========================================================================

#[tokio::test]
async fn test_close_session_notifies_and_forgets() {
    let service = service();
    let id = active_session(&service).await;
    let mut bob = service.channel().subscribe(&id, &pid("bob")).await.unwrap();

    service.close_session(&id).await.unwrap();

    assert_eq!(bob.recv().await, Some(ChannelEvent::Closed));
    assert_eq!(bob.recv().await, None);
    assert!(matches!(
        service.session(&id).await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        service.close_session(&id).await,
        Err(SessionError::NotFound(_))
    ));
    assert_eq!(service.channel().topic_count().await, 0);
}

#[tokio::test]
async fn test_expire_idle_zero_timeout_closes_everything() {
    let service = SessionService::new(SessionConfig {
        idle_timeout: Duration::ZERO,
    });
    let a = active_session(&service).await;
    let b = service.create_session(pid("carol"), Side::Black).await.unwrap();

    let mut expired = service.expire_idle().await;
    expired.sort();
    let mut expected = vec![a, b];
    expected.sort();

    assert_eq!(expired, expected);
    assert!(service.registry().is_empty().await);
}

#[tokio::test]
async fn test_expire_idle_long_timeout_keeps_sessions() {
    let service = SessionService::new(SessionConfig {
        idle_timeout: Duration::from_secs(3600),
    });
    active_session(&service).await;

    assert!(service.expire_idle().await.is_empty());
    assert_eq!(service.registry().len().await, 1);
}
