//! A single session's state: participants, move log, nonce index.
//!
//! [`Session`] is plain data with synchronous methods. All locking happens
//! one level up, in the service, which wraps each session in its own
//! `tokio::sync::Mutex`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use gambit_protocol::{
    ConnectionStatus, Coord, MoveEvent, Nonce, Participant, ParticipantId, SessionId,
    SessionSnapshot, SessionState, Side,
};

use crate::SessionError;

/// A session holds at most this many participants.
pub const MAX_PARTICIPANTS: usize = 2;

/// Configuration for session behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A session with no activity (join, move, connect) for this long is
    /// closed by [`SessionService::expire_idle`](crate::SessionService::expire_idle).
    ///
    /// Default: 30 minutes.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    id: SessionId,
    state: SessionState,
    participants: Vec<Participant>,
    /// Accepted moves in sequence order; `log[i].seq == i + 1`.
    log: Vec<MoveEvent>,
    /// `(participant, nonce)` → index into `log`.
    accepted: HashMap<(ParticipantId, Nonce), usize>,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// A fresh OPEN session with its creator as the only participant.
    pub(crate) fn new(id: SessionId, creator: ParticipantId, side: Side) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::Open,
            participants: vec![Participant::new(creator, side)],
            log: Vec::new(),
            accepted: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Sequence number of the last accepted move.
    pub(crate) fn seq(&self) -> u64 {
        self.log.len() as u64
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            state: self.state,
            participants: self.participants.clone(),
            seq: self.seq(),
        }
    }

    fn is_participant(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }

    /// Adds the second participant on the side opposite the creator's.
    ///
    /// # Errors
    /// - `NotActive` if the session is closed
    /// - `SessionFull` if two participants are already present (nothing
    ///   is changed)
    /// - `InvalidInput` if `participant` is already in the session
    pub(crate) fn join(&mut self, participant: ParticipantId) -> Result<SessionSnapshot, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::NotActive {
                session: self.id.clone(),
                state: self.state,
            });
        }
        if self.participants.len() >= MAX_PARTICIPANTS {
            return Err(SessionError::SessionFull(self.id.clone()));
        }
        if self.is_participant(&participant) {
            return Err(SessionError::InvalidInput(format!(
                "participant {participant} is already in session {}",
                self.id
            )));
        }

        let side = self.participants[0].side.opposite();
        self.participants.push(Participant::new(participant, side));
        self.state = SessionState::Active;
        self.touch();
        Ok(self.snapshot())
    }

    /// Accepts a move, assigning it the next sequence number.
    ///
    /// # Errors
    /// - `NotActive` unless the session is ACTIVE
    /// - `UnknownParticipant` if the submitter isn't in the session
    /// - `DuplicateSubmission` with the original event if the
    ///   `(participant, nonce)` pair was accepted before
    pub(crate) fn accept_move(
        &mut self,
        participant: ParticipantId,
        nonce: Nonce,
        from: Coord,
        to: Coord,
    ) -> Result<MoveEvent, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive {
                session: self.id.clone(),
                state: self.state,
            });
        }
        if !self.is_participant(&participant) {
            return Err(SessionError::UnknownParticipant {
                participant,
                session: self.id.clone(),
            });
        }

        let key = (participant, nonce);
        if let Some(&index) = self.accepted.get(&key) {
            return Err(SessionError::DuplicateSubmission(Box::new(
                self.log[index].clone(),
            )));
        }

        let event = MoveEvent {
            session_id: self.id.clone(),
            participant_id: key.0.clone(),
            seq: self.seq() + 1,
            nonce: key.1.clone(),
            from,
            to,
        };
        self.accepted.insert(key, self.log.len());
        self.log.push(event.clone());
        self.touch();
        Ok(event)
    }

    /// Every accepted move with `seq > after`, in order.
    pub(crate) fn moves_after(&self, after: u64) -> Vec<MoveEvent> {
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(self.log.len());
        self.log[start..].to_vec()
    }

    /// Updates a participant's connection status. Returns `false` if the
    /// status was already `status`.
    pub(crate) fn set_status(
        &mut self,
        participant: &ParticipantId,
        status: ConnectionStatus,
    ) -> Result<bool, SessionError> {
        let entry = self
            .participants
            .iter_mut()
            .find(|p| &p.id == participant)
            .ok_or_else(|| SessionError::UnknownParticipant {
                participant: participant.clone(),
                session: self.id.clone(),
            })?;
        let changed = entry.status != status;
        entry.status = status;
        self.touch();
        Ok(changed)
    }

    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
        for p in &mut self.participants {
            p.status = ConnectionStatus::NotConnected;
        }
    }

    /// `true` once `idle_timeout` has passed since the last activity.
    /// A zero timeout makes every session idle immediately.
    pub(crate) fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_activity.elapsed() >= idle_timeout
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for `Session`, named `test_{function}_{scenario}_{expected}`.

    use super::*;

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    fn nonce(n: &str) -> Nonce {
        Nonce::from(n)
    }

    /// An ACTIVE session: alice (WHITE) and bob (BLACK).
    fn active_session() -> Session {
        let mut session = Session::new(SessionId::from("S1"), pid("alice"), Side::White);
        session.join(pid("bob")).expect("bob joins");
        session
    }

    fn submit(session: &mut Session, who: &str, n: &str) -> Result<MoveEvent, SessionError> {
        session.accept_move(pid(who), nonce(n), Coord::new(6, 3), Coord::new(4, 3))
    }

    // =====================================================================
    // new() / join()
    // =====================================================================

    #[test]
    fn test_new_session_is_open_with_creator() {
        let session = Session::new(SessionId::from("S1"), pid("alice"), Side::Black);
        let snap = session.snapshot();

        assert_eq!(snap.state, SessionState::Open);
        assert_eq!(snap.seq, 0);
        assert_eq!(snap.participants.len(), 1);
        assert_eq!(snap.participants[0].side, Side::Black);
        assert_eq!(snap.participants[0].status, ConnectionStatus::NotConnected);
    }

    #[test]
    fn test_join_second_participant_becomes_active_with_opposite_side() {
        let session = active_session();
        let snap = session.snapshot();

        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(snap.participants[0].id, pid("alice"));
        assert_eq!(snap.participants[1].id, pid("bob"));
        assert_eq!(snap.participants[1].side, Side::Black);
    }

    #[test]
    fn test_join_full_session_returns_full_and_leaves_session_unchanged() {
        let mut session = active_session();
        let before = session.snapshot();

        let err = session.join(pid("carol")).unwrap_err();

        assert!(matches!(err, SessionError::SessionFull(_)));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_join_same_participant_returns_invalid_input() {
        let mut session = Session::new(SessionId::from("S1"), pid("alice"), Side::White);
        let err = session.join(pid("alice")).unwrap_err();

        assert!(matches!(err, SessionError::InvalidInput(_)));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_join_closed_session_returns_not_active() {
        let mut session = Session::new(SessionId::from("S1"), pid("alice"), Side::White);
        session.close();
        assert!(matches!(
            session.join(pid("bob")),
            Err(SessionError::NotActive { .. })
        ));
    }

    // =====================================================================
    // accept_move()
    // =====================================================================

    #[test]
    fn test_accept_move_assigns_increasing_sequence_from_one() {
        let mut session = active_session();
        for (i, n) in ["a", "b", "c"].iter().enumerate() {
            let event = submit(&mut session, "alice", n).unwrap();
            assert_eq!(event.seq, i as u64 + 1);
        }
        assert_eq!(session.seq(), 3);
    }

    #[test]
    fn test_accept_move_open_session_returns_not_active() {
        let mut session = Session::new(SessionId::from("S1"), pid("alice"), Side::White);
        assert!(matches!(
            submit(&mut session, "alice", "n1"),
            Err(SessionError::NotActive {
                state: SessionState::Open,
                ..
            })
        ));
    }

    #[test]
    fn test_accept_move_stranger_returns_unknown_participant() {
        let mut session = active_session();
        assert!(matches!(
            submit(&mut session, "mallory", "n1"),
            Err(SessionError::UnknownParticipant { .. })
        ));
        assert_eq!(session.seq(), 0);
    }

    #[test]
    fn test_accept_move_repeated_nonce_returns_original_event() {
        let mut session = active_session();
        let first = submit(&mut session, "alice", "n1").unwrap();

        let err = submit(&mut session, "alice", "n1").unwrap_err();
        match err {
            SessionError::DuplicateSubmission(original) => assert_eq!(*original, first),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(session.seq(), 1);
    }

    #[test]
    fn test_accept_move_same_nonce_different_participant_is_new_move() {
        let mut session = active_session();
        submit(&mut session, "alice", "n1").unwrap();
        let bob = submit(&mut session, "bob", "n1").unwrap();
        assert_eq!(bob.seq, 2);
    }

    // =====================================================================
    // moves_after()
    // =====================================================================

    #[test]
    fn test_moves_after_returns_tail_in_order() {
        let mut session = active_session();
        for n in ["a", "b", "c", "d"] {
            submit(&mut session, "alice", n).unwrap();
        }

        let seqs: Vec<u64> = session.moves_after(2).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(session.moves_after(0).len(), 4);
    }

    #[test]
    fn test_moves_after_beyond_end_returns_empty() {
        let mut session = active_session();
        submit(&mut session, "alice", "a").unwrap();
        assert!(session.moves_after(1).is_empty());
        assert!(session.moves_after(u64::MAX).is_empty());
    }

    // =====================================================================
    // set_status() / close() / is_idle()
    // =====================================================================

    #[test]
    fn test_set_status_reports_change_once() {
        let mut session = active_session();
        assert!(session.set_status(&pid("bob"), ConnectionStatus::Connected).unwrap());
        assert!(!session.set_status(&pid("bob"), ConnectionStatus::Connected).unwrap());
        assert_eq!(
            session.snapshot().participants[1].status,
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn test_set_status_unknown_participant_returns_error() {
        let mut session = active_session();
        assert!(matches!(
            session.set_status(&pid("eve"), ConnectionStatus::Connected),
            Err(SessionError::UnknownParticipant { .. })
        ));
    }

    #[test]
    fn test_close_marks_closed_and_disconnects_everyone() {
        let mut session = active_session();
        session.set_status(&pid("alice"), ConnectionStatus::Connected).unwrap();
        session.close();

        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Closed);
        assert!(snap
            .participants
            .iter()
            .all(|p| p.status == ConnectionStatus::NotConnected));
    }

    #[test]
    fn test_is_idle_zero_timeout_is_always_idle() {
        let session = active_session();
        assert!(session.is_idle(Duration::ZERO));
        assert!(!session.is_idle(Duration::from_secs(3600)));
    }
}
