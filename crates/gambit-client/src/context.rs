use gambit_protocol::{ParticipantId, SessionId, SessionSnapshot, Side};

/// Who this client is, and in which session.
///
/// Usually built from a lobby reply: [`SessionContext::new`] after
/// `create_session`, or from the joined snapshot after `join_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub side: Side,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<SessionId>,
        participant_id: impl Into<ParticipantId>,
        side: Side,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            side,
        }
    }

    /// Builds the context for `participant_id` from a session snapshot,
    /// e.g. the one returned by a join. `None` if they aren't in it.
    pub fn from_snapshot(snapshot: &SessionSnapshot, participant_id: &ParticipantId) -> Option<Self> {
        snapshot.participant(participant_id).map(|p| Self {
            session_id: snapshot.session_id.clone(),
            participant_id: p.id.clone(),
            side: p.side,
        })
    }
}
