//! Subordinate session state machine.
//!
//! The machine is pure: every external event is one method call that either
//! moves the session forward and returns the side effects the driver must
//! perform, or rejects the event and leaves the state untouched. Nothing here
//! touches the network, the display or the peer connection.

use std::fmt;

use phosaic_proto::{DisplayGeometry, Envelope, Payload, SessionId, Signal};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("message from unexpected peer {got} (session is fixed to {expected})")]
    UnexpectedPeer { expected: SessionId, got: SessionId },
    #[error("{0} without a sourceId")]
    MissingSource(&'static str),
}

/// State of the subordinate session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Page loaded, nothing requested yet
    Idle,
    /// Waiting for the user gesture that enters full-display mode
    AwaitingFullscreen,
    /// Waiting for the layout to settle so geometry can be read
    CapturingGeometry,
    /// Signaling opened, registration sent
    Registering { geometry: DisplayGeometry },
    /// Identifier assigned and shown; waiting for an offer
    Registered {
        id: SessionId,
        geometry: DisplayGeometry,
    },
    /// Offer received from `coordinator`
    Negotiating {
        id: SessionId,
        geometry: DisplayGeometry,
        coordinator: SessionId,
        /// The local answer exists and has been sent.
        answered: bool,
    },
    /// Direct data channel open
    Connected {
        id: SessionId,
        geometry: DisplayGeometry,
        coordinator: SessionId,
    },
    /// Signaling transport lost; terminal until `restart`
    Disconnected,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::AwaitingFullscreen => "AwaitingFullscreen",
            SessionState::CapturingGeometry => "CapturingGeometry",
            SessionState::Registering { .. } => "Registering",
            SessionState::Registered { .. } => "Registered",
            SessionState::Negotiating { .. } => "Negotiating",
            SessionState::Connected { .. } => "Connected",
            SessionState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effect requested by a transition, performed by the driver in order.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Ask the user for the gesture that enters full-display mode.
    PromptFullscreen,
    /// Start the settle barrier and report back with `geometry_captured`.
    CaptureGeometry,
    /// Open the signaling channel and send `register` on it.
    OpenSignaling { register: Envelope },
    /// Render the identifier as a pairing token.
    ShowPairingToken(SessionId),
    /// Set the offer as remote description and create an answer.
    ApplyOffer(Payload),
    Send(Envelope),
    AddRemoteCandidate(Payload),
    /// Tear down the peer connection.
    Close,
}

/// Remote candidates held before the answer exists. Anything past this is dropped.
pub const MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug)]
pub struct SubordinateSession {
    state: SessionState,
    stalled: bool,
    /// Remote candidates that arrived before the remote description was usable.
    pending: Vec<(SessionId, Payload)>,
}

impl Default for SubordinateSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SubordinateSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            stalled: false,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True once a negotiation error has left the session stuck in `Negotiating`.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match &self.state {
            SessionState::Registered { id, .. }
            | SessionState::Negotiating { id, .. }
            | SessionState::Connected { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn coordinator(&self) -> Option<&SessionId> {
        match &self.state {
            SessionState::Negotiating { coordinator, .. } | SessionState::Connected { coordinator, .. } => {
                Some(coordinator)
            }
            _ => None,
        }
    }

    pub fn geometry(&self) -> Option<DisplayGeometry> {
        match &self.state {
            SessionState::Registering { geometry }
            | SessionState::Registered { geometry, .. }
            | SessionState::Negotiating { geometry, .. }
            | SessionState::Connected { geometry, .. } => Some(*geometry),
            _ => None,
        }
    }

    /// Number of remote candidates waiting for the answer.
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    fn invalid(&self, event: &str) -> SessionError {
        SessionError::InvalidState(format!("{} while {}", event, self.state))
    }

    fn queue_candidate(&mut self, source: SessionId, candidate: Payload) {
        if self.pending.len() >= MAX_PENDING_CANDIDATES {
            warn!(%source, limit = MAX_PENDING_CANDIDATES, "candidate queue full, dropping candidate");
            return;
        }
        self.pending.push((source, candidate));
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }

    pub fn load(&mut self, already_fullscreen: bool) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("load"));
        }

        if already_fullscreen {
            self.transition(SessionState::CapturingGeometry);
            Ok(vec![SessionAction::CaptureGeometry])
        } else {
            self.transition(SessionState::AwaitingFullscreen);
            Ok(vec![SessionAction::PromptFullscreen])
        }
    }

    pub fn fullscreen_entered(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::AwaitingFullscreen {
            return Err(self.invalid("fullscreen entered"));
        }
        self.transition(SessionState::CapturingGeometry);
        Ok(vec![SessionAction::CaptureGeometry])
    }

    /// Freezes `geometry` and opens signaling with it as the registration.
    pub fn geometry_captured(&mut self, geometry: DisplayGeometry) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::CapturingGeometry {
            return Err(self.invalid("geometry captured"));
        }

        info!(%geometry, "display geometry captured");
        self.transition(SessionState::Registering { geometry });
        Ok(vec![SessionAction::OpenSignaling {
            register: Envelope::RegisterSubordinate { geometry },
        }])
    }

    pub fn registered(&mut self, id: SessionId) -> Result<Vec<SessionAction>, SessionError> {
        let SessionState::Registering { geometry } = self.state else {
            return Err(self.invalid("registered"));
        };

        info!(session = %id, "registered with relay");
        self.transition(SessionState::Registered {
            id: id.clone(),
            geometry,
        });
        Ok(vec![SessionAction::ShowPairingToken(id)])
    }

    /// Fixes the offer's sender as this session's coordinator.
    pub fn offer_received(&mut self, offer: Signal) -> Result<Vec<SessionAction>, SessionError> {
        let SessionState::Registered { id, geometry } = &self.state else {
            return Err(self.invalid("offer"));
        };
        let coordinator = offer.source_id.ok_or(SessionError::MissingSource("offer"))?;

        info!(%coordinator, "offer received");
        let next = SessionState::Negotiating {
            id: id.clone(),
            geometry: *geometry,
            coordinator,
            answered: false,
        };
        self.transition(next);
        Ok(vec![SessionAction::ApplyOffer(offer.payload)])
    }

    /// Sends the answer, then releases candidates queued for the coordinator.
    pub fn answer_created(&mut self, answer: Payload) -> Result<Vec<SessionAction>, SessionError> {
        if self.stalled {
            return Err(SessionError::InvalidState("answer created for a stalled negotiation".into()));
        }
        let current = self.state.name();
        let SessionState::Negotiating {
            id,
            coordinator,
            answered: answered @ false,
            ..
        } = &mut self.state
        else {
            return Err(SessionError::InvalidState(format!("answer created while {}", current)));
        };
        *answered = true;

        let mut actions = vec![SessionAction::Send(Envelope::answer(
            coordinator.clone(),
            id.clone(),
            answer,
        ))];

        let coordinator = coordinator.clone();
        for (source, candidate) in self.pending.drain(..) {
            if source == coordinator {
                actions.push(SessionAction::AddRemoteCandidate(candidate));
            } else {
                warn!(%source, %coordinator, "discarding queued candidate from another peer");
            }
        }

        debug!(released = actions.len() - 1, "answer sent");
        Ok(actions)
    }

    /// Records a failed remote-description or answer step. The session stays
    /// in `Negotiating`; nothing is retried.
    pub fn negotiation_failed(&mut self, reason: &str) -> Result<Vec<SessionAction>, SessionError> {
        if !matches!(self.state, SessionState::Negotiating { .. }) {
            return Err(self.invalid("negotiation failure"));
        }
        warn!(reason, "negotiation failed, session stalled");
        self.stalled = true;
        Ok(Vec::new())
    }

    pub fn remote_candidate(&mut self, candidate: Signal) -> Result<Vec<SessionAction>, SessionError> {
        let source = candidate
            .source_id
            .ok_or(SessionError::MissingSource("ice-candidate"))?;

        match &self.state {
            SessionState::Registered { .. } => {
                self.queue_candidate(source, candidate.payload);
                Ok(Vec::new())
            }
            SessionState::Negotiating {
                coordinator,
                answered,
                ..
            } => {
                if source != *coordinator {
                    return Err(SessionError::UnexpectedPeer {
                        expected: coordinator.clone(),
                        got: source,
                    });
                }
                if *answered {
                    Ok(vec![SessionAction::AddRemoteCandidate(candidate.payload)])
                } else {
                    self.queue_candidate(source, candidate.payload);
                    Ok(Vec::new())
                }
            }
            SessionState::Connected { coordinator, .. } => {
                if source != *coordinator {
                    return Err(SessionError::UnexpectedPeer {
                        expected: coordinator.clone(),
                        got: source,
                    });
                }
                Ok(vec![SessionAction::AddRemoteCandidate(candidate.payload)])
            }
            _ => Err(self.invalid("remote candidate")),
        }
    }

    /// Addresses a locally gathered candidate to the fixed coordinator.
    pub fn local_candidate(&mut self, candidate: Payload) -> Result<Vec<SessionAction>, SessionError> {
        match &self.state {
            SessionState::Negotiating { id, coordinator, .. } | SessionState::Connected { id, coordinator, .. } => {
                Ok(vec![SessionAction::Send(Envelope::ice_candidate(
                    coordinator.clone(),
                    id.clone(),
                    candidate,
                ))])
            }
            _ => Err(self.invalid("local candidate")),
        }
    }

    pub fn data_channel_open(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        let SessionState::Negotiating {
            id,
            geometry,
            coordinator,
            answered: true,
        } = &self.state
        else {
            return Err(self.invalid("data channel open"));
        };
        if self.stalled {
            return Err(SessionError::InvalidState("data channel open on a stalled negotiation".into()));
        }

        info!(%coordinator, "data channel open");
        let next = SessionState::Connected {
            id: id.clone(),
            geometry: *geometry,
            coordinator: coordinator.clone(),
        };
        self.transition(next);
        Ok(Vec::new())
    }

    /// Signaling transport lost. Valid from any state; repeated calls are no-ops.
    pub fn transport_closed(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.state == SessionState::Disconnected {
            return Ok(Vec::new());
        }
        info!(from = %self.state, "signaling closed");
        self.transition(SessionState::Disconnected);
        self.pending.clear();
        Ok(vec![SessionAction::Close])
    }

    /// Starts over from `Idle`. The old identifier is not resumed.
    pub fn restart(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(self.invalid("restart"));
        }
        *self = Self::new();
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phosaic_proto::payload_from_value;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        payload_from_value(&value).unwrap()
    }

    fn geometry() -> DisplayGeometry {
        DisplayGeometry::new(1280, 720).unwrap()
    }

    fn signal(target: &str, source: &str, body: serde_json::Value) -> Signal {
        Signal::new(target.into(), payload(body)).with_source(source.into())
    }

    fn registered() -> SubordinateSession {
        let mut session = SubordinateSession::new();
        session.load(true).unwrap();
        session.geometry_captured(geometry()).unwrap();
        session.registered("abc123".into()).unwrap();
        session
    }

    fn negotiating() -> SubordinateSession {
        let mut session = registered();
        session
            .offer_received(signal("abc123", "coord1", json!({"type": "offer", "sdp": "v=0"})))
            .unwrap();
        session
    }

    #[test]
    fn load_prompts_for_fullscreen() {
        let mut session = SubordinateSession::new();
        let actions = session.load(false).unwrap();
        assert!(matches!(actions.as_slice(), [SessionAction::PromptFullscreen]));
        assert_eq!(session.state(), &SessionState::AwaitingFullscreen);

        let actions = session.fullscreen_entered().unwrap();
        assert!(matches!(actions.as_slice(), [SessionAction::CaptureGeometry]));
        assert_eq!(session.state(), &SessionState::CapturingGeometry);
    }

    #[test]
    fn already_fullscreen_skips_prompt() {
        let mut session = SubordinateSession::new();
        let actions = session.load(true).unwrap();
        assert!(matches!(actions.as_slice(), [SessionAction::CaptureGeometry]));
    }

    #[test]
    fn signaling_opens_only_with_geometry() {
        let mut session = SubordinateSession::new();
        session.load(false).unwrap();
        assert!(session.geometry_captured(geometry()).is_err());

        session.fullscreen_entered().unwrap();
        let actions = session.geometry_captured(geometry()).unwrap();
        match actions.as_slice() {
            [SessionAction::OpenSignaling { register: Envelope::RegisterSubordinate { geometry: g } }] => {
                assert_eq!(*g, geometry());
            }
            other => panic!("unexpected actions: {:?}", other),
        }
        // Frozen: a second capture is rejected.
        assert!(session.geometry_captured(DisplayGeometry::new(1, 1).unwrap()).is_err());
    }

    #[test]
    fn registration_shows_pairing_token() {
        let mut session = SubordinateSession::new();
        session.load(true).unwrap();
        session.geometry_captured(geometry()).unwrap();
        let actions = session.registered("abc123".into()).unwrap();
        assert!(matches!(actions.as_slice(), [SessionAction::ShowPairingToken(id)] if id.as_str() == "abc123"));
        assert_eq!(session.session_id().map(SessionId::as_str), Some("abc123"));
    }

    #[test]
    fn offer_fixes_coordinator_and_answer_is_addressed_to_it() {
        let mut session = registered();
        let actions = session
            .offer_received(signal("abc123", "coord1", json!({"type": "offer", "sdp": "v=0"})))
            .unwrap();
        assert!(matches!(actions.as_slice(), [SessionAction::ApplyOffer(_)]));
        assert_eq!(session.coordinator().map(SessionId::as_str), Some("coord1"));

        let actions = session.answer_created(payload(json!({"type": "answer", "sdp": "v=0"}))).unwrap();
        let [SessionAction::Send(envelope)] = actions.as_slice() else {
            panic!("unexpected actions: {:?}", actions);
        };
        let wire: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(wire["type"], "answer");
        assert_eq!(wire["targetId"], "coord1");
        assert_eq!(wire["sourceId"], "abc123");
    }

    #[test]
    fn offer_without_source_is_rejected() {
        let mut session = registered();
        let offer = Signal::new("abc123".into(), payload(json!({})));
        let err = session.offer_received(offer).unwrap_err();
        assert_eq!(err, SessionError::MissingSource("offer"));
        assert!(matches!(session.state(), SessionState::Registered { .. }));
    }

    #[test]
    fn offer_while_connected_is_rejected() {
        let mut session = negotiating();
        session.answer_created(payload(json!({}))).unwrap();
        session.data_channel_open().unwrap();

        let err = session
            .offer_received(signal("abc123", "coord2", json!({})))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert!(matches!(session.state(), SessionState::Connected { .. }));
    }

    #[test]
    fn early_candidates_wait_for_the_answer() {
        let mut session = registered();
        session.remote_candidate(signal("abc123", "coord1", json!({"candidate": "a"}))).unwrap();
        session
            .offer_received(signal("abc123", "coord1", json!({"type": "offer"})))
            .unwrap();
        let actions = session.remote_candidate(signal("abc123", "coord1", json!({"candidate": "b"}))).unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.pending_candidates(), 2);

        let actions = session.answer_created(payload(json!({}))).unwrap();
        let released: Vec<String> = actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::AddRemoteCandidate(p) => Some(p.get().to_string()),
                _ => None,
            })
            .collect();
        assert!(matches!(actions[0], SessionAction::Send(_)));
        assert_eq!(released, vec![r#"{"candidate":"a"}"#, r#"{"candidate":"b"}"#]);
        assert_eq!(session.pending_candidates(), 0);
    }

    #[test]
    fn queued_candidates_from_other_peers_are_discarded() {
        let mut session = registered();
        session.remote_candidate(signal("abc123", "stranger", json!({"candidate": "x"}))).unwrap();
        session
            .offer_received(signal("abc123", "coord1", json!({})))
            .unwrap();
        let actions = session.answer_created(payload(json!({}))).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn candidate_queue_is_capped() {
        let mut session = registered();
        for n in 0..10_000 {
            let actions = session
                .remote_candidate(signal("abc123", &format!("stranger{}", n), json!({"candidate": n})))
                .unwrap();
            assert!(actions.is_empty());
        }
        assert_eq!(session.pending_candidates(), MAX_PENDING_CANDIDATES);

        // The coordinator's own candidates still count against the same limit.
        session
            .offer_received(signal("abc123", "coord1", json!({"type": "offer"})))
            .unwrap();
        session.remote_candidate(signal("abc123", "coord1", json!({"candidate": "late"}))).unwrap();
        assert_eq!(session.pending_candidates(), MAX_PENDING_CANDIDATES);

        let actions = session.answer_created(payload(json!({}))).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(session.pending_candidates(), 0);
    }

    #[test]
    fn candidates_from_another_peer_are_rejected_mid_negotiation() {
        let mut session = negotiating();
        let err = session
            .remote_candidate(signal("abc123", "coord2", json!({})))
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::UnexpectedPeer { expected: "coord1".into(), got: "coord2".into() }
        );
    }

    #[test]
    fn local_candidates_need_a_coordinator() {
        let mut session = registered();
        assert!(session.local_candidate(payload(json!({}))).is_err());

        let mut session = negotiating();
        let actions = session.local_candidate(payload(json!({"candidate": "l"}))).unwrap();
        let [SessionAction::Send(Envelope::IceCandidate(signal))] = actions.as_slice() else {
            panic!("unexpected actions: {:?}", actions);
        };
        assert_eq!(signal.target_id.as_str(), "coord1");
        assert_eq!(signal.source_id.as_ref().map(SessionId::as_str), Some("abc123"));
    }

    #[test]
    fn negotiation_failure_stalls_without_reverting() {
        let mut session = negotiating();
        session.negotiation_failed("bad sdp").unwrap();

        assert!(session.is_stalled());
        assert!(matches!(session.state(), SessionState::Negotiating { answered: false, .. }));

        assert!(session.answer_created(payload(json!({}))).is_err());
        assert!(session.data_channel_open().is_err());
        assert!(session
            .offer_received(signal("abc123", "coord1", json!({})))
            .is_err());
        assert!(matches!(session.state(), SessionState::Negotiating { .. }));
        assert!(session.is_stalled());
    }

    #[test]
    fn data_channel_requires_an_answer() {
        let mut session = negotiating();
        assert!(session.data_channel_open().is_err());
        session.answer_created(payload(json!({}))).unwrap();
        session.data_channel_open().unwrap();
        assert!(matches!(session.state(), SessionState::Connected { .. }));
    }

    #[test]
    fn transport_close_is_reachable_from_anywhere() {
        for mut session in [SubordinateSession::new(), registered(), negotiating()] {
            let actions = session.transport_closed().unwrap();
            assert!(matches!(actions.as_slice(), [SessionAction::Close]));
            assert_eq!(session.state(), &SessionState::Disconnected);
            assert!(session.transport_closed().unwrap().is_empty());
        }
    }

    #[test]
    fn restart_returns_to_idle_without_the_old_id() {
        let mut session = negotiating();
        assert!(session.restart().is_err());

        session.transport_closed().unwrap();
        session.restart().unwrap();
        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.session_id().is_none());
        assert!(!session.is_stalled());
    }
}
