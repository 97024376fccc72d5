//! Coordinator session state machine.
//!
//! Mirror image of the subordinate's negotiation half: the coordinator names
//! its subordinate up front, offers once it is registered, and applies the
//! answer it gets back. There is no display gating.

use phosaic_proto::{DisplayGeometry, Envelope, Payload, SessionId, Signal};
use tracing::{debug, info, warn};

use crate::session::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Registering,
    /// Registered; the local offer is being created
    Offering { id: SessionId },
    /// Offer sent, waiting for the answer
    AwaitingAnswer { id: SessionId },
    /// Answer applied
    Answered {
        id: SessionId,
        output: Option<DisplayGeometry>,
    },
    Connected {
        id: SessionId,
        output: Option<DisplayGeometry>,
    },
    Closed,
}

impl CoordinatorState {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "Idle",
            CoordinatorState::Registering => "Registering",
            CoordinatorState::Offering { .. } => "Offering",
            CoordinatorState::AwaitingAnswer { .. } => "AwaitingAnswer",
            CoordinatorState::Answered { .. } => "Answered",
            CoordinatorState::Connected { .. } => "Connected",
            CoordinatorState::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CoordinatorAction {
    OpenSignaling { register: Envelope },
    /// Create the data channel and a local offer; report back with `offer_created`.
    CreateOffer,
    Send(Envelope),
    ApplyAnswer(Payload),
    AddRemoteCandidate(Payload),
    Close,
}

#[derive(Debug)]
pub struct CoordinatorSession {
    subordinate: SessionId,
    state: CoordinatorState,
    stalled: bool,
    pending: Vec<Payload>,
}

impl CoordinatorSession {
    pub fn new(subordinate: SessionId) -> Self {
        Self {
            subordinate,
            state: CoordinatorState::Idle,
            stalled: false,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn subordinate(&self) -> &SessionId {
        &self.subordinate
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Output size the subordinate reported with its answer.
    pub fn output_geometry(&self) -> Option<DisplayGeometry> {
        match &self.state {
            CoordinatorState::Answered { output, .. } | CoordinatorState::Connected { output, .. } => *output,
            _ => None,
        }
    }

    fn invalid(&self, event: &str) -> SessionError {
        SessionError::InvalidState(format!("{} while {}", event, self.state.name()))
    }

    fn transition(&mut self, next: CoordinatorState) {
        debug!(from = self.state.name(), to = next.name(), "coordinator transition");
        self.state = next;
    }

    fn own_id(&self) -> Option<&SessionId> {
        match &self.state {
            CoordinatorState::Offering { id }
            | CoordinatorState::AwaitingAnswer { id }
            | CoordinatorState::Answered { id, .. }
            | CoordinatorState::Connected { id, .. } => Some(id),
            _ => None,
        }
    }

    fn check_source(&self, source: Option<SessionId>, kind: &'static str) -> Result<(), SessionError> {
        let source = source.ok_or(SessionError::MissingSource(kind))?;
        if source != self.subordinate {
            return Err(SessionError::UnexpectedPeer {
                expected: self.subordinate.clone(),
                got: source,
            });
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<Vec<CoordinatorAction>, SessionError> {
        if self.state != CoordinatorState::Idle {
            return Err(self.invalid("start"));
        }
        self.transition(CoordinatorState::Registering);
        Ok(vec![CoordinatorAction::OpenSignaling {
            register: Envelope::RegisterCoordinator {
                subordinate_hint: Some(self.subordinate.clone()),
            },
        }])
    }

    pub fn registered(&mut self, id: SessionId) -> Result<Vec<CoordinatorAction>, SessionError> {
        if self.state != CoordinatorState::Registering {
            return Err(self.invalid("registered"));
        }
        info!(session = %id, subordinate = %self.subordinate, "registered with relay");
        self.transition(CoordinatorState::Offering { id });
        Ok(vec![CoordinatorAction::CreateOffer])
    }

    pub fn offer_created(&mut self, offer: Payload) -> Result<Vec<CoordinatorAction>, SessionError> {
        let CoordinatorState::Offering { id } = &self.state else {
            return Err(self.invalid("offer created"));
        };
        let id = id.clone();
        let envelope = Envelope::offer(self.subordinate.clone(), id.clone(), offer);
        self.transition(CoordinatorState::AwaitingAnswer { id });
        Ok(vec![CoordinatorAction::Send(envelope)])
    }

    /// Applies the answer, then any candidates that arrived ahead of it.
    pub fn answer_received(&mut self, answer: Signal) -> Result<Vec<CoordinatorAction>, SessionError> {
        if self.stalled {
            return Err(SessionError::InvalidState("answer for a stalled negotiation".into()));
        }
        let CoordinatorState::AwaitingAnswer { id } = &self.state else {
            return Err(self.invalid("answer"));
        };
        let id = id.clone();
        self.check_source(answer.source_id, "answer")?;

        if let Some(output) = answer.geometry {
            info!(%output, "subordinate output size");
        }
        self.transition(CoordinatorState::Answered {
            id,
            output: answer.geometry,
        });

        let mut actions = vec![CoordinatorAction::ApplyAnswer(answer.payload)];
        actions.extend(self.pending.drain(..).map(CoordinatorAction::AddRemoteCandidate));
        Ok(actions)
    }

    pub fn negotiation_failed(&mut self, reason: &str) -> Result<Vec<CoordinatorAction>, SessionError> {
        match self.state {
            CoordinatorState::Offering { .. }
            | CoordinatorState::AwaitingAnswer { .. }
            | CoordinatorState::Answered { .. } => {
                warn!(reason, "negotiation failed, session stalled");
                self.stalled = true;
                Ok(Vec::new())
            }
            _ => Err(self.invalid("negotiation failure")),
        }
    }

    pub fn remote_candidate(&mut self, candidate: Signal) -> Result<Vec<CoordinatorAction>, SessionError> {
        match self.state {
            CoordinatorState::Offering { .. } | CoordinatorState::AwaitingAnswer { .. } => {
                self.check_source(candidate.source_id, "ice-candidate")?;
                self.pending.push(candidate.payload);
                Ok(Vec::new())
            }
            CoordinatorState::Answered { .. } | CoordinatorState::Connected { .. } => {
                self.check_source(candidate.source_id, "ice-candidate")?;
                Ok(vec![CoordinatorAction::AddRemoteCandidate(candidate.payload)])
            }
            _ => Err(self.invalid("remote candidate")),
        }
    }

    pub fn local_candidate(&mut self, candidate: Payload) -> Result<Vec<CoordinatorAction>, SessionError> {
        let Some(id) = self.own_id() else {
            return Err(self.invalid("local candidate"));
        };
        Ok(vec![CoordinatorAction::Send(Envelope::ice_candidate(
            self.subordinate.clone(),
            id.clone(),
            candidate,
        ))])
    }

    pub fn data_channel_open(&mut self) -> Result<Vec<CoordinatorAction>, SessionError> {
        let CoordinatorState::Answered { id, output } = &self.state else {
            return Err(self.invalid("data channel open"));
        };
        let next = CoordinatorState::Connected {
            id: id.clone(),
            output: *output,
        };
        info!(subordinate = %self.subordinate, "data channel open");
        self.transition(next);
        Ok(Vec::new())
    }

    /// ICE failure or signaling loss. Repeated calls are no-ops.
    pub fn closed(&mut self) -> Result<Vec<CoordinatorAction>, SessionError> {
        if self.state == CoordinatorState::Closed {
            return Ok(Vec::new());
        }
        self.transition(CoordinatorState::Closed);
        self.pending.clear();
        Ok(vec![CoordinatorAction::Close])
    }
}
