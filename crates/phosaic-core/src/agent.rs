//! Async driver for the subordinate session.
//!
//! Owns the capabilities the state machine asks for (display, geometry,
//! signaling, peer connection, pairing display) and feeds it one event at a
//! time from a single `select!` loop.

use std::collections::VecDeque;
use std::sync::Arc;

use phosaic_proto::Envelope;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, DisplayEnvironment, GeometrySource, SettleConfig, SettledGeometry};
use crate::pairing::PairingDisplay;
use crate::peer::{PeerConnection, PeerError, PeerEvent, PeerFactory};
use crate::session::{SessionAction, SessionError, SessionState, SubordinateSession};
use crate::signaling::{SignalingChannel, SignalingConnector, SignalingError};
use crate::wait::{next_envelope, next_peer_event};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("display not ready: {0}")]
    Capture(#[from] CaptureError),
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),
    #[error("peer connection failed: {0}")]
    Peer(#[from] PeerError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Everything the subordinate needs from its surroundings.
pub struct AgentParts {
    pub environment: Arc<dyn DisplayEnvironment>,
    pub geometry: Arc<dyn GeometrySource>,
    pub settle: SettleConfig,
    pub signaling: Arc<dyn SignalingConnector>,
    pub peers: Arc<dyn PeerFactory>,
    pub pairing: Arc<dyn PairingDisplay>,
}

pub struct SubordinateAgent {
    parts: AgentParts,
    session: SubordinateSession,
    channel: Option<SignalingChannel>,
    peer: Option<Arc<dyn PeerConnection>>,
    peer_events: Option<tokio::sync::mpsc::Receiver<PeerEvent>>,
}

impl SubordinateAgent {
    pub fn new(parts: AgentParts) -> Self {
        Self {
            parts,
            session: SubordinateSession::new(),
            channel: None,
            peer: None,
            peer_events: None,
        }
    }

    pub fn session(&self) -> &SubordinateSession {
        &self.session
    }

    /// Runs one session: display readiness, registration, then negotiation
    /// until the signaling transport closes.
    ///
    /// Errors before registration (display, geometry, relay unreachable) end
    /// the run. Once registered, rejected events and peer failures are logged
    /// and the loop keeps going.
    pub async fn run(&mut self) -> Result<(), DriverError> {
        let actions = self.session.load(self.parts.environment.is_fullscreen())?;
        self.perform(actions).await?;

        if self.channel.is_none() {
            return Err(SessionError::InvalidState(format!(
                "signaling not opened after startup ({})",
                self.session.state()
            ))
            .into());
        }

        loop {
            tokio::select! {
                envelope = next_envelope(&mut self.channel) => match envelope {
                    Some(envelope) => self.on_envelope(envelope).await?,
                    None => {
                        let actions = self.session.transport_closed()?;
                        self.perform(actions).await?;
                        self.channel = None;
                        return Ok(());
                    }
                },
                event = next_peer_event(&mut self.peer_events) => match event {
                    Some(event) => self.on_peer_event(event).await?,
                    None => {
                        debug!("peer event stream ended");
                        self.peer_events = None;
                    }
                },
            }
        }
    }

    /// Starts over after a disconnect, with a fresh identifier.
    pub async fn restart(&mut self) -> Result<(), DriverError> {
        self.session.restart()?;
        self.run().await
    }

    async fn on_envelope(&mut self, envelope: Envelope) -> Result<(), DriverError> {
        debug!(kind = %envelope.message_type(), "signaling message");
        let result = match envelope {
            Envelope::Registered { id } => self.session.registered(id),
            Envelope::Offer(offer) => self.session.offer_received(offer),
            Envelope::IceCandidate(candidate) => self.session.remote_candidate(candidate),
            other => {
                warn!(kind = %other.message_type(), "unexpected message for a subordinate");
                return Ok(());
            }
        };
        self.apply(result).await
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Result<(), DriverError> {
        let result = match event {
            PeerEvent::LocalCandidate(candidate) => self.session.local_candidate(candidate),
            PeerEvent::DataChannelOpen { label } => {
                info!(%label, "data channel open");
                self.session.data_channel_open()
            }
            PeerEvent::DataChannelMessage { label, text } => {
                info!(%label, "Received message: {}", text);
                return Ok(());
            }
            PeerEvent::ConnectionFailed => {
                warn!("peer connection failed");
                return Ok(());
            }
            PeerEvent::Closed => {
                info!("peer connection closed");
                return Ok(());
            }
        };
        self.apply(result).await
    }

    async fn apply(&mut self, result: Result<Vec<SessionAction>, SessionError>) -> Result<(), DriverError> {
        match result {
            Ok(actions) => self.perform(actions).await,
            Err(e) => {
                warn!(state = %self.session.state(), "event rejected: {}", e);
                Ok(())
            }
        }
    }

    /// Executes actions in order. Actions that complete synchronously feed
    /// their follow-up events straight back into the machine.
    async fn perform(&mut self, actions: Vec<SessionAction>) -> Result<(), DriverError> {
        let mut queue: VecDeque<SessionAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::PromptFullscreen => {
                    info!("waiting for full-display mode");
                    self.parts.environment.request_fullscreen().await?;
                    queue.extend(self.session.fullscreen_entered()?);
                }
                SessionAction::CaptureGeometry => {
                    let barrier = SettledGeometry::new(self.parts.geometry.clone(), self.parts.settle);
                    let geometry = barrier.capture().await?;
                    queue.extend(self.session.geometry_captured(geometry)?);
                }
                SessionAction::OpenSignaling { register } => {
                    let channel = self.parts.signaling.connect().await?;
                    channel.send(register).await?;
                    self.channel = Some(channel);
                }
                SessionAction::ShowPairingToken(id) => {
                    if let Err(e) = self.parts.pairing.show(&id) {
                        error!("Failed to show pairing token: {}", e);
                    }
                }
                SessionAction::ApplyOffer(offer) => {
                    let peer = self.ensure_peer().await?;
                    match peer.accept_offer(&offer).await {
                        Ok(answer) => queue.extend(self.session.answer_created(answer)?),
                        Err(e) => {
                            error!("Error handling offer: {}", e);
                            queue.extend(self.session.negotiation_failed(&e.to_string())?);
                        }
                    }
                }
                SessionAction::Send(envelope) => self.send(envelope).await,
                SessionAction::AddRemoteCandidate(candidate) => match &self.peer {
                    Some(peer) => {
                        if let Err(e) = peer.add_remote_candidate(&candidate).await {
                            warn!("Error adding received ICE candidate: {}", e);
                        }
                    }
                    None => warn!("dropping remote candidate, no peer connection"),
                },
                SessionAction::Close => self.close_peer().await,
            }
        }
        Ok(())
    }

    async fn ensure_peer(&mut self) -> Result<Arc<dyn PeerConnection>, DriverError> {
        if let Some(peer) = &self.peer {
            return Ok(peer.clone());
        }
        let handle = self.parts.peers.create().await?;
        self.peer = Some(handle.connection.clone());
        self.peer_events = Some(handle.events);
        Ok(handle.connection)
    }

    async fn send(&self, envelope: Envelope) {
        let Some(channel) = &self.channel else {
            warn!(kind = %envelope.message_type(), "no signaling channel, message dropped");
            return;
        };
        if let Err(e) = channel.send(envelope).await {
            // The receive side reports the loss and drives the close.
            warn!("signaling send failed: {}", e);
        }
    }

    async fn close_peer(&mut self) {
        self.peer_events = None;
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Error closing peer connection: {}", e);
            }
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.session.state(), SessionState::Disconnected)
    }
}
