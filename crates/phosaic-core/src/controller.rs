//! Async driver for the coordinator session.

use std::collections::VecDeque;
use std::sync::Arc;

use phosaic_proto::{Envelope, SessionId};
use tracing::{debug, error, info, warn};

use crate::agent::DriverError;
use crate::coordinator::{CoordinatorAction, CoordinatorSession, CoordinatorState};
use crate::peer::{PeerConnection, PeerEvent, PeerFactory};
use crate::session::SessionError;
use crate::signaling::{SignalingChannel, SignalingConnector};
use crate::wait::{next_envelope, next_peer_event};

pub const DATA_CHANNEL_LABEL: &str = "chat";
pub const DEFAULT_GREETING: &str = "Hello from coordinator!";

pub struct CoordinatorClient {
    session: CoordinatorSession,
    signaling: Arc<dyn SignalingConnector>,
    peers: Arc<dyn PeerFactory>,
    greeting: String,
    channel: Option<SignalingChannel>,
    peer: Option<Arc<dyn PeerConnection>>,
    peer_events: Option<tokio::sync::mpsc::Receiver<PeerEvent>>,
    received: Vec<String>,
}

impl CoordinatorClient {
    pub fn new(subordinate: SessionId, signaling: Arc<dyn SignalingConnector>, peers: Arc<dyn PeerFactory>) -> Self {
        Self {
            session: CoordinatorSession::new(subordinate),
            signaling,
            peers,
            greeting: DEFAULT_GREETING.to_string(),
            channel: None,
            peer: None,
            peer_events: None,
            received: Vec::new(),
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    pub fn session(&self) -> &CoordinatorSession {
        &self.session
    }

    /// Data-channel messages received so far.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Registers, offers to the subordinate and services the connection until
    /// either ICE fails or the relay goes away.
    pub async fn run(&mut self) -> Result<(), DriverError> {
        let actions = self.session.start()?;
        self.perform(actions).await?;

        while *self.session.state() != CoordinatorState::Closed {
            tokio::select! {
                envelope = next_envelope(&mut self.channel) => match envelope {
                    Some(envelope) => self.on_envelope(envelope).await?,
                    None => {
                        info!("signaling connection closed");
                        let actions = self.session.closed()?;
                        self.perform(actions).await?;
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
        self.channel = None;
        Ok(())
    }

    /// Closes the session and its peer connection. For callers that stop
    /// polling `run` early; a no-op once the session is closed.
    pub async fn shutdown(&mut self) -> Result<(), DriverError> {
        let actions = self.session.closed()?;
        self.perform(actions).await?;
        self.channel = None;
        Ok(())
    }

    async fn on_envelope(&mut self, envelope: Envelope) -> Result<(), DriverError> {
        debug!(kind = %envelope.message_type(), "signaling message");
        let result = match envelope {
            Envelope::Registered { id } => self.session.registered(id),
            Envelope::Answer(answer) => self.session.answer_received(answer),
            Envelope::IceCandidate(candidate) => self.session.remote_candidate(candidate),
            other => {
                warn!(kind = %other.message_type(), "unexpected message for a coordinator");
                return Ok(());
            }
        };
        self.apply(result).await
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Result<(), DriverError> {
        let result = match event {
            PeerEvent::LocalCandidate(candidate) => self.session.local_candidate(candidate),
            PeerEvent::DataChannelOpen { label } => {
                info!(%label, "Data channel opened");
                let result = self.session.data_channel_open();
                if result.is_ok() {
                    self.greet().await;
                }
                result
            }
            PeerEvent::DataChannelMessage { label, text } => {
                info!(%label, "Received message: {}", text);
                self.received.push(text);
                return Ok(());
            }
            PeerEvent::ConnectionFailed => {
                warn!("ICE connection failed, closing");
                self.session.closed()
            }
            PeerEvent::Closed => {
                info!("peer connection closed");
                return Ok(());
            }
        };
        self.apply(result).await
    }

    async fn greet(&self) {
        if let Some(peer) = &self.peer {
            if let Err(e) = peer.send_text(&self.greeting).await {
                warn!("Failed to send greeting: {}", e);
            }
        }
    }

    async fn apply(&mut self, result: Result<Vec<CoordinatorAction>, SessionError>) -> Result<(), DriverError> {
        match result {
            Ok(actions) => self.perform(actions).await,
            Err(e) => {
                warn!(state = self.session.state().name(), "event rejected: {}", e);
                Ok(())
            }
        }
    }

    async fn perform(&mut self, actions: Vec<CoordinatorAction>) -> Result<(), DriverError> {
        let mut queue: VecDeque<CoordinatorAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                CoordinatorAction::OpenSignaling { register } => {
                    let channel = self.signaling.connect().await?;
                    channel.send(register).await?;
                    self.channel = Some(channel);
                }
                CoordinatorAction::CreateOffer => {
                    let handle = self.peers.create().await?;
                    self.peer = Some(handle.connection.clone());
                    self.peer_events = Some(handle.events);
                    match handle.connection.create_offer(DATA_CHANNEL_LABEL).await {
                        Ok(offer) => queue.extend(self.session.offer_created(offer)?),
                        Err(e) => {
                            error!("Failed to create offer: {}", e);
                            queue.extend(self.session.negotiation_failed(&e.to_string())?);
                        }
                    }
                }
                CoordinatorAction::Send(envelope) => match &self.channel {
                    Some(channel) => {
                        if let Err(e) = channel.send(envelope).await {
                            warn!("signaling send failed: {}", e);
                        }
                    }
                    None => warn!(kind = %envelope.message_type(), "no signaling channel, message dropped"),
                },
                CoordinatorAction::ApplyAnswer(answer) => {
                    let Some(peer) = self.peer.clone() else {
                        warn!("answer without a peer connection");
                        continue;
                    };
                    if let Err(e) = peer.apply_answer(&answer).await {
                        error!("Failed to apply answer: {}", e);
                        queue.extend(self.session.negotiation_failed(&e.to_string())?);
                    }
                }
                CoordinatorAction::AddRemoteCandidate(candidate) => match &self.peer {
                    Some(peer) => {
                        if let Err(e) = peer.add_remote_candidate(&candidate).await {
                            warn!("Error adding received ICE candidate: {}", e);
                        }
                    }
                    None => warn!("dropping remote candidate, no peer connection"),
                },
                CoordinatorAction::Close => {
                    self.peer_events = None;
                    if let Some(peer) = self.peer.take() {
                        if let Err(e) = peer.close().await {
                            warn!("Error closing peer connection: {}", e);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
