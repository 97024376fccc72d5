//! Per-message routing over the identity registry.
//!
//! Routing is identifier-keyed store-and-forward: a frame is either queued on
//! the target's connection immediately or dropped. Drops are logged and
//! counted but never reported back to the sender.

use std::sync::Arc;

use phosaic_proto::{DisplayGeometry, Envelope, MessageType, Role, SessionId, Signal};
use tracing::{debug, error, warn};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics::RelayMetrics;
use crate::registry::{IdentityRegistry, RegistryEntry, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `targetId` has no live entry in the table the message type routes to.
    UnresolvedTarget,
    /// Peer-to-peer traffic from a connection that never registered.
    UnregisteredSender,
    /// A message type clients must not send, such as `registered`.
    UnexpectedType,
    /// The target's connection closed or its queue is full.
    PeerGone,
    Malformed,
    AlreadyRegistered,
    /// No session identifier could be allocated.
    IdUnavailable,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::UnresolvedTarget => "unresolved_target",
            DropReason::UnregisteredSender => "unregistered_sender",
            DropReason::UnexpectedType => "unexpected_type",
            DropReason::PeerGone => "peer_gone",
            DropReason::Malformed => "malformed",
            DropReason::AlreadyRegistered => "already_registered",
            DropReason::IdUnavailable => "id_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Registered(SessionId),
    Delivered { target: SessionId },
    Dropped(DropReason),
}

#[derive(Clone)]
pub struct Router {
    registry: Arc<IdentityRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl Router {
    pub fn new(registry: Arc<IdentityRegistry>, metrics: Arc<RelayMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Parses one text frame from `from` and acts on it.
    pub fn handle_frame(&self, from: &ConnectionHandle, text: &str) -> RouteOutcome {
        match Envelope::parse(text) {
            Ok(envelope) => self.dispatch(from, envelope),
            Err(e) => {
                self.metrics.malformed_frames.inc();
                warn!(connection = %from.id(), error = %e, "malformed envelope");
                self.dropped(DropReason::Malformed)
            }
        }
    }

    /// Binary frames carry no envelope.
    pub fn handle_binary(&self, from: &ConnectionHandle, len: usize) -> RouteOutcome {
        self.metrics.malformed_frames.inc();
        warn!(connection = %from.id(), len, "binary frame ignored");
        self.dropped(DropReason::Malformed)
    }

    pub fn dispatch(&self, from: &ConnectionHandle, envelope: Envelope) -> RouteOutcome {
        match envelope {
            Envelope::RegisterSubordinate { geometry } => {
                self.register(from, Role::Subordinate, Some(geometry))
            }
            Envelope::RegisterCoordinator { subordinate_hint } => {
                if let Some(hint) = subordinate_hint {
                    debug!(connection = %from.id(), subordinate = %hint, "coordinator names a subordinate");
                }
                self.register(from, Role::Coordinator, None)
            }
            Envelope::Registered { .. } => {
                warn!(connection = %from.id(), "client sent a relay-only message");
                self.dropped(DropReason::UnexpectedType)
            }
            Envelope::Offer(signal) => self.route(from, MessageType::Offer, signal),
            Envelope::Answer(signal) => self.route(from, MessageType::Answer, signal),
            Envelope::IceCandidate(signal) => self.route(from, MessageType::IceCandidate, signal),
        }
    }

    /// Registers `handle` and queues the `registered` reply on it.
    pub fn register(
        &self,
        handle: &ConnectionHandle,
        role: Role,
        geometry: Option<DisplayGeometry>,
    ) -> RouteOutcome {
        let id = match self.registry.register(handle.clone(), role, geometry) {
            Ok(id) => id,
            Err(RegistryError::AlreadyRegistered { role: existing, id, .. }) => {
                warn!(connection = %handle.id(), %existing, session = %id, "duplicate registration rejected");
                return self.dropped(DropReason::AlreadyRegistered);
            }
            Err(e) => {
                error!(connection = %handle.id(), error = %e, "failed to allocate session id");
                return self.dropped(DropReason::IdUnavailable);
            }
        };

        self.metrics.registrations.with_label_values(&[role.as_str()]).inc();
        self.sync_gauges();

        match Envelope::registered(id.clone()).to_json() {
            Ok(frame) => {
                if let Err(e) = handle.try_deliver(frame) {
                    // The registration stands; the closing connection unregisters it.
                    warn!(connection = %handle.id(), session = %id, error = %e, "registered reply not delivered");
                }
            }
            Err(e) => error!(session = %id, error = %e, "failed to encode registered reply"),
        }

        RouteOutcome::Registered(id)
    }

    /// Forwards an offer, answer or candidate to its target, re-tagged with
    /// the sender's registered identifier.
    pub fn route(&self, from: &ConnectionHandle, kind: MessageType, signal: Signal) -> RouteOutcome {
        let Some(sender) = self.registry.entry_of(from.id()) else {
            warn!(connection = %from.id(), %kind, "message from unregistered connection");
            return self.dropped(DropReason::UnregisteredSender);
        };

        let target = match kind {
            MessageType::Offer => self.registry.resolve(Role::Subordinate, signal.target_id.as_str()),
            MessageType::Answer => self.registry.resolve(Role::Coordinator, signal.target_id.as_str()),
            MessageType::IceCandidate => self.registry.resolve_any(signal.target_id.as_str()),
            _ => {
                return self.dropped(DropReason::UnexpectedType);
            }
        };

        let Some(target) = target else {
            warn!(source = %sender.id, target = %signal.target_id, %kind, "unresolved target, dropping");
            return self.dropped(DropReason::UnresolvedTarget);
        };

        let forwarded = self.retag(kind, &sender, signal);
        let frame = match forwarded.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(%kind, error = %e, "failed to encode forwarded envelope");
                return self.dropped(DropReason::Malformed);
            }
        };

        match target.handle.try_deliver(frame) {
            Ok(()) => {
                self.metrics.messages_routed.with_label_values(&[kind.as_str()]).inc();
                debug!(source = %sender.id, target = %target.id, %kind, "forwarded");
                RouteOutcome::Delivered { target: target.id }
            }
            Err(e) => {
                warn!(source = %sender.id, target = %target.id, %kind, error = %e, "target unreachable, dropping");
                self.dropped(DropReason::PeerGone)
            }
        }
    }

    fn retag(&self, kind: MessageType, sender: &RegistryEntry, signal: Signal) -> Envelope {
        let geometry = sender.geometry.or(signal.geometry);
        let signal = signal.with_source(sender.id.clone());
        match kind {
            MessageType::Offer => Envelope::Offer(signal),
            // Coordinators size their output from the answer.
            MessageType::Answer => Envelope::Answer(signal.with_geometry(geometry)),
            _ => Envelope::IceCandidate(signal),
        }
    }

    /// Drops whatever `connection` registered. Safe for unregistered connections.
    pub fn unregister(&self, connection: ConnectionId) -> Option<RegistryEntry> {
        let entry = self.registry.unregister(connection);
        if entry.is_some() {
            self.sync_gauges();
        }
        entry
    }

    fn sync_gauges(&self) {
        self.metrics
            .registered_subordinates
            .set(self.registry.count(Role::Subordinate) as i64);
        self.metrics
            .registered_coordinators
            .set(self.registry.count(Role::Coordinator) as i64);
    }

    fn dropped(&self, reason: DropReason) -> RouteOutcome {
        self.metrics.messages_dropped.with_label_values(&[reason.as_str()]).inc();
        RouteOutcome::Dropped(reason)
    }
}
