//! Typed signaling envelopes and their JSON wire form.
//!
//! The wire shape is flat: `{"type": ..., "id" | "sourceId" | "targetId": ...,
//! "offer" | "answer" | "candidate": {...}, "width": .., "height": ..}`.
//! Session descriptions and candidates are kept as raw JSON so the relay can
//! forward them without re-encoding a single byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::types::{DisplayGeometry, SessionId};

/// Opaque offer/answer/candidate body, preserved byte-for-byte.
pub type Payload = Box<RawValue>;

/// Converts a JSON value into an opaque payload.
pub fn payload_from_value(value: &serde_json::Value) -> Result<Payload, EnvelopeError> {
    Ok(serde_json::value::to_raw_value(value)?)
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("{kind} is missing required field `{field}`")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },
    #[error("invalid display geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RegisterSubordinate,
    RegisterCoordinator,
    Registered,
    Offer,
    Answer,
    IceCandidate,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::RegisterSubordinate => "register-subordinate",
            MessageType::RegisterCoordinator => "register-coordinator",
            MessageType::Registered => "registered",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "register-subordinate" => Some(MessageType::RegisterSubordinate),
            "register-coordinator" => Some(MessageType::RegisterCoordinator),
            "registered" => Some(MessageType::Registered),
            "offer" => Some(MessageType::Offer),
            "answer" => Some(MessageType::Answer),
            "ice-candidate" => Some(MessageType::IceCandidate),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body shared by the three peer-to-peer message types.
#[derive(Debug, Clone)]
pub struct Signal {
    pub target_id: SessionId,
    /// Sender identity. Inbound values are advisory; the relay overwrites them.
    pub source_id: Option<SessionId>,
    pub payload: Payload,
    /// Subordinate geometry, attached by the relay to forwarded answers.
    pub geometry: Option<DisplayGeometry>,
}

impl Signal {
    pub fn new(target_id: SessionId, payload: Payload) -> Self {
        Self {
            target_id,
            source_id: None,
            payload,
            geometry: None,
        }
    }

    pub fn with_source(mut self, source_id: SessionId) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn with_geometry(mut self, geometry: Option<DisplayGeometry>) -> Self {
        self.geometry = geometry;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Envelope {
    RegisterSubordinate {
        geometry: DisplayGeometry,
    },
    RegisterCoordinator {
        /// Subordinate the coordinator intends to reach. Informational only.
        subordinate_hint: Option<SessionId>,
    },
    Registered {
        id: SessionId,
    },
    Offer(Signal),
    Answer(Signal),
    IceCandidate(Signal),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    source_id: Option<String>,
    target_id: Option<String>,
    offer: Option<Payload>,
    answer: Option<Payload>,
    candidate: Option<Payload>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offer: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

impl<'a> WireOut<'a> {
    fn bare(kind: MessageType) -> Self {
        Self {
            kind: kind.as_str(),
            id: None,
            source_id: None,
            target_id: None,
            offer: None,
            answer: None,
            candidate: None,
            width: None,
            height: None,
        }
    }

    fn signal(kind: MessageType, signal: &'a Signal) -> Self {
        let mut wire = Self::bare(kind);
        wire.target_id = Some(signal.target_id.as_str());
        wire.source_id = signal.source_id.as_ref().map(SessionId::as_str);
        if let Some(geometry) = signal.geometry {
            wire.width = Some(geometry.width);
            wire.height = Some(geometry.height);
        }
        let payload: &RawValue = &signal.payload;
        match kind {
            MessageType::Offer => wire.offer = Some(payload),
            MessageType::Answer => wire.answer = Some(payload),
            _ => wire.candidate = Some(payload),
        }
        wire
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn required<T>(value: Option<T>, kind: MessageType, field: &'static str) -> Result<T, EnvelopeError> {
    value.ok_or(EnvelopeError::MissingField { kind, field })
}

impl Envelope {
    /// Parses and validates one text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let wire: WireIn = serde_json::from_str(text)?;
        let kind =
            MessageType::parse(&wire.kind).ok_or_else(|| EnvelopeError::UnknownType(wire.kind.clone()))?;

        match kind {
            MessageType::RegisterSubordinate => {
                let width = required(wire.width, kind, "width")?;
                let height = required(wire.height, kind, "height")?;
                Ok(Envelope::RegisterSubordinate {
                    geometry: DisplayGeometry::new(width, height)?,
                })
            }
            MessageType::RegisterCoordinator => Ok(Envelope::RegisterCoordinator {
                subordinate_hint: non_empty(wire.id).map(SessionId::from),
            }),
            MessageType::Registered => {
                let id = required(non_empty(wire.id), kind, "id")?;
                Ok(Envelope::Registered { id: id.into() })
            }
            MessageType::Offer => {
                // Older coordinators address the offer with `id`.
                let target = non_empty(wire.target_id).or_else(|| non_empty(wire.id));
                let target = required(target, kind, "targetId")?;
                let payload = required(wire.offer, kind, "offer")?;
                Ok(Envelope::Offer(Self::signal(target, wire.source_id, payload)))
            }
            MessageType::Answer => {
                let target = required(non_empty(wire.target_id), kind, "targetId")?;
                let payload = required(wire.answer, kind, "answer")?;
                let geometry = match (wire.width, wire.height) {
                    (Some(width), Some(height)) => Some(DisplayGeometry::new(width, height)?),
                    _ => None,
                };
                Ok(Envelope::Answer(
                    Self::signal(target, wire.source_id, payload).with_geometry(geometry),
                ))
            }
            MessageType::IceCandidate => {
                let target = required(non_empty(wire.target_id), kind, "targetId")?;
                let payload = required(wire.candidate, kind, "candidate")?;
                Ok(Envelope::IceCandidate(Self::signal(target, wire.source_id, payload)))
            }
        }
    }

    fn signal(target: String, source: Option<String>, payload: Payload) -> Signal {
        Signal {
            target_id: target.into(),
            source_id: non_empty(source).map(SessionId::from),
            payload,
            geometry: None,
        }
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        let kind = self.message_type();
        let wire = match self {
            Envelope::RegisterSubordinate { geometry } => {
                let mut wire = WireOut::bare(kind);
                wire.width = Some(geometry.width);
                wire.height = Some(geometry.height);
                wire
            }
            Envelope::RegisterCoordinator { subordinate_hint } => {
                let mut wire = WireOut::bare(kind);
                wire.id = subordinate_hint.as_ref().map(SessionId::as_str);
                wire
            }
            Envelope::Registered { id } => {
                let mut wire = WireOut::bare(kind);
                wire.id = Some(id.as_str());
                wire
            }
            Envelope::Offer(signal) | Envelope::Answer(signal) | Envelope::IceCandidate(signal) => {
                WireOut::signal(kind, signal)
            }
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::RegisterSubordinate { .. } => MessageType::RegisterSubordinate,
            Envelope::RegisterCoordinator { .. } => MessageType::RegisterCoordinator,
            Envelope::Registered { .. } => MessageType::Registered,
            Envelope::Offer(_) => MessageType::Offer,
            Envelope::Answer(_) => MessageType::Answer,
            Envelope::IceCandidate(_) => MessageType::IceCandidate,
        }
    }

    /// The peer-to-peer body, if this is an offer, answer or candidate.
    pub fn signal_body(&self) -> Option<&Signal> {
        match self {
            Envelope::Offer(signal) | Envelope::Answer(signal) | Envelope::IceCandidate(signal) => {
                Some(signal)
            }
            _ => None,
        }
    }

    pub fn registered(id: SessionId) -> Self {
        Envelope::Registered { id }
    }

    pub fn offer(target_id: SessionId, source_id: SessionId, offer: Payload) -> Self {
        Envelope::Offer(Signal::new(target_id, offer).with_source(source_id))
    }

    pub fn answer(target_id: SessionId, source_id: SessionId, answer: Payload) -> Self {
        Envelope::Answer(Signal::new(target_id, answer).with_source(source_id))
    }

    pub fn ice_candidate(target_id: SessionId, source_id: SessionId, candidate: Payload) -> Self {
        Envelope::IceCandidate(Signal::new(target_id, candidate).with_source(source_id))
    }
}
