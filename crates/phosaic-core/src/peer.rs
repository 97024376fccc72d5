//! Seam to the direct peer connection.
//!
//! Session descriptions and candidates cross this boundary as the raw JSON the
//! browser side produces (`{"type","sdp"}` and `RTCIceCandidateInit`), so the
//! session machines never look inside them.

use std::sync::Arc;

use async_trait::async_trait;
use phosaic_proto::Payload;
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid session description: {0}")]
    Description(String),
    #[error("invalid ICE candidate: {0}")]
    Candidate(String),
    #[error("data channel error: {0}")]
    DataChannel(String),
    #[error("peer connection error: {0}")]
    Connection(String),
    #[error("peer connection closed")]
    Closed,
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// A local ICE candidate, to be sent to the remote side.
    LocalCandidate(Payload),
    DataChannelOpen { label: String },
    DataChannelMessage { label: String, text: String },
    /// ICE reported `failed`.
    ConnectionFailed,
    Closed,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Sets `offer` as the remote description and returns the local answer.
    async fn accept_offer(&self, offer: &RawValue) -> Result<Payload, PeerError>;

    /// Opens the data channel `label` and returns the local offer.
    async fn create_offer(&self, label: &str) -> Result<Payload, PeerError>;

    async fn apply_answer(&self, answer: &RawValue) -> Result<(), PeerError>;

    async fn add_remote_candidate(&self, candidate: &RawValue) -> Result<(), PeerError>;

    async fn send_text(&self, text: &str) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// A peer connection together with its event stream.
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::Receiver<PeerEvent>,
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self) -> Result<PeerHandle, PeerError>;
}
