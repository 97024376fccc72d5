//! [`PeerConnection`] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use phosaic_proto::Payload;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::peer::{PeerConnection, PeerError, PeerEvent, PeerFactory, PeerHandle};

const EVENT_QUEUE_LEN: usize = 64;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// `{"type", "sdp"}` as browsers serialize a session description.
#[derive(Deserialize)]
struct WireDescription {
    #[serde(rename = "type")]
    kind: String,
    sdp: String,
}

fn parse_description(raw: &RawValue, expected: &str) -> Result<String, PeerError> {
    let desc: WireDescription =
        serde_json::from_str(raw.get()).map_err(|e| PeerError::Description(e.to_string()))?;
    if desc.kind != expected {
        return Err(PeerError::Description(format!("expected {}, got {}", expected, desc.kind)));
    }
    Ok(desc.sdp)
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<Payload, PeerError> {
    let text = serde_json::to_string(value).map_err(|e| PeerError::Connection(e.to_string()))?;
    RawValue::from_string(text).map_err(|e| PeerError::Connection(e.to_string()))
}

pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

impl Default for WebRtcPeerFactory {
    fn default() -> Self {
        Self::new(vec![DEFAULT_STUN_SERVER.to_string()])
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self) -> Result<PeerHandle, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Connection(format!("Failed to register codecs: {}", e)))?;

        let interceptors = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| PeerError::Connection(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let ice_servers = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| PeerError::Connection(format!("Failed to create peer connection: {}", e)))?,
        );

        let (events, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let peer = Arc::new(WebRtcPeer {
            pc,
            channel: Arc::new(Mutex::new(None)),
            events,
        });
        peer.install_handlers();

        Ok(PeerHandle {
            connection: peer,
            events: rx,
        })
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: mpsc::Sender<PeerEvent>,
}

impl WebRtcPeer {
    fn install_handlers(&self) {
        let events = self.events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        return;
                    }
                };
                match to_payload(&init) {
                    Ok(payload) => {
                        let _ = events.send(PeerEvent::LocalCandidate(payload)).await;
                    }
                    Err(e) => warn!("Failed to encode local ICE candidate: {}", e),
                }
            })
        }));

        let events = self.events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    info!("ICE connection state: {}", state);
                    match state {
                        RTCIceConnectionState::Failed => {
                            let _ = events.send(PeerEvent::ConnectionFailed).await;
                        }
                        RTCIceConnectionState::Closed => {
                            let _ = events.send(PeerEvent::Closed).await;
                        }
                        _ => {}
                    }
                })
            }));

        // The answering side receives its channel from the remote.
        let events = self.events.clone();
        let slot = self.channel.clone();
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let slot = slot.clone();
            Box::pin(async move {
                debug!(label = dc.label(), "remote data channel");
                wire_channel(&dc, events);
                *slot.lock().await = Some(dc);
            })
        }));
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: mpsc::Sender<PeerEvent>) {
    let label = dc.label().to_string();

    let open_events = events.clone();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        let label = open_label.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::DataChannelOpen { label }).await;
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        let label = label.clone();
        Box::pin(async move {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            let _ = events.send(PeerEvent::DataChannelMessage { label, text }).await;
        })
    }));
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn accept_offer(&self, offer: &RawValue) -> Result<Payload, PeerError> {
        let sdp = parse_description(offer, "offer")?;
        let offer = RTCSessionDescription::offer(sdp).map_err(|e| PeerError::Description(e.to_string()))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::Description(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Description(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerError::Description(format!("Failed to set local description: {}", e)))?;

        to_payload(&answer)
    }

    async fn create_offer(&self, label: &str) -> Result<Payload, PeerError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| PeerError::DataChannel(e.to_string()))?;
        wire_channel(&dc, self.events.clone());
        *self.channel.lock().await = Some(dc);

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Description(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| PeerError::Description(format!("Failed to set local description: {}", e)))?;

        to_payload(&offer)
    }

    async fn apply_answer(&self, answer: &RawValue) -> Result<(), PeerError> {
        let sdp = parse_description(answer, "answer")?;
        let answer = RTCSessionDescription::answer(sdp).map_err(|e| PeerError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerError::Description(format!("Failed to set remote description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: &RawValue) -> Result<(), PeerError> {
        let init: RTCIceCandidateInit =
            serde_json::from_str(candidate.get()).map_err(|e| PeerError::Candidate(e.to_string()))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        let guard = self.channel.lock().await;
        let dc = guard.as_ref().ok_or(PeerError::DataChannel("no data channel".into()))?;
        dc.send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| PeerError::DataChannel(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(|e| PeerError::Connection(e.to_string()))
    }
}
