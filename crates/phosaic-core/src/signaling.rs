//! Client side of the relay connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use phosaic_proto::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("signaling channel closed")]
    Closed,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] phosaic_proto::EnvelopeError),
}

/// An open signaling connection, as a pair of envelope queues.
///
/// `recv` returning `None` means the transport is gone.
#[derive(Debug)]
pub struct SignalingChannel {
    outbound: mpsc::Sender<Envelope>,
    inbound: mpsc::Receiver<Envelope>,
}

/// The far end of an in-memory channel.
#[derive(Debug)]
pub struct SignalingPeer {
    pub sent: mpsc::Receiver<Envelope>,
    pub deliver: mpsc::Sender<Envelope>,
}

impl SignalingChannel {
    pub fn new(outbound: mpsc::Sender<Envelope>, inbound: mpsc::Receiver<Envelope>) -> Self {
        Self { outbound, inbound }
    }

    /// A channel with no transport behind it; the returned peer plays the relay.
    pub fn in_memory(capacity: usize) -> (Self, SignalingPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Self::new(out_tx, in_rx),
            SignalingPeer {
                sent: out_rx,
                deliver: in_tx,
            },
        )
    }

    pub async fn send(&self, envelope: Envelope) -> Result<(), SignalingError> {
        self.outbound.send(envelope).await.map_err(|_| SignalingError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self) -> Result<SignalingChannel, SignalingError>;
}

/// Connects to the relay over WebSocket.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self) -> Result<SignalingChannel, SignalingError> {
        info!("Connecting to signaling relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);

        // Sender task
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {}: {}", envelope.message_type(), e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("Failed to send signaling message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Signaling sender terminated");
        });

        // Receiver task; dropping `in_tx` tells the owner the transport is gone.
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Envelope::parse(&text) {
                        Ok(envelope) => {
                            if in_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed signaling message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Signaling connection closed by relay");
                        break;
                    }
                    Err(e) => {
                        error!("Signaling connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Signaling receiver terminated");
        });

        info!("Connected to signaling relay");
        Ok(SignalingChannel::new(out_tx, in_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phosaic_proto::SessionId;

    #[tokio::test]
    async fn in_memory_channel_carries_both_directions() {
        let (mut channel, mut peer) = SignalingChannel::in_memory(4);

        channel
            .send(Envelope::RegisterCoordinator { subordinate_hint: None })
            .await
            .unwrap();
        assert!(matches!(peer.sent.recv().await, Some(Envelope::RegisterCoordinator { .. })));

        peer.deliver.send(Envelope::registered(SessionId::from("coord1"))).await.unwrap();
        assert!(matches!(channel.recv().await, Some(Envelope::Registered { .. })));

        drop(peer);
        assert!(channel.recv().await.is_none());
        assert!(matches!(
            channel.send(Envelope::registered("x".into())).await,
            Err(SignalingError::Closed)
        ));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_connect_error() {
        let connector = WsConnector::new("ws://127.0.0.1:1");
        assert!(matches!(connector.connect().await, Err(SignalingError::Connect { .. })));
    }
}
