//! `select!` helpers over optional sources. An absent source never resolves.

use phosaic_proto::Envelope;
use tokio::sync::mpsc;

use crate::peer::PeerEvent;
use crate::signaling::SignalingChannel;

pub(crate) async fn next_envelope(channel: &mut Option<SignalingChannel>) -> Option<Envelope> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn next_peer_event(events: &mut Option<mpsc::Receiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
