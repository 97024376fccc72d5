//! Phosaic peer-side logic.
//!
//! The session machines in [`session`] and [`coordinator`] are pure; the
//! drivers in [`agent`] and [`controller`] wire them to a signaling channel,
//! a peer connection and (for the subordinate) the display.

pub mod agent;
pub mod capture;
pub mod controller;
pub mod coordinator;
pub mod pairing;
pub mod peer;
pub mod session;
pub mod signaling;
mod wait;

#[cfg(test)]
mod session_props;

#[cfg(feature = "webrtc")]
pub mod webrtc_peer;

pub use agent::{AgentParts, DriverError, SubordinateAgent};
pub use capture::{
    AlwaysFullscreen, CaptureError, DisplayEnvironment, FixedGeometry, GeometrySource, SettleConfig, SettledGeometry,
};
pub use controller::CoordinatorClient;
pub use coordinator::{CoordinatorAction, CoordinatorSession, CoordinatorState};
pub use pairing::{PairingDisplay, PairingError, SvgFilePairing, TerminalPairing};
pub use peer::{PeerConnection, PeerError, PeerEvent, PeerFactory, PeerHandle};
pub use session::{SessionAction, SessionError, SessionState, SubordinateSession};
pub use signaling::{SignalingChannel, SignalingConnector, SignalingError, SignalingPeer, WsConnector};
