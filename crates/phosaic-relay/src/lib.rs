//! phosaic-relay: WebSocket signaling relay.
//!
//! The relay assigns session identifiers to subordinates and coordinators and
//! forwards offers, answers and ICE candidates between them until the peers
//! have a direct channel. It never inspects the forwarded payloads.

pub mod api;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod ws;

#[cfg(test)]
mod registry_props;

pub use config::ServerConfig;
pub use registry::IdentityRegistry;
pub use router::{DropReason, RouteOutcome, Router};
pub use server::RelayServer;
