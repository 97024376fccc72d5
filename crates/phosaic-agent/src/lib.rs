//! Phosaic display agent.
//!
//! Runs the subordinate session against a real relay and a webrtc-rs peer
//! connection. The display itself is described by configuration.

pub mod config;
pub mod display;

pub use config::{AgentConfig, ConfigError};
pub use display::ConsoleDisplay;
