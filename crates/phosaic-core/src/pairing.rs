//! Pairing token rendering.
//!
//! The token is the assigned session identifier encoded as a QR code, so a
//! coordinator can scan it off the subordinate's display.

use std::io::Write;
use std::path::PathBuf;

use phosaic_proto::SessionId;
use qrcode::render::{svg, unicode};
use qrcode::types::QrError;
use qrcode::QrCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("QR encoding failed: {0}")]
    Qr(#[from] QrError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shows the pairing token for an assigned identifier.
pub trait PairingDisplay: Send + Sync {
    fn show(&self, id: &SessionId) -> Result<(), PairingError>;
}

pub fn render_svg(id: &SessionId) -> Result<String, PairingError> {
    let code = QrCode::new(id.as_str().as_bytes())?;
    let image = code
        .render()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();
    Ok(image)
}

/// Renders with half-height block characters, light-on-dark so it scans
/// from a terminal.
pub fn render_terminal(id: &SessionId) -> Result<String, PairingError> {
    let code = QrCode::new(id.as_str().as_bytes())?;
    let image = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();
    Ok(image)
}

/// Prints the token to stdout.
#[derive(Debug, Default)]
pub struct TerminalPairing;

impl PairingDisplay for TerminalPairing {
    fn show(&self, id: &SessionId) -> Result<(), PairingError> {
        let image = render_terminal(id)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", image)?;
        writeln!(out, "Session ID: {}", id)?;
        out.flush()?;
        Ok(())
    }
}

/// Writes the token as an SVG file, for a display that shows images rather
/// than a terminal. The file is replaced on every registration.
#[derive(Debug, Clone)]
pub struct SvgFilePairing {
    path: PathBuf,
}

impl SvgFilePairing {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PairingDisplay for SvgFilePairing {
    fn show(&self, id: &SessionId) -> Result<(), PairingError> {
        let image = render_svg(id)?;
        std::fs::write(&self.path, image)?;
        tracing::info!(path = %self.path.display(), session = %id, "pairing token written");
        Ok(())
    }
}
