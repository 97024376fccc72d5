//! Display readiness: full-display mode and settled geometry.

use std::time::Duration;

use async_trait::async_trait;
use phosaic_proto::DisplayGeometry;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("display geometry did not settle within {waited:?} (last sample {last:?})")]
    Unsettled {
        waited: Duration,
        last: Option<DisplayGeometry>,
    },
    #[error("full-display mode unavailable: {0}")]
    Fullscreen(String),
    #[error("geometry source failed: {0}")]
    Source(String),
}

/// Reads the current display size. May be wrong while a layout change is in flight.
#[async_trait]
pub trait GeometrySource: Send + Sync {
    async fn sample(&self) -> Result<DisplayGeometry, CaptureError>;
}

#[async_trait]
impl<T: GeometrySource + ?Sized> GeometrySource for std::sync::Arc<T> {
    async fn sample(&self) -> Result<DisplayGeometry, CaptureError> {
        (**self).sample().await
    }
}

/// The presentation environment the subordinate runs in.
#[async_trait]
pub trait DisplayEnvironment: Send + Sync {
    fn is_fullscreen(&self) -> bool;

    /// Resolves once the user gesture was given and the environment reports
    /// full-display mode.
    async fn request_fullscreen(&self) -> Result<(), CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    pub poll_interval: Duration,
    /// Consecutive identical samples required.
    pub stable_samples: usize,
    pub timeout: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stable_samples: 3,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Bounded barrier over a [`GeometrySource`]: resolves with the first value
/// seen `stable_samples` times in a row, or fails once `timeout` has passed.
pub struct SettledGeometry<S> {
    source: S,
    config: SettleConfig,
}

impl<S: GeometrySource> SettledGeometry<S> {
    pub fn new(source: S, config: SettleConfig) -> Self {
        Self { source, config }
    }

    pub async fn capture(&self) -> Result<DisplayGeometry, CaptureError> {
        let required = self.config.stable_samples.max(1);
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let mut last: Option<DisplayGeometry> = None;
        let mut stable = 0usize;

        loop {
            // A source that never answers counts as unsettled.
            let sample = match tokio::time::timeout_at(deadline, self.source.sample()).await {
                Ok(sample) => sample?,
                Err(_) => {
                    let waited = Instant::now() - started;
                    warn!(?waited, ?last, "geometry source did not answer");
                    return Err(CaptureError::Unsettled { waited, last });
                }
            };
            if last == Some(sample) {
                stable += 1;
            } else {
                if last.is_some() {
                    debug!(from = ?last, to = %sample, "geometry still changing");
                }
                last = Some(sample);
                stable = 1;
            }

            if stable >= required {
                return Ok(sample);
            }

            let now = Instant::now();
            if now + self.config.poll_interval > deadline {
                let waited = now - started;
                warn!(?waited, ?last, "geometry did not settle");
                return Err(CaptureError::Unsettled { waited, last });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// A source that always reports the same size, for headless displays.
pub struct FixedGeometry(pub DisplayGeometry);

#[async_trait]
impl GeometrySource for FixedGeometry {
    async fn sample(&self) -> Result<DisplayGeometry, CaptureError> {
        Ok(self.0)
    }
}

/// An environment that is always in full-display mode.
pub struct AlwaysFullscreen;

#[async_trait]
impl DisplayEnvironment for AlwaysFullscreen {
    fn is_fullscreen(&self) -> bool {
        true
    }

    async fn request_fullscreen(&self) -> Result<(), CaptureError> {
        Ok(())
    }
}
