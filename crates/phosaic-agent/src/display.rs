use async_trait::async_trait;
use phosaic_core::{CaptureError, DisplayEnvironment};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::info;

/// Display environment for a console session. Full-display mode is entered
/// by the operator pressing Enter, which stands in for the user gesture.
pub struct ConsoleDisplay<R = BufReader<tokio::io::Stdin>> {
    fullscreen: bool,
    input: Mutex<R>,
}

impl ConsoleDisplay {
    pub fn stdin(fullscreen: bool) -> Self {
        Self::with_input(fullscreen, BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleDisplay<R> {
    pub fn with_input(fullscreen: bool, input: R) -> Self {
        Self {
            fullscreen,
            input: Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DisplayEnvironment for ConsoleDisplay<R> {
    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    async fn request_fullscreen(&self) -> Result<(), CaptureError> {
        println!("Press Enter to enter full-display mode");
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| CaptureError::Fullscreen(e.to_string()))?;
        if read == 0 {
            return Err(CaptureError::Fullscreen("input closed before confirmation".to_string()));
        }
        info!("full-display mode confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_confirms_fullscreen() {
        let display = ConsoleDisplay::with_input(false, &b"\n"[..]);
        assert!(!display.is_fullscreen());
        assert!(tokio_test::block_on(display.request_fullscreen()).is_ok());
    }

    #[test]
    fn closed_input_is_an_error() {
        let display = ConsoleDisplay::with_input(false, &b""[..]);
        assert!(matches!(
            tokio_test::block_on(display.request_fullscreen()),
            Err(CaptureError::Fullscreen(_))
        ));
    }
}
