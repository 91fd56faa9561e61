//! Clipboard access.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard is not available: {0}")]
    Unavailable(String),

    #[error("clipboard write was rejected: {0}")]
    Rejected(String),
}

pub trait ClipboardWriter {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The system clipboard. Opened lazily so commands that never copy work without a display.
#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Option<arboard::Clipboard>,
    hold: Option<Duration>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// For a process that exits right after copying. On Linux the writing process serves the
    /// clipboard contents itself, so a write blocks until another program (normally a clipboard
    /// manager) takes them over, or until `hold` runs out. A zero `hold` does not wait.
    pub fn handing_off(hold: Duration) -> Self {
        Self {
            clipboard: None,
            hold: (!hold.is_zero()).then_some(hold),
        }
    }

    pub fn hold(&self) -> Option<Duration> {
        self.hold
    }
}

impl ClipboardWriter for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let clipboard = match self.clipboard.take() {
            Some(clipboard) => clipboard,
            None => arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?,
        };
        let clipboard = self.clipboard.insert(clipboard);
        set_text(clipboard, text, self.hold)
            .map_err(|e| ClipboardError::Rejected(e.to_string()))?;
        tracing::debug!(chars = text.chars().count(), "wrote clipboard");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    hold: Option<Duration>,
) -> Result<(), arboard::Error> {
    use arboard::SetExtLinux as _;

    match hold {
        Some(hold) => {
            tracing::info!(
                hold_secs = hold.as_secs(),
                "serving the clipboard until another program takes it over"
            );
            clipboard
                .set()
                .wait_until(std::time::Instant::now() + hold)
                .text(text)
        }
        None => clipboard.set_text(text),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    _hold: Option<Duration>,
) -> Result<(), arboard::Error> {
    clipboard.set_text(text)
}
