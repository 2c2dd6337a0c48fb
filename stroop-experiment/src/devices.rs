//! Seams to the outside world: the screen, the keyboard and the
//! experimenter's quit key.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stroop_core::{FeedbackKind, StimulusItem};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("presentation surface failed: {0}")]
    Presentation(String),
    #[error("input backend failed: {0}")]
    Input(String),
}

/// Draws screens. Timestamps are nanoseconds on the run clock.
pub trait PresentationSurface {
    fn draw_fixation(&mut self) -> Result<(), DeviceError>;

    /// Presents the stimulus and returns the timestamp of the frame that
    /// made it visible.
    fn draw_stimulus(&mut self, item: &StimulusItem) -> Result<u64, DeviceError>;

    fn draw_feedback(&mut self, kind: FeedbackKind) -> Result<(), DeviceError>;

    /// Neutral symbol shown during a rest period.
    fn draw_rest(&mut self) -> Result<(), DeviceError>;

    fn show_message(&mut self, text: &str) -> Result<(), DeviceError>;

    fn clear(&mut self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: char,
    pub timestamp_ns: u64,
}

pub trait InputBackend {
    /// Waits at most `timeout` for one key.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError>;

    /// Drops anything typed before now.
    fn discard_pending(&mut self) -> Result<(), DeviceError>;

    /// Reads input that arrived since the last call without waiting, so a
    /// quit key pressed outside a response window still raises the abort
    /// signal. Backends that raise it from elsewhere keep the default.
    fn check_abort(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Raised by the experimenter to end the run early. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
