use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameSourceError {
    /// No frame this time; the next capture may succeed.
    #[error("frame unavailable: {0}")]
    Unavailable(String),
    /// The source is gone and will not produce frames again.
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
}

/// A live camera-like source the detection loop samples once per cycle.
///
/// Only the most recent frame matters; implementations never queue.
pub trait FrameSource: Send {
    fn current_frame(&mut self) -> Result<Frame, FrameSourceError>;

    /// Releases the underlying device or connection. Calling it twice is
    /// harmless; capturing afterwards yields `Disconnected`.
    fn release(&mut self) -> Result<(), FrameSourceError>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}
