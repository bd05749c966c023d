use thiserror::Error;

use crate::detection::domain::detection::Detection;
use crate::detection::domain::model_manager::ModelLoadError;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("frame {index} is unreadable ({width}x{height}, {channels} channels)")]
    EmptyFrame {
        index: usize,
        width: u32,
        height: u32,
        channels: u8,
    },
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectionError {
    pub fn empty_frame(frame: &Frame) -> Self {
        DetectionError::EmptyFrame {
            index: frame.index(),
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
        }
    }
}

/// Runs one inference pass over a frame.
///
/// Returned boxes are confined to the frame. Implementations may keep
/// per-stream state, hence `&mut self`.
pub trait ObjectDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}

/// Hands out detectors bound to the shared model, loading it on first use.
///
/// Called from the detection loop's worker while it is `Starting`; blocking
/// here is expected.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ObjectDetector>, ModelLoadError>;
}
