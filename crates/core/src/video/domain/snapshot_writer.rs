use std::path::PathBuf;

use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;

/// Persists a frame with its detections drawn on top.
pub trait SnapshotWriter: Send + Sync {
    /// Writes the annotated frame under `name` and returns where it went.
    fn write(
        &self,
        name: &str,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<PathBuf, Box<dyn std::error::Error>>;
}
