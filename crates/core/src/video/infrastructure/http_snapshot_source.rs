use std::time::Duration;

use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError};

/// Failures in a row after which the camera is considered gone.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pulls JPEG/PNG stills from an IP camera's snapshot endpoint, one request
/// per capture.
pub struct HttpSnapshotSource {
    client: reqwest::blocking::Client,
    url: String,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    captured: usize,
    released: bool,
}

impl HttpSnapshotSource {
    pub fn new(url: &str) -> Result<Self, FrameSourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FrameSourceError::Disconnected(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            consecutive_failures: 0,
            captured: 0,
            released: false,
        })
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    fn fetch(&self, index: usize) -> Result<Frame, String> {
        let bytes = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| e.to_string())?;
        let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
        Ok(Frame::from_rgb_image(image.to_rgb8(), index))
    }
}

impl FrameSource for HttpSnapshotSource {
    fn current_frame(&mut self) -> Result<Frame, FrameSourceError> {
        if self.released {
            return Err(FrameSourceError::Disconnected(format!(
                "{} was released",
                self.url
            )));
        }
        let index = self.captured;
        self.captured += 1;

        match self.fetch(index) {
            Ok(frame) => {
                self.consecutive_failures = 0;
                Ok(frame)
            }
            Err(reason) => {
                self.consecutive_failures += 1;
                log::debug!(
                    "Snapshot {} failed ({}/{}): {reason}",
                    self.url,
                    self.consecutive_failures,
                    self.max_consecutive_failures
                );
                if self.consecutive_failures >= self.max_consecutive_failures {
                    Err(FrameSourceError::Disconnected(format!(
                        "{} failed {} times in a row: {reason}",
                        self.url, self.consecutive_failures
                    )))
                } else {
                    Err(FrameSourceError::Unavailable(reason))
                }
            }
        }
    }

    fn release(&mut self) -> Result<(), FrameSourceError> {
        self.released = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("snapshots from {}", self.url)
    }
}
