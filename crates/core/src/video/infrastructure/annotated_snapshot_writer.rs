use std::path::{Path, PathBuf};

use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;
use crate::video::domain::snapshot_writer::SnapshotWriter;

const PERSON_COLOR: [u8; 3] = [0xFF, 0x7A, 0x00];
const OTHER_COLOR: [u8; 3] = [0x22, 0xC5, 0x5E];
const LINE_WIDTH: u32 = 2;

/// Draws detection boxes onto a copy of the frame and saves it as PNG
/// under a fixed directory, using the `image` crate.
pub struct AnnotatedSnapshotWriter {
    dir: PathBuf,
}

impl AnnotatedSnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Returns a copy of `frame` with an outline around every detection:
/// persons orange, everything else green.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut out = frame.clone();
    for det in detections {
        let color = if det.is_person() {
            PERSON_COLOR
        } else {
            OTHER_COLOR
        };
        let b = det.bbox.clamp_to(frame.width(), frame.height());
        if b.is_degenerate() {
            continue;
        }
        let x0 = b.x as u32;
        let y0 = b.y as u32;
        let x1 = (b.right().ceil() as u32).saturating_sub(1);
        let y1 = (b.bottom().ceil() as u32).saturating_sub(1);
        for t in 0..LINE_WIDTH {
            for x in x0..=x1 {
                out.set_rgb(x, y0 + t, color);
                out.set_rgb(x, y1.saturating_sub(t), color);
            }
            for y in y0..=y1 {
                out.set_rgb(x0 + t, y, color);
                out.set_rgb(x1.saturating_sub(t), y, color);
            }
        }
    }
    out
}

impl SnapshotWriter for AnnotatedSnapshotWriter {
    fn write(
        &self,
        name: &str,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&self.dir)?;

        let img = annotate(frame, detections)
            .to_rgb_image()
            .ok_or("Failed to create image from frame data")?;
        let path = self.dir.join(format!("{name}.png"));
        img.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::bbox::BoundingBox;

    #[test]
    fn test_annotate_draws_person_outline() {
        let frame = Frame::filled(20, 20, [0, 0, 0], 0);
        let person = Detection::new("person", 0.9, BoundingBox::new(5.0, 5.0, 10.0, 10.0));
        let out = annotate(&frame, &[person]);

        assert_eq!(out.rgb_at(5, 5), Some(PERSON_COLOR));
        assert_eq!(out.rgb_at(14, 14), Some(PERSON_COLOR));
        assert_eq!(out.rgb_at(6, 10), Some(PERSON_COLOR));
        assert_eq!(out.rgb_at(10, 10), Some([0, 0, 0]));
        assert_eq!(frame.rgb_at(5, 5), Some([0, 0, 0]));
    }

    #[test]
    fn test_annotate_other_classes_green() {
        let frame = Frame::filled(20, 20, [0, 0, 0], 0);
        let chair = Detection::new("chair", 0.9, BoundingBox::new(0.0, 0.0, 4.0, 4.0));
        let out = annotate(&frame, &[chair]);
        assert_eq!(out.rgb_at(0, 0), Some(OTHER_COLOR));
    }

    #[test]
    fn test_annotate_clamps_boxes_past_edge() {
        let frame = Frame::filled(10, 10, [0, 0, 0], 0);
        let person = Detection::new("person", 0.9, BoundingBox::new(-5.0, -5.0, 30.0, 30.0));
        let out = annotate(&frame, &[person]);
        assert_eq!(out.rgb_at(0, 0), Some(PERSON_COLOR));
        assert_eq!(out.rgb_at(9, 9), Some(PERSON_COLOR));
    }

    #[test]
    fn test_write_creates_png() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AnnotatedSnapshotWriter::new(dir.path().join("snaps"));
        let frame = Frame::filled(50, 50, [50, 100, 200], 0);

        let path = writer.write("cam-1-1000", &frame, &[]).unwrap();

        assert_eq!(path, dir.path().join("snaps").join("cam-1-1000.png"));
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [50, 100, 200]);
    }

    #[test]
    fn test_write_unreadable_frame_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AnnotatedSnapshotWriter::new(dir.path());
        let frame = Frame::new(Vec::new(), 0, 0, 3, 0);
        assert!(writer.write("empty", &frame, &[]).is_err());
    }
}
