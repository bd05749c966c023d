use std::path::{Path, PathBuf};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError};

/// Serves frames from a still image or a directory of images.
///
/// A single image is decoded once and returned on every capture. A directory
/// is cycled in file-name order, one image per capture, which makes it a
/// cheap stand-in for a camera in demos and tests.
pub struct ImageFileSource {
    origin: PathBuf,
    paths: Vec<PathBuf>,
    cached: Option<Frame>,
    next: usize,
    captured: usize,
    released: bool,
}

impl ImageFileSource {
    pub fn open(path: &Path) -> Result<Self, FrameSourceError> {
        let paths = if path.is_dir() {
            list_images(path)?
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(FrameSourceError::Disconnected(format!(
                "{} does not exist",
                path.display()
            )));
        };
        if paths.is_empty() {
            return Err(FrameSourceError::Disconnected(format!(
                "no images in {}",
                path.display()
            )));
        }

        let mut source = Self {
            origin: path.to_path_buf(),
            paths,
            cached: None,
            next: 0,
            captured: 0,
            released: false,
        };
        if source.paths.len() == 1 {
            source.cached = Some(decode(&source.paths[0], 0)?);
        }
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, FrameSourceError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FrameSourceError::Disconnected(format!("{}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn decode(path: &Path, index: usize) -> Result<Frame, FrameSourceError> {
    let image = image::open(path)
        .map_err(|e| FrameSourceError::Unavailable(format!("{}: {e}", path.display())))?;
    Ok(Frame::from_rgb_image(image.to_rgb8(), index))
}

impl FrameSource for ImageFileSource {
    fn current_frame(&mut self) -> Result<Frame, FrameSourceError> {
        if self.released {
            return Err(FrameSourceError::Disconnected(format!(
                "{} was released",
                self.origin.display()
            )));
        }
        let index = self.captured;
        self.captured += 1;

        if let Some(ref frame) = self.cached {
            return Ok(Frame::new(
                frame.data().to_vec(),
                frame.width(),
                frame.height(),
                frame.channels(),
                index,
            ));
        }

        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();
        decode(path, index)
    }

    fn release(&mut self) -> Result<(), FrameSourceError> {
        self.released = true;
        self.cached = None;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("images at {}", self.origin.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        let img = image::RgbImage::from_pixel(16, 12, image::Rgb(rgb));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_single_image_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cam.png", [50, 100, 200]);
        let mut source = ImageFileSource::open(&path).unwrap();

        let first = source.current_frame().unwrap();
        let second = source.current_frame().unwrap();

        assert_eq!(first.width(), 16);
        assert_eq!(first.height(), 12);
        assert_eq!(first.rgb_at(0, 0), Some([50, 100, 200]));
        assert_eq!(first.data(), second.data());
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
    }

    #[test]
    fn test_directory_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "b.png", [0, 255, 0]);
        write_image(dir.path(), "a.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let mut source = ImageFileSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let colors: Vec<_> = (0..3)
            .map(|_| source.current_frame().unwrap().rgb_at(0, 0).unwrap())
            .collect();
        assert_eq!(colors, vec![[255, 0, 0], [0, 255, 0], [255, 0, 0]]);
    }

    #[test]
    fn test_missing_path_is_disconnected() {
        let result = ImageFileSource::open(Path::new("/nonexistent/cam.png"));
        assert!(matches!(result, Err(FrameSourceError::Disconnected(_))));
    }

    #[test]
    fn test_empty_directory_is_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageFileSource::open(dir.path()),
            Err(FrameSourceError::Disconnected(_))
        ));
    }

    #[test]
    fn test_corrupt_image_in_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [1, 2, 3]);
        std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();
        let mut source = ImageFileSource::open(dir.path()).unwrap();

        assert!(source.current_frame().is_ok());
        assert!(matches!(
            source.current_frame(),
            Err(FrameSourceError::Unavailable(_))
        ));
        assert!(source.current_frame().is_ok());
    }

    #[test]
    fn test_release_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cam.png", [0, 0, 0]);
        let mut source = ImageFileSource::open(&path).unwrap();

        source.release().unwrap();
        source.release().unwrap();
        assert!(matches!(
            source.current_frame(),
            Err(FrameSourceError::Disconnected(_))
        ));
    }
}
