use ndarray::ArrayView3;

/// One captured camera frame: contiguous RGB(A) bytes in row-major order.
///
/// Sources decode into this format at the I/O boundary; detection and
/// classification only ever read from it.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Solid-color RGB frame, mostly useful for fixtures and warm-up passes.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: usize) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(data, width, height, 3, index)
    }

    pub fn from_rgb_image(image: image::RgbImage, index: usize) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True when there is nothing to look at: no pixels or fewer than three
    /// color channels.
    pub fn is_unreadable(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.channels < 3
            || self.data.len() < self.width as usize * self.height as usize * self.channels as usize
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height || self.channels < 3 {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }

    /// Overwrites the RGB channels of one pixel. Out-of-frame writes are ignored.
    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height || self.channels < 3 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        if let Some(px) = self.data.get_mut(offset..offset + 3) {
            px.copy_from_slice(&rgb);
        }
    }

    /// Drops any alpha channel, producing an image the `image` crate can encode.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        if self.is_unreadable() {
            return None;
        }
        let rgb = if self.channels == 3 {
            self.data.clone()
        } else {
            self.data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect()
        };
        image::RgbImage::from_raw(self.width, self.height, rgb)
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
