//! Raw RGB24 video frames.

use image::RgbImage;

use crate::error::{MediaError, MediaResult};

/// Bytes per pixel of packed RGB24.
pub const RGB24_CHANNELS: usize = 3;

/// A single decoded frame in packed RGB24.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Ordinal index within the source stream
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the dimensions.
    pub fn new(index: u64, width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(MediaError::internal(format!(
                "Invalid frame buffer length: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            index,
            width,
            height,
            data,
        })
    }

    /// Create a black frame.
    pub fn black(index: u64, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Number of bytes in an RGB24 frame of the given size.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB24_CHANNELS
    }

    /// RGB value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB24_CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Overwrite the RGB value at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB24_CHANNELS;
        self.data[offset..offset + RGB24_CHANNELS].copy_from_slice(&rgb);
    }

    /// Borrow the pixels as an `image` buffer (copies).
    pub fn to_image(&self) -> MediaResult<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| MediaError::internal("Failed to create image buffer"))
    }

    /// Build a frame from an `image` buffer.
    pub fn from_image(index: u64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            index,
            width,
            height,
            data: image.into_raw(),
        }
    }
}
