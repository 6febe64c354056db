// edgecam-camera/src/planes.rs
// Transient per-frame buffers. All of them are owned by the processing
// thread for the duration of one frame.
use image::{GrayImage, RgbaImage};

use crate::{CameraError, Result};

/// Luma plane extracted from an NV21 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayscalePlane {
    image: GrayImage,
    pub sequence: u64,
}

impl GrayscalePlane {
    pub fn new(image: GrayImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build from a packed `width * height` byte buffer.
    pub fn from_raw(width: u32, height: u32, luma: Vec<u8>, sequence: u64) -> Result<Self> {
        let len = luma.len();
        GrayImage::from_raw(width, height, luma)
            .map(|image| Self { image, sequence })
            .ok_or(CameraError::BufferSize { what: "grayscale", width, height, len })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Single-channel edge magnitude, same resolution as its source plane.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMap {
    image: GrayImage,
    pub sequence: u64,
}

impl EdgeMap {
    pub fn new(image: GrayImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Count of non-zero (edge) pixels.
    pub fn edge_pixels(&self) -> usize {
        self.image.as_raw().iter().filter(|&&v| v != 0).count()
    }
}

/// What an [`RgbaFrame`] visualizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Color conversion of the camera image.
    Color,
    /// Edge map replicated over the color channels.
    Edges,
}

/// Packed RGBA8 frame ready for texture upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    image: RgbaImage,
    pub sequence: u64,
    pub kind: FrameKind,
}

impl RgbaFrame {
    pub fn new(image: RgbaImage, sequence: u64, kind: FrameKind) -> Self {
        Self { image, sequence, kind }
    }

    pub fn from_raw(
        width: u32,
        height: u32,
        rgba: Vec<u8>,
        sequence: u64,
        kind: FrameKind,
    ) -> Result<Self> {
        let len = rgba.len();
        RgbaImage::from_raw(width, height, rgba)
            .map(|image| Self { image, sequence, kind })
            .ok_or(CameraError::BufferSize { what: "rgba", width, height, len })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// RGBA value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_from_raw_rejects_wrong_length() {
        let err = GrayscalePlane::from_raw(4, 4, vec![0u8; 15], 0).unwrap_err();
        assert_eq!(
            err,
            CameraError::BufferSize { what: "grayscale", width: 4, height: 4, len: 15 }
        );
    }

    #[test]
    fn edge_pixels_counts_non_zero() {
        let mut image = GrayImage::new(3, 3);
        image.put_pixel(1, 1, image::Luma([255]));
        image.put_pixel(2, 1, image::Luma([10]));
        assert_eq!(EdgeMap::new(image, 0).edge_pixels(), 2);
    }

    #[test]
    fn rgba_pixel_access() {
        let frame = RgbaFrame::from_raw(1, 1, vec![1, 2, 3, 255], 5, FrameKind::Color).unwrap();
        assert_eq!(frame.pixel(0, 0), [1, 2, 3, 255]);
        assert_eq!(frame.sequence, 5);
    }
}
