//! edgecam‑preprocess – NV21 → grayscale / RGBA conversion.
//!
//! All conversions use BT.601 full-range (JFIF) coefficients. The choice is
//! fixed at compile time; every frame of a pipeline is converted the same way.

use edgecam_camera::{CameraError, EdgeMap, Frame, FrameKind, GrayscalePlane, RgbaFrame};
use image::{GrayImage, RgbaImage};
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("malformed NV21 frame {sequence}: {width}x{height} needs {expected} bytes, got {len}")]
    MalformedFrame {
        sequence: u64,
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },
    #[error("NV21 frame {sequence} has odd, zero or oversized dimensions {width}x{height}")]
    BadDimensions { sequence: u64, width: u32, height: u32 },
    #[error(transparent)]
    Buffer(#[from] CameraError),
}

impl ConvertError {
    /// True for every input-shape problem; these drop the frame.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. } | Self::BadDimensions { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// What to turn into a displayable frame.
#[derive(Debug, Clone, Copy)]
pub enum DisplaySource<'a> {
    /// Color-convert the camera frame.
    Raw(&'a Frame),
    /// Visualize an edge map as gray.
    Edges(&'a EdgeMap),
}

/// Stateless NV21 converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameConverter;

impl FrameConverter {
    pub fn new() -> Self {
        Self
    }

    /// Check the NV21 size law and the 4:2:0 dimension constraints.
    pub fn validate(&self, frame: &Frame) -> Result<()> {
        let (width, height) = (frame.width, frame.height);
        let bad_dimensions = ConvertError::BadDimensions { sequence: frame.sequence, width, height };
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            debug!("rejecting frame {}: {width}x{height} is not a 4:2:0 size", frame.sequence);
            return Err(bad_dimensions);
        }
        let Some(expected) = Frame::expected_len(width, height) else {
            debug!("rejecting frame {}: {width}x{height} overflows the NV21 size", frame.sequence);
            return Err(bad_dimensions);
        };
        if frame.len() != expected {
            debug!(
                "rejecting frame {}: {} bytes, {width}x{height} needs {expected}",
                frame.sequence,
                frame.len()
            );
            return Err(ConvertError::MalformedFrame {
                sequence: frame.sequence,
                width,
                height,
                len: frame.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Copy out the luma plane. Chroma is not touched.
    pub fn to_grayscale(&self, frame: &Frame) -> Result<GrayscalePlane> {
        self.validate(frame)?;
        let luma_len = frame.width as usize * frame.height as usize;
        let luma = frame.bytes()[..luma_len].to_vec();
        Ok(GrayscalePlane::from_raw(frame.width, frame.height, luma, frame.sequence)?)
    }

    pub fn to_display(&self, source: DisplaySource<'_>) -> Result<RgbaFrame> {
        match source {
            DisplaySource::Raw(frame) => self.nv21_to_rgba(frame),
            DisplaySource::Edges(edges) => Ok(self.edges_to_rgba(edges)),
        }
    }

    /// Full color conversion of an NV21 frame.
    pub fn nv21_to_rgba(&self, frame: &Frame) -> Result<RgbaFrame> {
        self.validate(frame)?;
        let w = frame.width as usize;
        let h = frame.height as usize;
        let rgba_len = (w * h).checked_mul(4).ok_or(ConvertError::BadDimensions {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
        })?;
        let (y_plane, vu_plane) = frame.bytes().split_at(w * h);

        let mut rgba = vec![0u8; rgba_len];
        nv21_to_rgba(y_plane, vu_plane, w, h, &mut rgba);
        let image = RgbaImage::from_raw(frame.width, frame.height, rgba).ok_or(
            CameraError::BufferSize { what: "rgba", width: frame.width, height: frame.height, len: rgba_len },
        )?;
        Ok(RgbaFrame::new(image, frame.sequence, FrameKind::Color))
    }

    /// Replicate edge intensity over R, G and B at full opacity.
    pub fn edges_to_rgba(&self, edges: &EdgeMap) -> RgbaFrame {
        RgbaFrame::new(gray_to_rgba(edges.as_image()), edges.sequence, FrameKind::Edges)
    }
}

fn gray_to_rgba(gray: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        image::Rgba([v, v, v, 255])
    })
}

/// NV21 4:2:0 → RGBA8 (BT.601, full range). Chroma pairs are stored V first.
fn nv21_to_rgba(y: &[u8], vu: &[u8], w: usize, h: usize, out: &mut [u8]) {
    for j in 0..h {
        let row = (j / 2) * w;
        for i in 0..w {
            let y_val = y[j * w + i] as f32;
            let vu_idx = row + (i & !1);
            let v = vu[vu_idx] as f32 - 128.0;
            let u = vu[vu_idx + 1] as f32 - 128.0;

            let r = (y_val + 1.402 * v).round().clamp(0.0, 255.0);
            let g = (y_val - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0);
            let b = (y_val + 1.772 * u).round().clamp(0.0, 255.0);

            let base = (j * w + i) * 4;
            out[base] = r as u8;
            out[base + 1] = g as u8;
            out[base + 2] = b as u8;
            out[base + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffer_is_malformed() {
        let frame = Frame::nv21(vec![0u8; 16], 4, 4, 3);
        let err = FrameConverter::new().to_grayscale(&frame).unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(err, ConvertError::MalformedFrame { expected: 24, len: 16, .. }));
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let frame = Frame::nv21(vec![0u8; Frame::expected_len(3, 4).unwrap()], 3, 4, 0);
        assert!(matches!(
            FrameConverter::new().nv21_to_rgba(&frame),
            Err(ConvertError::BadDimensions { width: 3, .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let frame = Frame::nv21(vec![0u8; 24], u32::MAX - 1, u32::MAX - 1, 5);
        let conv = FrameConverter::new();
        let err = conv.nv21_to_rgba(&frame).unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(err, ConvertError::BadDimensions { sequence: 5, .. }));
        assert!(conv.to_grayscale(&frame).unwrap_err().is_malformed());
    }

    #[test]
    fn grayscale_reads_only_luma() {
        let mut bytes = vec![0u8; 24];
        for (i, b) in bytes[..16].iter_mut().enumerate() {
            *b = i as u8;
        }
        bytes[16..].fill(200);
        let gray = FrameConverter::new().to_grayscale(&Frame::nv21(bytes, 4, 4, 9)).unwrap();
        assert_eq!(gray.as_raw(), &(0u8..16).collect::<Vec<_>>()[..]);
        assert_eq!(gray.sequence, 9);
    }

    #[test]
    fn chroma_order_is_v_then_u() {
        // pure red-ish: V high, U neutral
        let mut bytes = vec![128u8; Frame::expected_len(2, 2).unwrap()];
        bytes[4] = 178; // V
        bytes[5] = 128; // U
        let rgba = FrameConverter::new()
            .nv21_to_rgba(&Frame::nv21(bytes, 2, 2, 0))
            .unwrap();
        let [r, g, b, a] = rgba.pixel(0, 0);
        assert_eq!(r, 198); // 128 + 1.402 * 50
        assert_eq!(g, 92); // 128 - 0.714136 * 50
        assert_eq!(b, 128);
        assert_eq!(a, 255);
    }

    #[test]
    fn edges_become_opaque_gray() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(1, 0, image::Luma([255]));
        let rgba = FrameConverter::new().edges_to_rgba(&EdgeMap::new(img, 4));
        assert_eq!(rgba.kind, FrameKind::Edges);
        assert_eq!(rgba.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(rgba.pixel(1, 0), [255, 255, 255, 255]);
    }
}
