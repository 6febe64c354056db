// edgecam-camera/src/frame.rs
use std::time::{Duration, Instant};

/// Byte layout of a captured frame. Only NV21 is produced by the camera path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Full-resolution Y plane followed by interleaved V/U at quarter resolution.
    Nv21,
}

/// One captured camera frame.
///
/// There is deliberately no `Clone`: a frame has exactly one owner at a time
/// and ownership moves through the [`FrameChannel`](crate::FrameChannel).
#[derive(Debug)]
pub struct Frame {
    bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic counter assigned at submission.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap an NV21 payload. The size is not checked here; the converter
    /// rejects payloads that break the NV21 size law.
    pub fn nv21(bytes: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            bytes,
            width,
            height,
            format: PixelFormat::Nv21,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Number of bytes a well-formed NV21 frame of this size carries, or
    /// `None` if that does not fit in `usize`.
    pub fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)
            .map(|n| n / 2)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Give the payload back, e.g. to recycle the allocation.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Time since the frame was handed to the pipeline.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}
