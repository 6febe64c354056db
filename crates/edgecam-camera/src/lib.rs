// edgecam-camera/src/lib.rs
// ============================================================
// Camera-delivery side of the edgecam pipeline.
// Owns the NV21 frame model and the single-producer /
// single-consumer handoff between the camera callback thread
// and the processing thread.
// ------------------------------------------------------------
// Public API:
//   * Frame::nv21()          – wrap one captured NV21 payload
//   * FrameChannel::submit() – never blocks, drops the oldest frame
//   * FrameChannel::take()   – bounded wait, wakes on shutdown
// ============================================================

//! edgecam – camera delivery layer
//!
//! Frames are delivered as [`Frame`], which owns the raw NV21 bytes plus
//! metadata (width, height, sequence number, capture instant).  A frame is
//! never shared between stages: it is moved into the [`FrameChannel`] by the
//! producer and moved out again by the consumer.
//!
//! The derived per-frame buffers ([`GrayscalePlane`], [`EdgeMap`],
//! [`RgbaFrame`]) live here as well so that every downstream crate agrees on
//! one set of image types.

use thiserror::Error;

mod channel;
mod frame;
mod planes;

pub use channel::{FrameChannel, Submission, Take, MAX_CAPACITY, MIN_CAPACITY};
pub use frame::{Frame, PixelFormat};
pub use planes::{EdgeMap, FrameKind, GrayscalePlane, RgbaFrame};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("channel capacity must be between {MIN_CAPACITY} and {MAX_CAPACITY}, got {0}")]
    InvalidCapacity(usize),
    #[error("buffer of {len} bytes does not describe a {width}x{height} {what} image")]
    BufferSize {
        what: &'static str,
        width: u32,
        height: u32,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, CameraError>;
