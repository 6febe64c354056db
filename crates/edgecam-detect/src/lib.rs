// edgecam-detect/src/lib.rs
// ============================================================
// edgecam-detect  –  Edge-detection stage
// Runs a Canny edge detector on the luma plane of a frame via
// imageproc (pure Rust, no native vision library needed).
// ------------------------------------------------------------
// Pipeline: GrayscalePlane → EdgeMap
// ------------------------------------------------------------
// Public API
//   * EdgeDetector            – capability trait (detect + probe)
//   * CannyDetector::new(l,h) – hysteresis thresholds
//   * EdgeTransform::detect() – validated, panic-isolated call
// ============================================================

//! edgecam – edge detection layer
//!
//! The pipeline only depends on the narrow [`EdgeDetector`] contract: given a
//! grayscale plane, produce an edge map of the same resolution.  The bundled
//! [`CannyDetector`] wraps `imageproc::edges::canny`; other backends can be
//! plugged in without touching the pipeline.
//!
//! [`EdgeTransform`] is what the pipeline actually calls.  It turns every way a
//! backend can fail (an error, a wrong-sized output, a panic) into
//! [`DetectError::TransformUnavailable`] so the caller can fall back to the raw
//! feed for that frame.

use std::panic::{self, AssertUnwindSafe};

use edgecam_camera::{EdgeMap, GrayscalePlane};
use log::warn;
use thiserror::Error;

/// Lower hysteresis threshold used by the camera app.
pub const DEFAULT_LOW_THRESHOLD: f32 = 50.0;
/// Upper hysteresis threshold used by the camera app.
pub const DEFAULT_HIGH_THRESHOLD: f32 = 150.0;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("edge detection unavailable for frame {sequence}: {reason}")]
    TransformUnavailable { sequence: u64, reason: String },
    #[error("edge detector backend error: {0}")]
    Capability(String),
    #[error("invalid Canny thresholds: low {low}, high {high}")]
    InvalidThresholds { low: f32, high: f32 },
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// Capability contract for an edge-detection backend.
///
/// Implementations must be pure: no state carried from one frame to the next.
pub trait EdgeDetector: Send {
    fn name(&self) -> &str;

    /// Check the backend can run at all. Called once at pipeline start.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn detect(&self, plane: &GrayscalePlane) -> Result<EdgeMap>;
}

/// Canny edge detector backed by `imageproc`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannyDetector {
    low: f32,
    high: f32,
}

impl CannyDetector {
    pub fn new(low: f32, high: f32) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() || low < 0.0 || low > high {
            return Err(DetectError::InvalidThresholds { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn thresholds(&self) -> (f32, f32) {
        (self.low, self.high)
    }
}

impl Default for CannyDetector {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_THRESHOLD,
            high: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl EdgeDetector for CannyDetector {
    fn name(&self) -> &str {
        "canny"
    }

    fn detect(&self, plane: &GrayscalePlane) -> Result<EdgeMap> {
        let edges = imageproc::edges::canny(plane.as_image(), self.low, self.high);
        Ok(EdgeMap::new(edges, plane.sequence))
    }
}

/// Fallback-aware wrapper the pipeline calls once per frame.
pub struct EdgeTransform {
    detector: Box<dyn EdgeDetector>,
}

impl EdgeTransform {
    pub fn new(detector: Box<dyn EdgeDetector>) -> Self {
        Self { detector }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn probe(&self) -> Result<()> {
        self.detector.probe()
    }

    /// Run the backend on `plane`.
    ///
    /// Any failure is reported as [`DetectError::TransformUnavailable`].
    pub fn detect(&self, plane: &GrayscalePlane) -> Result<EdgeMap> {
        let sequence = plane.sequence;
        let unavailable = |reason: String| DetectError::TransformUnavailable { sequence, reason };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.detector.detect(plane)));
        let edges = match outcome {
            Ok(Ok(edges)) => edges,
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!("edge detector '{}' panicked: {reason}", self.detector.name());
                return Err(unavailable(format!("backend panicked: {reason}")));
            }
        };

        if (edges.width(), edges.height()) != (plane.width(), plane.height()) {
            return Err(unavailable(format!(
                "edge map is {}x{}, expected {}x{}",
                edges.width(),
                edges.height(),
                plane.width(),
                plane.height()
            )));
        }
        Ok(edges)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
