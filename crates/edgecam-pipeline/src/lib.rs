//! # edgecam-pipeline
//!
//! Real-time NV21 frame pipeline with a switchable edge-detection transform.
//!
//! A [`PipelineController`] receives frames from the camera callback thread,
//! hands them to a dedicated processing thread through a drop-oldest
//! [`FrameChannel`](edgecam_camera::FrameChannel), converts them, optionally
//! runs edge detection and presents the result on a
//! [`DisplaySurface`](edgecam_render::DisplaySurface).
//!
//! ## Guarantees
//!
//! - the camera thread never blocks in `submit`; the freshest frame wins
//! - a frame is processed entirely under the mode sampled when it starts
//! - malformed frames are dropped and edge-detection failures fall back to
//!   the raw feed, so per-frame problems never reach the caller
//! - `destroy` releases render resources exactly once and never while a
//!   frame is being uploaded

use thiserror::Error;

pub mod config;
pub mod controller;
pub mod mode;
pub mod stats;

pub use config::{ConfigError, PipelineConfig};
pub use controller::{PipelineController, PipelineState, TeardownReport};
pub use edgecam_camera::Submission;
pub use mode::{ModeState, ProcessingMode};
pub use stats::{FpsCounter, PipelineStats, StatsSnapshot};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("frame channel: {0}")]
    Channel(#[from] edgecam_camera::CameraError),
    #[error("edge detection capability unavailable: {0}")]
    Capability(#[source] edgecam_detect::DetectError),
    #[error(transparent)]
    Render(#[from] edgecam_render::RenderError),
    #[error("pipeline is already initialized")]
    AlreadyInitialized,
    #[error("pipeline has been stopped")]
    Stopped,
    #[error("failed to spawn processing thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("processing thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
