// edgecam-pipeline/src/controller.rs
// ============================================================
// PipelineController – owns the processing thread.
//
//   camera thread ─submit─▶ FrameChannel ─take─▶ processing thread
//                                                  │ convert
//                                                  │ [edge detect]
//                                                  ▼ upload + present
//                                                Renderer
//
// The Renderer is moved into the processing thread at start and
// destroyed by that thread after its last frame, so teardown can
// never overlap an upload.
// ============================================================
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use edgecam_camera::{Frame, FrameChannel, RgbaFrame, Submission, Take};
use edgecam_detect::{CannyDetector, EdgeDetector, EdgeTransform};
use edgecam_preprocess::{ConvertError, FrameConverter};
use edgecam_render::{DisplaySurface, RenderOptions, Renderer};
use log::{debug, error, info, warn};

use crate::stats::{PipelineStats, StatsSnapshot};
use crate::{ModeState, PipelineConfig, PipelineError, ProcessingMode, Result};

/// Lifecycle phase of a [`PipelineController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// What `destroy` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// The in-flight frame (if any) finished within the drain timeout.
    pub drained: bool,
    /// The renderer was destroyed before `destroy` returned.
    pub renderer_destroyed: bool,
    /// The pipeline was already stopped; this call did nothing.
    pub already_stopped: bool,
    pub frames_presented: u64,
}

// Sent by the processing thread once the renderer is gone.
struct TeardownAck {
    renderer_destroyed: bool,
    frames_presented: u64,
}

struct Worker {
    handle: JoinHandle<()>,
    done_rx: Receiver<TeardownAck>,
}

enum Lifecycle {
    Pending {
        renderer: Renderer,
        transform: Option<EdgeTransform>,
    },
    Running(Worker),
    Finished,
}

/// Surface size change waiting to be applied at the next frame boundary.
/// Packed as `width << 32 | height`; zero means nothing pending.
#[derive(Debug, Default)]
struct PendingViewport(AtomicU64);

impl PendingViewport {
    fn set(&self, width: u32, height: u32) {
        self.0.store((u64::from(width) << 32) | u64::from(height), Ordering::Release);
    }

    fn take(&self) -> Option<(u32, u32)> {
        match self.0.swap(0, Ordering::AcqRel) {
            0 => None,
            packed => Some(((packed >> 32) as u32, packed as u32)),
        }
    }
}

/// Everything the processing thread owns or shares.
struct ProcessingContext {
    channel: Arc<FrameChannel>,
    mode: Arc<ModeState>,
    stats: Arc<PipelineStats>,
    viewport: Arc<PendingViewport>,
    renderer: Renderer,
    transform: Option<EdgeTransform>,
    converter: FrameConverter,
    take_timeout: Duration,
    done_tx: Sender<TeardownAck>,
}

/// Orchestrates the pipeline and owns the teardown protocol.
///
/// All methods take `&self`; share the controller between the camera thread,
/// the control surface and the lifecycle owner with an `Arc`.
pub struct PipelineController {
    config: PipelineConfig,
    channel: Arc<FrameChannel>,
    mode: Arc<ModeState>,
    stats: Arc<PipelineStats>,
    viewport: Arc<PendingViewport>,
    state: AtomicU8,
    sequence: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
}

impl PipelineController {
    /// Build an idle pipeline. `detector = None` gives a raw-only pipeline:
    /// edge mode requests are served with the raw feed.
    pub fn new(
        config: PipelineConfig,
        surface: Box<dyn DisplaySurface>,
        detector: Option<Box<dyn EdgeDetector>>,
    ) -> Result<Self> {
        config.validate()?;
        let channel = Arc::new(FrameChannel::new(config.channel_capacity)?);
        let renderer = Renderer::new(
            surface,
            RenderOptions { scale_to_viewport: config.scale_to_viewport },
        );

        Ok(Self {
            channel,
            mode: Arc::new(ModeState::new(config.initial_mode)),
            stats: Arc::new(PipelineStats::new(config.fps_window())),
            viewport: Arc::new(PendingViewport::default()),
            state: AtomicU8::new(PipelineState::Idle as u8),
            sequence: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle::Pending {
                renderer,
                transform: detector.map(EdgeTransform::new),
            }),
            config,
        })
    }

    /// Idle pipeline using the bundled Canny detector with the configured thresholds.
    pub fn with_canny(config: PipelineConfig, surface: Box<dyn DisplaySurface>) -> Result<Self> {
        let canny = CannyDetector::new(config.canny_low, config.canny_high)
            .map_err(PipelineError::Capability)?;
        Self::new(config, surface, Some(Box::new(canny)))
    }

    /// Allocate render resources and start the processing thread.
    ///
    /// Failures leave the pipeline idle so the caller may retry.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        match self.state() {
            PipelineState::Idle => {}
            PipelineState::Running | PipelineState::Draining => {
                return Err(PipelineError::AlreadyInitialized)
            }
            PipelineState::Stopped => return Err(PipelineError::Stopped),
        }

        let (mut renderer, transform) = match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Pending { renderer, transform } => (renderer, transform),
            other => {
                *lifecycle = other;
                return Err(PipelineError::AlreadyInitialized);
            }
        };

        let probed = match &transform {
            Some(t) => t.probe().map_err(|e| (t.detector_name().to_string(), e)),
            None => Ok(()),
        };
        if let Err((name, e)) = probed {
            error!("edge detector '{name}' unavailable: {e}");
            *lifecycle = Lifecycle::Pending { renderer, transform };
            return Err(PipelineError::Capability(e));
        }
        if let Err(e) = renderer.initialize() {
            error!("renderer initialization failed: {e}");
            *lifecycle = Lifecycle::Pending { renderer, transform };
            return Err(e.into());
        }

        let (done_tx, done_rx) = bounded(1);
        let ctx = ProcessingContext {
            channel: self.channel.clone(),
            mode: self.mode.clone(),
            stats: self.stats.clone(),
            viewport: self.viewport.clone(),
            renderer,
            transform,
            converter: FrameConverter::new(),
            take_timeout: self.config.take_timeout(),
            done_tx,
        };
        let spawned = thread::Builder::new()
            .name("edgecam-processing".into())
            .spawn(move || run(ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // the renderer went down with the closure
                self.set_state(PipelineState::Stopped);
                self.channel.shutdown();
                return Err(PipelineError::Spawn(e));
            }
        };

        *lifecycle = Lifecycle::Running(Worker { handle, done_rx });
        self.set_state(PipelineState::Running);
        info!(
            "pipeline running (capacity {}, mode {:?})",
            self.channel.capacity(),
            self.mode.get()
        );
        Ok(())
    }

    /// Hand one NV21 frame to the pipeline. Never blocks.
    ///
    /// After teardown the frame is discarded and [`Submission::Closed`] is returned.
    pub fn submit(&self, bytes: Vec<u8>, width: u32, height: u32) -> Submission {
        if self.state() == PipelineState::Stopped {
            return Submission::Closed;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let outcome = self.channel.submit(Frame::nv21(bytes, width, height, sequence));
        if outcome != Submission::Closed {
            self.stats.record_submitted();
        }
        outcome
    }

    /// Control-surface entry point (`0` = raw, `1` = edge detection).
    pub fn set_processing_mode(&self, code: i32) {
        if self.state() == PipelineState::Stopped {
            debug!("ignoring mode code {code}: pipeline stopped");
            return;
        }
        let mode = self.mode.set_code(code);
        debug!("processing mode set to {mode:?}");
    }

    pub fn set_mode(&self, mode: ProcessingMode) {
        if self.state() != PipelineState::Stopped {
            self.mode.set(mode);
        }
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode.get()
    }

    /// The display surface changed size; applied before the next frame.
    pub fn resize_surface(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            warn!("ignoring empty surface size {width}x{height}");
            return;
        }
        if self.state() != PipelineState::Stopped {
            self.viewport.set(width, height);
        }
    }

    /// Stop the processing thread and release render resources.
    ///
    /// Wakes the processing thread, waits up to the drain timeout for the
    /// in-flight frame, and returns once the renderer is destroyed or the
    /// timeout elapses. Calling it again is a no-op.
    pub fn destroy(&self) -> Result<TeardownReport> {
        let mut lifecycle = self.lock_lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Finished => Ok(TeardownReport {
                drained: true,
                renderer_destroyed: false,
                already_stopped: true,
                frames_presented: self.stats.snapshot(0).presented,
            }),
            Lifecycle::Pending { mut renderer, .. } => {
                self.set_state(PipelineState::Stopped);
                self.channel.shutdown();
                let renderer_destroyed = renderer.destroy();
                info!("pipeline stopped before it was started");
                Ok(TeardownReport {
                    drained: true,
                    renderer_destroyed,
                    already_stopped: false,
                    frames_presented: 0,
                })
            }
            Lifecycle::Running(worker) => {
                self.set_state(PipelineState::Draining);
                self.channel.shutdown();
                let report = self.drain(worker);
                self.set_state(PipelineState::Stopped);
                report
            }
        }
    }

    fn drain(&self, worker: Worker) -> Result<TeardownReport> {
        let timeout = self.config.drain_timeout();
        match worker.done_rx.recv_timeout(timeout) {
            Ok(ack) => {
                if worker.handle.join().is_err() {
                    return Err(PipelineError::WorkerPanicked);
                }
                info!("pipeline stopped after {} presented frame(s)", ack.frames_presented);
                Ok(TeardownReport {
                    drained: true,
                    renderer_destroyed: ack.renderer_destroyed,
                    already_stopped: false,
                    frames_presented: ack.frames_presented,
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread still owns the renderer and destroys it after
                // finishing the current frame.
                warn!("in-flight frame did not finish within {timeout:?}; detaching processing thread");
                Ok(TeardownReport {
                    drained: false,
                    renderer_destroyed: false,
                    already_stopped: false,
                    frames_presented: self.stats.snapshot(0).presented,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                error!("processing thread exited without acknowledging teardown");
                Err(PipelineError::WorkerPanicked)
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.channel.dropped())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            error!("pipeline teardown on drop failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// processing thread
// ---------------------------------------------------------------------------

fn run(mut ctx: ProcessingContext) {
    debug!("processing thread started");
    loop {
        match ctx.channel.take(ctx.take_timeout) {
            Take::Frame(frame) => process_frame(&mut ctx, frame),
            Take::Empty => continue,
            Take::Shutdown => break,
        }
    }

    let renderer_destroyed = ctx.renderer.destroy();
    let ack = TeardownAck {
        renderer_destroyed,
        frames_presented: ctx.renderer.frames_presented(),
    };
    // The controller may have stopped waiting after its drain timeout.
    let _ = ctx.done_tx.send(ack);
    debug!("processing thread finished");
}

fn process_frame(ctx: &mut ProcessingContext, frame: Frame) {
    let started = Instant::now();
    let mode = ctx.mode.get();

    if let Some((w, h)) = ctx.viewport.take() {
        if let Err(e) = ctx.renderer.resize(w, h) {
            warn!("surface resize to {w}x{h} rejected: {e}");
        }
    }

    let rgba = match render_frame(ctx, &frame, mode) {
        Ok(rgba) => rgba,
        Err(e) if e.is_malformed() => {
            ctx.stats.record_malformed();
            warn!("dropping frame: {e}");
            return;
        }
        Err(e) => {
            ctx.stats.record_render_error();
            error!("frame {} could not be converted: {e}", frame.sequence);
            return;
        }
    };

    let shown = ctx.renderer.upload(&rgba).and_then(|()| ctx.renderer.present());
    match shown {
        Ok(()) => {
            let took = started.elapsed();
            ctx.stats.record_presented(took);
            debug!(
                "frame {} ({mode:?}) processed in {} ms, {} ms after capture",
                frame.sequence,
                took.as_millis(),
                frame.age().as_millis()
            );
        }
        Err(e) => {
            ctx.stats.record_render_error();
            error!("frame {} not presented: {e}", frame.sequence);
        }
    }
}

/// Convert one frame under `mode`. Edge detection failures fall back to the
/// raw conversion of the same frame.
fn render_frame(
    ctx: &ProcessingContext,
    frame: &Frame,
    mode: ProcessingMode,
) -> std::result::Result<RgbaFrame, ConvertError> {
    let transform = match (mode, &ctx.transform) {
        (ProcessingMode::EdgeDetect, Some(t)) => t,
        _ => return ctx.converter.nv21_to_rgba(frame),
    };

    let gray = ctx.converter.to_grayscale(frame)?;
    match transform.detect(&gray) {
        Ok(edges) => Ok(ctx.converter.edges_to_rgba(&edges)),
        Err(e) => {
            ctx.stats.record_fallback();
            warn!("{e}; presenting raw frame instead");
            ctx.converter.nv21_to_rgba(frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_viewport_packs_and_clears() {
        let vp = PendingViewport::default();
        assert_eq!(vp.take(), None);
        vp.set(1280, 720);
        vp.set(1920, 1080);
        assert_eq!(vp.take(), Some((1920, 1080)));
        assert_eq!(vp.take(), None);
    }

    #[test]
    fn state_codes_round_trip() {
        for s in [
            PipelineState::Idle,
            PipelineState::Running,
            PipelineState::Draining,
            PipelineState::Stopped,
        ] {
            assert_eq!(PipelineState::from_u8(s as u8), s);
        }
    }
}
