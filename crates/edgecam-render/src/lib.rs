// edgecam-render/src/lib.rs
// ============================================================
// Texture upload + present for the edgecam pipeline.
// Owns the render resources (texture handle, staging pixels,
// viewport) and the surface they are presented on.
// ------------------------------------------------------------
// Lifecycle:  Uninitialized → Active → Destroyed (terminal)
// ============================================================

//! edgecam – render layer
//!
//! [`Renderer`] is a small state machine around a [`DisplaySurface`].
//! `initialize` attaches the surface and allocates a texture, `upload` copies
//! a processed frame into the texture's staging buffer (reusing the
//! allocation while the frame size is stable), `present` hands the texture to
//! the surface and `destroy` releases everything exactly once.
//!
//! The renderer is `Send` but not shared: the pipeline moves it into its
//! processing thread, so only that thread ever touches the resources.

use std::sync::atomic::{AtomicU32, Ordering};

use edgecam_camera::RgbaFrame;
use log::{debug, info};
use resize::{Pixel, Type};
use rgb::FromSlice;
use thiserror::Error;

mod surface;
pub use surface::{DisplaySurface, NullSurface, RecordingSurface, SurfaceError, SurfaceEvent, SurfaceProbe};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer initialization failed: {0}")]
    Init(#[source] SurfaceError),
    #[error("renderer is already initialized")]
    AlreadyInitialized,
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("renderer resources have been destroyed")]
    UseAfterDestroy,
    #[error("present called before any frame was uploaded")]
    NothingUploaded,
    #[error("invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
    #[error("viewport scaling failed: {0}")]
    Scale(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

static NEXT_TEXTURE: AtomicU32 = AtomicU32::new(1);

/// Opaque handle of the texture owned by an active renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u32);

impl TextureId {
    fn allocate() -> Self {
        Self(NEXT_TEXTURE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Size of the visible output area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Lifecycle phase of a [`Renderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Active,
    Destroyed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Scale each presented frame to the viewport instead of handing the
    /// texture over at its native size.
    pub scale_to_viewport: bool,
}

struct RendererResources {
    texture_id: TextureId,
    // staging pixels, reused while the frame size does not change
    texture: Option<RgbaFrame>,
    uploads: u64,
    reallocations: u64,
}

enum State {
    Uninitialized,
    Active(RendererResources),
    Destroyed,
}

pub struct Renderer {
    surface: Box<dyn DisplaySurface>,
    state: State,
    viewport: Option<Viewport>,
    options: RenderOptions,
    presented: u64,
}

impl Renderer {
    pub fn new(surface: Box<dyn DisplaySurface>, options: RenderOptions) -> Self {
        Self {
            surface,
            state: State::Uninitialized,
            viewport: None,
            options,
            presented: 0,
        }
    }

    /// Attach the surface and allocate the texture.
    pub fn initialize(&mut self) -> Result<TextureId> {
        match self.state {
            State::Uninitialized => {}
            State::Active(_) => return Err(RenderError::AlreadyInitialized),
            State::Destroyed => return Err(RenderError::UseAfterDestroy),
        }
        self.surface.attach().map_err(RenderError::Init)?;

        let texture_id = TextureId::allocate();
        self.state = State::Active(RendererResources {
            texture_id,
            texture: None,
            uploads: 0,
            reallocations: 0,
        });
        info!("renderer initialized with texture {}", texture_id.get());
        Ok(texture_id)
    }

    /// Copy `frame` into the texture.
    pub fn upload(&mut self, frame: &RgbaFrame) -> Result<()> {
        let res = self.resources_mut()?;
        let size = (frame.width(), frame.height());
        match res.texture.as_mut().filter(|tex| (tex.width(), tex.height()) == size) {
            Some(tex) => {
                tex.as_raw_mut().copy_from_slice(frame.as_raw());
                tex.sequence = frame.sequence;
                tex.kind = frame.kind;
            }
            None => {
                res.texture = Some(frame.clone());
                res.reallocations += 1;
                debug!("texture {} sized to {}x{}", res.texture_id.get(), size.0, size.1);
            }
        }
        res.uploads += 1;
        Ok(())
    }

    /// Show the last uploaded frame on the surface.
    pub fn present(&mut self) -> Result<()> {
        let scale_to = if self.options.scale_to_viewport { self.viewport } else { None };
        let res = match &self.state {
            State::Active(res) => res,
            State::Uninitialized => return Err(RenderError::NotInitialized),
            State::Destroyed => return Err(RenderError::UseAfterDestroy),
        };
        let tex = res.texture.as_ref().ok_or(RenderError::NothingUploaded)?;

        match scale_to {
            Some(vp) if (vp.width, vp.height) != (tex.width(), tex.height()) => {
                let scaled = scale(tex, vp)?;
                self.surface.present(&scaled);
            }
            _ => self.surface.present(tex),
        }
        self.presented += 1;
        Ok(())
    }

    /// The surface changed size. Allowed before and after `initialize`.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if matches!(self.state, State::Destroyed) {
            return Err(RenderError::UseAfterDestroy);
        }
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidViewport { width, height });
        }
        self.viewport = Some(Viewport { width, height });
        debug!("viewport set to {width}x{height}");
        Ok(())
    }

    /// Release the texture and detach the surface.
    ///
    /// Returns `true` if this call did the teardown; later calls are no-ops.
    pub fn destroy(&mut self) -> bool {
        match std::mem::replace(&mut self.state, State::Destroyed) {
            State::Active(res) => {
                self.surface.detach();
                info!(
                    "renderer destroyed: texture {} released after {} upload(s), {} reallocation(s)",
                    res.texture_id.get(),
                    res.uploads,
                    res.reallocations
                );
                true
            }
            State::Uninitialized => {
                debug!("renderer destroyed before initialization");
                true
            }
            State::Destroyed => false,
        }
    }

    pub fn state(&self) -> RendererState {
        match self.state {
            State::Uninitialized => RendererState::Uninitialized,
            State::Active(_) => RendererState::Active,
            State::Destroyed => RendererState::Destroyed,
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        match &self.state {
            State::Active(res) => Some(res.texture_id),
            _ => None,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    fn resources_mut(&mut self) -> Result<&mut RendererResources> {
        match &mut self.state {
            State::Active(res) => Ok(res),
            State::Uninitialized => Err(RenderError::NotInitialized),
            State::Destroyed => Err(RenderError::UseAfterDestroy),
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Bilinear resample of `tex` to the viewport size.
fn scale(tex: &RgbaFrame, vp: Viewport) -> Result<RgbaFrame> {
    let mut dst = vec![0u8; vp.width as usize * vp.height as usize * 4];
    let mut resizer = resize::new(
        tex.width() as usize,
        tex.height() as usize,
        vp.width as usize,
        vp.height as usize,
        Pixel::RGBA8,
        Type::Triangle,
    )
    .map_err(|e| RenderError::Scale(e.to_string()))?;
    resizer
        .resize(tex.as_raw().as_rgba(), dst.as_rgba_mut())
        .map_err(|e| RenderError::Scale(e.to_string()))?;

    RgbaFrame::from_raw(vp.width, vp.height, dst, tex.sequence, tex.kind)
        .map_err(|e| RenderError::Scale(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecam_camera::FrameKind;

    fn frame(w: u32, h: u32, seq: u64) -> RgbaFrame {
        RgbaFrame::from_raw(w, h, vec![90u8; (w * h * 4) as usize], seq, FrameKind::Color).unwrap()
    }

    #[test]
    fn lifecycle_transitions_once() {
        let (surface, probe) = RecordingSurface::new();
        let mut r = Renderer::new(Box::new(surface), RenderOptions::default());
        assert_eq!(r.state(), RendererState::Uninitialized);

        let tex = r.initialize().unwrap();
        assert_eq!(r.texture_id(), Some(tex));
        assert!(matches!(r.initialize(), Err(RenderError::AlreadyInitialized)));

        assert!(r.destroy());
        assert!(!r.destroy());
        assert_eq!(r.state(), RendererState::Destroyed);
        assert!(matches!(r.initialize(), Err(RenderError::UseAfterDestroy)));
        assert_eq!(probe.detach_count(), 1);
    }

    #[test]
    fn upload_and_present_require_active() {
        let mut r = Renderer::new(Box::new(NullSurface), RenderOptions::default());
        assert!(matches!(r.upload(&frame(2, 2, 0)), Err(RenderError::NotInitialized)));
        assert!(matches!(r.present(), Err(RenderError::NotInitialized)));

        r.initialize().unwrap();
        assert!(matches!(r.present(), Err(RenderError::NothingUploaded)));
        r.destroy();
        assert!(matches!(r.upload(&frame(2, 2, 0)), Err(RenderError::UseAfterDestroy)));
        assert!(matches!(r.present(), Err(RenderError::UseAfterDestroy)));
    }

    #[test]
    fn staging_texture_is_reused_for_same_size() {
        let (surface, probe) = RecordingSurface::new();
        let mut r = Renderer::new(Box::new(surface), RenderOptions::default());
        r.initialize().unwrap();
        for seq in 0..3 {
            r.upload(&frame(4, 4, seq)).unwrap();
            r.present().unwrap();
        }
        r.upload(&frame(8, 8, 3)).unwrap();
        r.present().unwrap();

        match &r.state {
            State::Active(res) => {
                assert_eq!(res.uploads, 4);
                assert_eq!(res.reallocations, 2);
            }
            _ => panic!("renderer should be active"),
        }
        assert_eq!(r.frames_presented(), 4);
        assert_eq!(probe.presented().last(), Some(&(3, FrameKind::Color)));
    }

    #[test]
    fn scales_to_viewport_when_enabled() {
        let (surface, probe) = RecordingSurface::new();
        let mut r = Renderer::new(Box::new(surface), RenderOptions { scale_to_viewport: true });
        r.resize(8, 6).unwrap();
        r.initialize().unwrap();
        r.upload(&frame(4, 4, 1)).unwrap();
        r.present().unwrap();

        let shown = probe.last_frame().unwrap();
        assert_eq!((shown.width(), shown.height()), (8, 6));
        for channel in shown.pixel(3, 3) {
            assert!(channel.abs_diff(90) <= 1);
        }
    }

    #[test]
    fn resize_rejects_empty_viewport() {
        let mut r = Renderer::new(Box::new(NullSurface), RenderOptions::default());
        assert_eq!(r.viewport(), None);
        r.resize(640, 480).unwrap();
        assert!(matches!(r.resize(0, 10), Err(RenderError::InvalidViewport { .. })));
        assert_eq!(r.viewport(), Some(Viewport { width: 640, height: 480 }));
        r.destroy();
        assert!(matches!(r.resize(10, 10), Err(RenderError::UseAfterDestroy)));
    }

    #[test]
    fn attach_failure_is_init_error() {
        let (surface, _probe) = RecordingSurface::failing("no EGL context");
        let mut r = Renderer::new(Box::new(surface), RenderOptions::default());
        let err = r.initialize().unwrap_err();
        assert!(matches!(err, RenderError::Init(_)));
        assert_eq!(r.state(), RendererState::Uninitialized);
    }
}
