// edgecam-render/src/surface.rs
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use edgecam_camera::{FrameKind, RgbaFrame};
use thiserror::Error;

/// Failure reported by a display surface while attaching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SurfaceError(pub String);

/// Whatever windowing/surface abstraction owns the visible output.
///
/// `attach` runs once when the renderer initializes and `detach` once when it
/// is destroyed. `present` is only ever called in between.
pub trait DisplaySurface: Send {
    fn attach(&mut self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn present(&mut self, frame: &RgbaFrame);

    fn detach(&mut self) {}
}

/// Surface that throws every frame away.
#[derive(Debug, Default)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn present(&mut self, _frame: &RgbaFrame) {}
}

/// One call observed by a [`RecordingSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Attached,
    Presented { sequence: u64, kind: FrameKind },
    Detached,
}

// Events kept by `RecordingSurface::new` before the oldest are dropped.
const DEFAULT_HISTORY: usize = 4096;

#[derive(Debug)]
struct Recording {
    events: VecDeque<SurfaceEvent>,
    history: usize,
    last: Option<RgbaFrame>,
    attached: bool,
    presents: u64,
    presents_while_detached: u64,
    detaches: usize,
    fail_attach: Option<String>,
}

impl Recording {
    fn new(history: usize) -> Self {
        Self {
            events: VecDeque::new(),
            history,
            last: None,
            attached: false,
            presents: 0,
            presents_while_detached: 0,
            detaches: 0,
            fail_attach: None,
        }
    }

    fn push(&mut self, event: SurfaceEvent) {
        if self.history == 0 {
            return;
        }
        if self.events.len() == self.history {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Surface that records what it is asked to do, for tests and snapshots.
///
/// Inspect it through the [`SurfaceProbe`] returned alongside it. Only the
/// most recent events are kept; counters and the last frame are unaffected.
#[derive(Debug)]
pub struct RecordingSurface {
    shared: Arc<Mutex<Recording>>,
}

/// Read side of a [`RecordingSurface`]; cheap to clone.
#[derive(Debug, Clone)]
pub struct SurfaceProbe {
    shared: Arc<Mutex<Recording>>,
}

impl RecordingSurface {
    pub fn new() -> (Self, SurfaceProbe) {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Keep at most `history` events. `0` keeps only counters and the last frame.
    pub fn with_history(history: usize) -> (Self, SurfaceProbe) {
        let shared = Arc::new(Mutex::new(Recording::new(history)));
        (Self { shared: shared.clone() }, SurfaceProbe { shared })
    }

    /// A surface whose `attach` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> (Self, SurfaceProbe) {
        let (surface, probe) = Self::new();
        lock(&surface.shared).fail_attach = Some(reason.into());
        (surface, probe)
    }
}

impl DisplaySurface for RecordingSurface {
    fn attach(&mut self) -> Result<(), SurfaceError> {
        let mut rec = lock(&self.shared);
        if let Some(reason) = rec.fail_attach.clone() {
            return Err(SurfaceError(reason));
        }
        rec.attached = true;
        rec.push(SurfaceEvent::Attached);
        Ok(())
    }

    fn present(&mut self, frame: &RgbaFrame) {
        let mut rec = lock(&self.shared);
        if !rec.attached {
            rec.presents_while_detached += 1;
        }
        rec.presents += 1;
        rec.push(SurfaceEvent::Presented { sequence: frame.sequence, kind: frame.kind });
        rec.last = Some(frame.clone());
    }

    fn detach(&mut self) {
        let mut rec = lock(&self.shared);
        rec.attached = false;
        rec.detaches += 1;
        rec.push(SurfaceEvent::Detached);
    }
}

impl SurfaceProbe {
    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        lock(&self.shared).events.iter().copied().collect()
    }

    /// Retained presented frames, as `(sequence, kind)`.
    pub fn presented(&self) -> Vec<(u64, FrameKind)> {
        lock(&self.shared)
            .events
            .iter()
            .filter_map(|e| match *e {
                SurfaceEvent::Presented { sequence, kind } => Some((sequence, kind)),
                _ => None,
            })
            .collect()
    }

    pub fn last_frame(&self) -> Option<RgbaFrame> {
        lock(&self.shared).last.clone()
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.shared).attached
    }

    /// Present calls that arrived while the surface was not attached.
    pub fn presents_while_detached(&self) -> u64 {
        lock(&self.shared).presents_while_detached
    }

    /// Every present call, including those no longer in the history.
    pub fn present_count(&self) -> u64 {
        lock(&self.shared).presents
    }

    pub fn detach_count(&self) -> usize {
        lock(&self.shared).detaches
    }
}

fn lock(shared: &Mutex<Recording>) -> MutexGuard<'_, Recording> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecam_camera::FrameKind;

    fn frame(seq: u64) -> RgbaFrame {
        RgbaFrame::from_raw(1, 1, vec![0, 0, 0, 255], seq, FrameKind::Color).unwrap()
    }

    #[test]
    fn history_keeps_most_recent_events() {
        let (mut surface, probe) = RecordingSurface::with_history(3);
        surface.attach().unwrap();
        for seq in 0..5 {
            surface.present(&frame(seq));
        }
        surface.detach();

        assert_eq!(
            probe.events(),
            vec![
                SurfaceEvent::Presented { sequence: 3, kind: FrameKind::Color },
                SurfaceEvent::Presented { sequence: 4, kind: FrameKind::Color },
                SurfaceEvent::Detached,
            ]
        );
        assert_eq!(probe.present_count(), 5);
        assert_eq!(probe.detach_count(), 1);
        assert_eq!(probe.last_frame().map(|f| f.sequence), Some(4));
    }

    #[test]
    fn zero_history_keeps_only_last_frame() {
        let (mut surface, probe) = RecordingSurface::with_history(0);
        surface.attach().unwrap();
        surface.present(&frame(7));
        assert!(probe.events().is_empty());
        assert!(probe.is_attached());
        assert_eq!(probe.present_count(), 1);
        assert_eq!(probe.last_frame().map(|f| f.sequence), Some(7));
    }
}
