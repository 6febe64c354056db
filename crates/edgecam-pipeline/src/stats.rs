// edgecam-pipeline/src/stats.rs
// Counters shared between the processing thread and whoever asks.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Presents per second over a sliding window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self { window, stamps: VecDeque::new() }
    }

    pub fn record(&mut self, now: Instant) {
        self.stamps.push_back(now);
        self.evict(now);
    }

    pub fn fps(&mut self, now: Instant) -> f64 {
        self.evict(now);
        if self.stamps.len() < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (self.stamps.len() - 1) as f64 / span
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.stamps.front() {
            if now.duration_since(front) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    submitted: AtomicU64,
    malformed: AtomicU64,
    fallbacks: AtomicU64,
    presented: AtomicU64,
    render_errors: AtomicU64,
    last_frame_micros: AtomicU64,
    fps: Mutex<FpsCounter>,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    /// Discarded by the drop-oldest policy.
    pub dropped: u64,
    pub malformed: u64,
    pub transform_fallbacks: u64,
    pub presented: u64,
    pub render_errors: u64,
    pub last_frame_ms: f64,
    pub fps: f64,
}

impl PipelineStats {
    pub fn new(fps_window: Duration) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            presented: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            last_frame_micros: AtomicU64::new(0),
            fps: Mutex::new(FpsCounter::new(fps_window)),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_render_error(&self) {
        self.render_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_presented(&self, took: Duration) {
        self.presented.fetch_add(1, Ordering::Release);
        let micros = u64::try_from(took.as_micros()).unwrap_or(u64::MAX);
        self.last_frame_micros.store(micros, Ordering::Relaxed);
        if let Ok(mut fps) = self.fps.lock() {
            fps.record(Instant::now());
        }
    }

    pub fn snapshot(&self, dropped: u64) -> StatsSnapshot {
        let fps = self
            .fps
            .lock()
            .map(|mut f| f.fps(Instant::now()))
            .unwrap_or(0.0);
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped,
            malformed: self.malformed.load(Ordering::Relaxed),
            transform_fallbacks: self.fallbacks.load(Ordering::Relaxed),
            presented: self.presented.load(Ordering::Acquire),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            last_frame_ms: self.last_frame_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_over_window() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..11 {
            fps.record(t0 + Duration::from_millis(i * 50));
        }
        // 10 intervals over 500 ms
        let value = fps.fps(t0 + Duration::from_millis(500));
        assert!((value - 20.0).abs() < 1e-6, "{value}");
    }

    #[test]
    fn old_stamps_fall_out() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        fps.record(t0);
        fps.record(t0 + Duration::from_millis(100));
        assert_eq!(fps.fps(t0 + Duration::from_secs(5)), 0.0);
    }

    #[test]
    fn snapshot_counts() {
        let stats = PipelineStats::new(Duration::from_secs(1));
        stats.record_submitted();
        stats.record_submitted();
        stats.record_malformed();
        stats.record_presented(Duration::from_micros(2500));
        let snap = stats.snapshot(3);
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.dropped, 3);
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.presented, 1);
        assert!((snap.last_frame_ms - 2.5).abs() < 1e-9);
    }
}
