// edgecam-camera/src/channel.rs
// Back-pressure: camera callback → channel → processing thread.
// The freshest frame wins; the producer never waits.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use log::{debug, trace};

use crate::{CameraError, Frame, Result};

pub const MIN_CAPACITY: usize = 1;
pub const MAX_CAPACITY: usize = 2;

/// Outcome of [`FrameChannel::submit`]. The submitted frame is always kept
/// unless the channel is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Stored without displacing anything.
    Accepted,
    /// Stored; the oldest queued frame (with this sequence) was discarded.
    Dropped { sequence: u64 },
    /// The channel has been shut down; the frame was discarded.
    Closed,
}

/// Outcome of [`FrameChannel::take`].
#[derive(Debug)]
pub enum Take {
    Frame(Frame),
    /// The wait timed out with nothing queued.
    Empty,
    /// [`FrameChannel::shutdown`] was called.
    Shutdown,
}

/// Bounded SPSC handoff with a drop-oldest policy.
///
/// The producer keeps a clone of the receiving end so it can evict the
/// oldest frame itself when the queue is full.
pub struct FrameChannel {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    // Dropping the sender disconnects `wake_rx`, which wakes every `take`.
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
    closed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
}

impl FrameChannel {
    pub fn new(capacity: usize) -> Result<Self> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(CameraError::InvalidCapacity(capacity));
        }
        let (tx, rx) = bounded(capacity);
        let (wake_tx, wake_rx) = bounded(0);
        Ok(Self {
            tx,
            rx,
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity,
        })
    }

    /// Hand a frame to the processing side. Never blocks.
    pub fn submit(&self, frame: Frame) -> Submission {
        if self.is_closed() {
            return Submission::Closed;
        }

        let mut frame = frame;
        let mut evicted = None;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    return match evicted {
                        Some(sequence) => Submission::Dropped { sequence },
                        None => Submission::Accepted,
                    };
                }
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // The consumer may have emptied the slot in the meantime,
                    // in which case the retry simply succeeds.
                    if let Ok(old) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!("dropping frame {} in favour of {}", old.sequence, frame.sequence);
                        evicted = Some(old.sequence);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Submission::Closed,
            }
        }
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns [`Take::Shutdown`] as soon as the channel is shut down, even if
    /// frames are still queued.
    pub fn take(&self, timeout: Duration) -> Take {
        if self.is_closed() {
            return Take::Shutdown;
        }

        let taken = select! {
            recv(self.rx) -> msg => match msg {
                Ok(frame) => Take::Frame(frame),
                Err(_) => Take::Shutdown,
            },
            recv(self.wake_rx) -> _ => Take::Shutdown,
            default(timeout) => Take::Empty,
        };

        match taken {
            // Lost a race against shutdown: the frame is released here.
            Take::Frame(frame) if self.is_closed() => {
                debug!("discarding frame {} taken during shutdown", frame.sequence);
                Take::Shutdown
            }
            other => other,
        }
    }

    /// Stop accepting frames, wake any blocked `take` and release queued frames.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.wake_tx.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
        let released = self.rx.try_iter().count();
        debug!("frame channel shut down, released {released} queued frame(s)");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames discarded by the drop-oldest policy so far. Monotonic.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> Frame {
        Frame::nv21(vec![0u8; 24], 4, 4, seq)
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        assert!(matches!(FrameChannel::new(0), Err(CameraError::InvalidCapacity(0))));
        assert!(matches!(FrameChannel::new(3), Err(CameraError::InvalidCapacity(3))));
        assert!(FrameChannel::new(2).is_ok());
    }

    #[test]
    fn full_channel_evicts_oldest() {
        let ch = FrameChannel::new(1).unwrap();
        assert_eq!(ch.submit(frame(0)), Submission::Accepted);
        assert_eq!(ch.submit(frame(1)), Submission::Dropped { sequence: 0 });
        assert_eq!(ch.submit(frame(2)), Submission::Dropped { sequence: 1 });
        assert_eq!(ch.dropped(), 2);
        assert_eq!(ch.len(), 1);

        match ch.take(Duration::from_millis(10)) {
            Take::Frame(f) => assert_eq!(f.sequence, 2),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn capacity_two_keeps_order_of_retained_frames() {
        let ch = FrameChannel::new(2).unwrap();
        for seq in 0..5 {
            ch.submit(frame(seq));
        }
        assert_eq!(ch.dropped(), 3);
        let seqs: Vec<u64> = (0..2)
            .filter_map(|_| match ch.take(Duration::from_millis(10)) {
                Take::Frame(f) => Some(f.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn take_times_out_when_empty() {
        let ch = FrameChannel::new(1).unwrap();
        assert!(matches!(ch.take(Duration::from_millis(5)), Take::Empty));
    }

    #[test]
    fn shutdown_wakes_blocked_take() {
        let ch = std::sync::Arc::new(FrameChannel::new(1).unwrap());
        let waiter = {
            let ch = ch.clone();
            std::thread::spawn(move || {
                let started = std::time::Instant::now();
                let res = ch.take(Duration::from_secs(10));
                (matches!(res, Take::Shutdown), started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        ch.shutdown();
        let (was_shutdown, waited) = waiter.join().unwrap();
        assert!(was_shutdown);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn submit_after_shutdown_is_closed() {
        let ch = FrameChannel::new(1).unwrap();
        ch.submit(frame(0));
        ch.shutdown();
        ch.shutdown();
        assert!(ch.is_empty());
        assert_eq!(ch.submit(frame(1)), Submission::Closed);
        assert!(matches!(ch.take(Duration::from_millis(1)), Take::Shutdown));
        assert_eq!(ch.dropped(), 0);
    }
}
