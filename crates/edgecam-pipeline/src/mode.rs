// edgecam-pipeline/src/mode.rs
use std::sync::atomic::{AtomicU8, Ordering};

use log::warn;
use serde::{Deserialize, Serialize};

/// Which transform the processing thread applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessingMode {
    Raw = 0,
    EdgeDetect = 1,
}

impl ProcessingMode {
    /// Decode a control code (`0` = raw, `1` = edge detection).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Raw),
            1 => Some(Self::EdgeDetect),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    fn from_u8(v: u8) -> Self {
        if v == Self::EdgeDetect as u8 {
            Self::EdgeDetect
        } else {
            Self::Raw
        }
    }
}

/// Current processing mode, readable and writable from any thread.
///
/// Only the latest value matters: modes set and overwritten between two
/// frames are never observed.
#[derive(Debug)]
pub struct ModeState(AtomicU8);

impl ModeState {
    pub fn new(mode: ProcessingMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> ProcessingMode {
        ProcessingMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, mode: ProcessingMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    /// Apply a control code. Unknown codes select the raw feed.
    pub fn set_code(&self, code: i32) -> ProcessingMode {
        let mode = ProcessingMode::from_code(code).unwrap_or_else(|| {
            warn!("unknown processing mode code {code}, using raw feed");
            ProcessingMode::Raw
        });
        self.set(mode);
        mode
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(ProcessingMode::EdgeDetect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(ProcessingMode::from_code(0), Some(ProcessingMode::Raw));
        assert_eq!(ProcessingMode::from_code(1), Some(ProcessingMode::EdgeDetect));
        assert_eq!(ProcessingMode::from_code(7), None);
        assert_eq!(ProcessingMode::EdgeDetect.code(), 1);
    }

    #[test]
    fn latest_set_wins() {
        let state = ModeState::default();
        assert_eq!(state.get(), ProcessingMode::EdgeDetect);
        state.set(ProcessingMode::Raw);
        state.set(ProcessingMode::EdgeDetect);
        state.set(ProcessingMode::Raw);
        assert_eq!(state.get(), ProcessingMode::Raw);
    }

    #[test]
    fn unknown_code_falls_back_to_raw() {
        let state = ModeState::new(ProcessingMode::EdgeDetect);
        assert_eq!(state.set_code(-3), ProcessingMode::Raw);
        assert_eq!(state.get(), ProcessingMode::Raw);
    }

    #[test]
    fn concurrent_writers_leave_a_valid_mode() {
        let state = std::sync::Arc::new(ModeState::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for n in 0..1000 {
                        state.set_code((i + n) % 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(matches!(state.get(), ProcessingMode::Raw | ProcessingMode::EdgeDetect));
    }
}
