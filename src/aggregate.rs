//! Per-run aggregation of frame classifications.
//!
//! A `RunTally` is created at the start of a video run, fed once per input
//! frame and consumed by `finalize`. Counters only move forward.

use serde::Serialize;

use crate::detect::{BinState, Detection};

/// Running counters for one video run.
#[derive(Debug, Default)]
pub struct RunTally {
    full: u64,
    empty: u64,
    frames: u64,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed frame and its detection, if any.
    pub fn accumulate(&mut self, detection: Option<&Detection>) {
        self.frames += 1;
        match detection.map(|d| d.state) {
            Some(BinState::Full) => self.full += 1,
            Some(BinState::Empty) => self.empty += 1,
            Some(BinState::Unrecognized) | None => {}
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn finalize(self) -> RunSummary {
        RunSummary {
            full_count: self.full,
            empty_count: self.empty,
            frames_processed: self.frames,
        }
    }
}

/// Read-only counts for a finished video run.
///
/// `full_count + empty_count <= frames_processed` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    full_count: u64,
    empty_count: u64,
    frames_processed: u64,
}

impl RunSummary {
    pub fn full_count(&self) -> u64 {
        self.full_count
    }

    pub fn empty_count(&self) -> u64 {
        self.empty_count
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Frames with no detection or an unrecognized label.
    pub fn unclassified(&self) -> u64 {
        self.frames_processed - self.full_count - self.empty_count
    }
}
