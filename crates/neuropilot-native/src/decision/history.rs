//! Bounded per-class probability history
//!
//! Each class keeps the raw probabilities of its last `history_size`
//! cycles. The smoothed value and the running statistics are both derived
//! from this window.

use std::collections::VecDeque;

use neuropilot_core::math::mean_std;
use serde::Serialize;

/// Predictions inspected by the jitter detector
pub const JITTER_WINDOW: usize = 5;

/// More argmax changes than this within the window flags jitter
pub const JITTER_MAX_CHANGES: usize = 3;

/// Running mean and population standard deviation of one class
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ClassStatistics {
    /// Mean over the history window
    pub mean: f64,
    /// Population standard deviation over the history window
    pub std: f64,
    /// Entries in the history window
    pub samples: usize,
}

/// Raw probability history of one class
#[derive(Clone, Debug)]
pub struct ClassHistory {
    values: VecDeque<f64>,
    capacity: usize,
    smoothing_window: usize,
}

impl ClassHistory {
    /// Create an empty history
    #[must_use]
    pub fn new(capacity: usize, smoothing_window: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            smoothing_window,
        }
    }

    /// Append a raw probability, dropping the oldest at capacity
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Most recent raw value
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean of the last `smoothing_window` entries, or of all entries while
    /// fewer exist
    #[must_use]
    pub fn smoothed(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let k = self.smoothing_window.min(self.values.len());
        let sum: f64 = self.values.iter().rev().take(k).sum();
        Some(sum / k as f64)
    }

    /// Statistics over the whole window
    #[must_use]
    pub fn stats(&self) -> ClassStatistics {
        let (mean, std) = mean_std(self.values.iter().copied());
        ClassStatistics { mean, std, samples: self.values.len() }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Recent argmax classes of one model, for jitter detection
#[derive(Clone, Debug, Default)]
pub struct ArgmaxTrail {
    recent: VecDeque<usize>,
}

impl ArgmaxTrail {
    /// Record this cycle's most likely class
    pub fn push(&mut self, class: usize) {
        if self.recent.len() == JITTER_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(class);
    }

    /// Argmax changes between consecutive recorded predictions
    #[must_use]
    pub fn changes(&self) -> usize {
        self.recent
            .iter()
            .zip(self.recent.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count()
    }

    /// Whether the model keeps flipping between classes
    #[must_use]
    pub fn is_jittering(&self) -> bool {
        self.recent.len() == JITTER_WINDOW && self.changes() > JITTER_MAX_CHANGES
    }

    /// Forget recorded predictions
    pub fn clear(&mut self) {
        self.recent.clear();
    }
}
