//! One-intent-per-cycle arbitration
//!
//! A pure function over the cycle's qualifying candidates. Nothing here
//! touches tracker state, so the ordering can be tested in isolation.

use std::cmp::Ordering;

use neuropilot_core::{ModelSlot, TriggerKind};

/// A class that qualified this cycle, with its tie-break metadata
#[derive(Clone, Debug, PartialEq)]
pub struct ArbitrationCandidate {
    /// Model the class belongs to
    pub slot: ModelSlot,
    /// Class index within the model
    pub class: usize,
    /// Trigger kind
    pub kind: TriggerKind,
    /// Smoothed probability, raw for spikes
    pub confidence: f64,
    /// Sustained progress, 1.0 otherwise
    pub progress: f64,
    /// Configured priority, higher wins ties
    pub priority: u8,
    /// Configured emergency class
    pub emergency: bool,
    /// Rule declaration order, lower wins remaining ties
    pub order: usize,
}

/// Total precedence order; `Less` means `a` wins over `b`.
///
/// Emergency classes first, then tier (instant, spike, sustained), then
/// higher confidence, then higher priority, then declaration order.
#[must_use]
pub fn precedence(a: &ArbitrationCandidate, b: &ArbitrationCandidate) -> Ordering {
    b.emergency
        .cmp(&a.emergency)
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.order.cmp(&b.order))
}

/// Pick the single winning candidate, if any
#[must_use]
pub fn arbitrate(candidates: &[ArbitrationCandidate]) -> Option<&ArbitrationCandidate> {
    candidates.iter().min_by(|a, b| precedence(a, b))
}
