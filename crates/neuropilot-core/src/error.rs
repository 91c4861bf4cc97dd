//! Error types for NeuroPilot BCI core
//!
//! These errors work in `no_std` environments and carry enough context to
//! be logged without heap allocation.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Frame Errors
// ============================================================================

/// A sample frame that cannot be accepted by the signal conditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameError {
    /// Frame has a different channel count than the session
    ChannelMismatch {
        /// Configured channel count
        expected: usize,
        /// Channel count in the frame
        got: usize,
    },
    /// Frame timestamp does not advance past the last accepted frame
    NonMonotonic {
        /// Last accepted timestamp in microseconds
        previous_us: u64,
        /// Rejected timestamp in microseconds
        got_us: u64,
    },
    /// A channel reading is NaN or infinite
    NonFinite {
        /// Channel index
        channel: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelMismatch { expected, got } => {
                write!(f, "Channel mismatch: expected {expected} channels, got {got}")
            }
            Self::NonMonotonic { previous_us, got_us } => {
                write!(f, "Non-monotonic timestamp: {got_us}µs after {previous_us}µs")
            }
            Self::NonFinite { channel } => {
                write!(f, "Non-finite reading on channel {channel}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

// ============================================================================
// Probability Errors
// ============================================================================

/// A model output that is not a valid probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProbabilityError {
    /// No classes
    Empty,
    /// Label and value counts differ
    LengthMismatch {
        /// Number of labels
        labels: usize,
        /// Number of values
        values: usize,
    },
    /// A probability is NaN or infinite
    NonFinite {
        /// Class index
        index: usize,
    },
    /// A probability is negative
    Negative {
        /// Class index
        index: usize,
        /// Offending value
        value: f64,
    },
    /// Probabilities do not sum to one within tolerance
    BadSum {
        /// Actual sum
        sum: f64,
    },
}

impl fmt::Display for ProbabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty probability distribution"),
            Self::LengthMismatch { labels, values } => {
                write!(f, "Label/value mismatch: {labels} labels, {values} values")
            }
            Self::NonFinite { index } => write!(f, "Non-finite probability at class {index}"),
            Self::Negative { index, value } => {
                write!(f, "Negative probability {value} at class {index}")
            }
            Self::BadSum { sum } => write!(f, "Probabilities sum to {sum:.4}, expected 1"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ProbabilityError {}
