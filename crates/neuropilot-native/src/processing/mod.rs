//! Signal processing pipelines
//!
//! This module conditions raw EEG frames for feature extraction:
//! - [`filters`]: Butterworth bandpass as cascaded IIR sections
//! - [`buffer`]: Fixed-capacity ring buffer and window snapshots
//! - [`conditioner`]: Per-channel filtering into the ring buffer

pub mod buffer;
pub mod conditioner;
pub mod filters;

pub use buffer::{ConditionedBuffer, WindowSnapshot};
pub use conditioner::{SignalConditioner, SignalConfig};
