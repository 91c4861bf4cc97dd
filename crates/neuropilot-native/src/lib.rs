//! NeuroPilot Native - Host-side EEG decision pipeline
//!
//! This crate turns a stream of EEG frames into flight commands:
//! - Signal conditioning (bandpass filtering, ring buffer)
//! - Covariance feature extraction
//! - Dual-model intent classification
//! - Temporal decision engine (sustained, instant and spike triggers)
//! - Command mapping with cooldowns, legality and a flight watchdog
//!
//! # Modules
//!
//! - [`processing`]: Signal conditioning
//! - [`ml`]: Feature extraction and classifier ensemble
//! - [`decision`]: Temporal decision engine
//! - [`control`]: Intent to flight-command mapping
//! - [`pipeline`]: Cycle orchestration and async runtime

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod control;
pub mod decision;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod processing;
pub mod simulation;
pub mod telemetry;

// Re-export key types
pub use config::{CycleConfig, PipelineConfig};
pub use control::{CommandMapper, CommandOutcome, DropReason};
pub use decision::TemporalDecisionEngine;
pub use error::{ConfigError, ModelLoadError, PipelineError};
pub use ml::{ClassifierEnsemble, FeatureExtractor};
pub use pipeline::{
    ControlSignal, CycleReport, CycleStatus, DecisionPipeline, PipelineRuntime, RuntimeChannels,
    SessionClock,
};
pub use processing::SignalConditioner;
pub use simulation::SyntheticSource;
pub use telemetry::CycleTelemetry;
