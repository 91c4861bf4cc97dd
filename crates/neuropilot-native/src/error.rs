//! Error types for the native decision pipeline
//!
//! Error types for conditioning, features, inference, model loading and
//! configuration using `thiserror`.

use std::path::PathBuf;

use neuropilot_core::{FrameError, ModelSlot, ProbabilityError};
use thiserror::Error;

/// Signal conditioner errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionerError {
    /// Frame rejected before filtering; buffer and filter state untouched
    #[error("Rejected frame: {0}")]
    Frame(#[from] FrameError),

    /// Filter parameters cannot produce a stable bandpass
    #[error("Invalid filter design: {reason}")]
    InvalidFilter {
        /// Reason
        reason: String,
    },
}

/// Feature extraction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    /// Not enough conditioned samples since session start
    #[error("Warming up: {have} of {need} samples buffered")]
    WarmingUp {
        /// Samples available
        have: usize,
        /// Samples required for one window
        need: usize,
    },

    /// Active channel index outside the frame
    #[error("Active channel {channel} out of range for {channels} channels")]
    ChannelOutOfRange {
        /// Offending channel index
        channel: usize,
        /// Channels per frame
        channels: usize,
    },

    /// Snapshot channel count differs from the extractor's
    #[error("Snapshot has {got} channels, extractor expects {expected}")]
    ChannelMismatch {
        /// Expected channels
        expected: usize,
        /// Channels in snapshot
        got: usize,
    },

    /// No channels selected for feature computation
    #[error("No active channels configured")]
    NoActiveChannels,
}

/// Per-model inference errors
///
/// Every variant degrades to "no vote" for the affected model this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Feature vector length does not match the model input
    #[error("Input shape mismatch: got {got} features, expected {expected}")]
    ShapeMismatch {
        /// Features provided
        got: usize,
        /// Features expected
        expected: usize,
    },

    /// NaN or infinity in model input or output
    #[error("Non-finite value in model {stage}")]
    NonFinite {
        /// "input" or "output"
        stage: &'static str,
    },

    /// Output failed distribution validation
    #[error("Invalid probability output: {0}")]
    InvalidOutput(#[from] ProbabilityError),

    /// Inference exceeded its time budget
    #[error("Inference timed out after {timeout_ms}ms")]
    Timeout {
        /// Time budget in milliseconds
        timeout_ms: u64,
    },

    /// The model's previous inference has not returned yet
    #[error("Previous inference still running")]
    Busy,

    /// Inference task aborted
    #[error("Inference task failed: {reason}")]
    TaskFailed {
        /// Reason
        reason: String,
    },
}

/// Model artifact loading errors (fatal at startup)
#[derive(Error, Debug)]
pub enum ModelLoadError {
    /// Artifact file could not be read
    #[error("Failed to read model {path:?}: {source}")]
    Io {
        /// Artifact path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact is not valid JSON for a model
    #[error("Failed to parse model {path:?}: {source}")]
    Parse {
        /// Artifact path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Artifact dimensions are inconsistent
    #[error("Malformed model {name}: {reason}")]
    Malformed {
        /// Model name
        name: String,
        /// Reason
        reason: String,
    },

    /// Model input length does not match the configured feature layout
    #[error("{slot} model expects {model_len} features, extractor produces {feature_len}")]
    InputLength {
        /// Ensemble slot
        slot: ModelSlot,
        /// Model input length
        model_len: usize,
        /// Feature vector length
        feature_len: usize,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON
    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range or inconsistent
    #[error("Invalid config parameter {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: &'static str,
        /// Reason
        reason: String,
    },

    /// A class rule names a label the model does not produce
    #[error("Unknown class {label:?} for {slot} model")]
    UnknownLabel {
        /// Ensemble slot
        slot: ModelSlot,
        /// Label
        label: String,
    },

    /// Two rules target the same class
    #[error("Duplicate rule for class {label:?} on {slot} model")]
    DuplicateRule {
        /// Ensemble slot
        slot: ModelSlot,
        /// Label
        label: String,
    },
}

/// Pipeline construction errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Model loading error
    #[error("Model error: {0}")]
    ModelLoad(#[from] ModelLoadError),

    /// Conditioner construction error
    #[error("Conditioner error: {0}")]
    Conditioner(#[from] ConditionerError),

    /// Feature extractor construction error
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
}

/// Result type for conditioner operations
pub type ConditionerResult<T> = Result<T, ConditionerError>;

/// Result type for feature extraction
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Result type for inference
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Result type for model loading
pub type ModelLoadResult<T> = Result<T, ModelLoadError>;

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for pipeline construction
pub type PipelineResult<T> = Result<T, PipelineError>;
