//! Pipeline configuration
//!
//! One JSON document with a section per component. Every section has a
//! `Default` reproducing the reference deployment, and missing fields fall
//! back to those defaults.

use std::fs;
use std::path::Path;

use neuropilot_core::types::US_PER_SEC;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::control::{MapperConfig, SafetyConfig};
use crate::decision::{ContinuousConfig, EngineConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::ml::{FeatureConfig, ModelsConfig};
use crate::processing::SignalConfig;

/// Decision cycle timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Decision cycles per second
    pub cycle_hz: f64,
    /// Inference budget per cycle (ms)
    pub inference_timeout_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self { cycle_hz: 2.0, inference_timeout_ms: 250 }
    }
}

impl CycleConfig {
    /// Nominal cycle period in microseconds
    #[must_use]
    pub fn period_us(&self) -> u64 {
        (US_PER_SEC as f64 / self.cycle_hz).round() as u64
    }
}

/// Complete pipeline configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Acquisition and filtering
    pub signal: SignalConfig,
    /// Decision cycle timing
    pub cycle: CycleConfig,
    /// Feature layout
    pub features: FeatureConfig,
    /// Model artifacts
    pub models: ModelsConfig,
    /// Smoothing, triggers and arbitration
    pub engine: EngineConfig,
    /// Spike-driven yaw while flying
    pub continuous: ContinuousConfig,
    /// Bindings, cooldowns and legality
    pub mapper: MapperConfig,
    /// Flight-time limits
    pub safety: SafetyConfig,
}

impl PipelineConfig {
    /// Read and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`], [`ConfigError::Parse`] or a validation
    /// error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check every section and the cross-section constraints.
    ///
    /// Rule labels are checked against the models later, when the engine is
    /// built from the loaded artifacts.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.signal.validate()?;

        if !(self.cycle.cycle_hz.is_finite() && self.cycle.cycle_hz > 0.0 && self.cycle.cycle_hz <= 50.0) {
            return Err(ConfigError::InvalidParameter {
                parameter: "cycle.cycle_hz",
                reason: format!("{} outside (0, 50]", self.cycle.cycle_hz),
            });
        }
        if self.cycle.inference_timeout_ms == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "cycle.inference_timeout_ms",
                reason: "must be positive".into(),
            });
        }

        self.engine.validate()?;
        self.continuous.validate()?;
        self.mapper.validate()?;

        if self.safety.auto_land && self.safety.max_flight_secs == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "safety.max_flight_secs",
                reason: "must be positive when auto_land is enabled".into(),
            });
        }
        Ok(())
    }
}
