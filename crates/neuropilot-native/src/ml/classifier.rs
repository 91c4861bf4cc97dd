//! Classifier interface and the linear softmax scorer
//!
//! Models are opaque pre-trained scorers behind the [`Classifier`] trait.
//! [`SoftmaxModel`] loads a JSON artifact once at startup: class labels,
//! an optional standard scaler, and a linear layer scored through softmax.

use std::fs;
use std::path::Path;

use neuropilot_core::math::softmax;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InferenceError, InferenceResult, ModelLoadError, ModelLoadResult};

/// A pre-trained multi-class scorer.
///
/// `predict` must be callable concurrently from a blocking worker thread.
pub trait Classifier: Send + Sync {
    /// Model name for logs and telemetry
    fn name(&self) -> &str;

    /// Ordered class labels
    fn labels(&self) -> &[String];

    /// Expected feature vector length
    fn input_len(&self) -> usize;

    /// Score a feature vector, one value per label.
    ///
    /// The output is validated by the caller; implementations need not
    /// guarantee a proper distribution.
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] for a wrong input shape or a
    /// numerical failure.
    fn predict(&self, features: &[f64]) -> InferenceResult<Vec<f64>>;
}

/// Standard-scaler parameters: `(x − mean) / scale`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    /// Per-feature mean
    pub mean: Vec<f64>,
    /// Per-feature scale (standard deviation)
    pub scale: Vec<f64>,
}

/// Linear softmax classifier loaded from a JSON artifact
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    /// Model name
    pub name: String,
    /// Ordered class labels
    pub labels: Vec<String>,
    /// Optional input standardisation
    #[serde(default)]
    pub scaler: Option<Scaler>,
    /// One weight row per class
    pub weights: Vec<Vec<f64>>,
    /// One bias per class
    pub bias: Vec<f64>,
}

impl SoftmaxModel {
    /// Load and validate an artifact.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelLoadError`] if the file cannot be read or parsed,
    /// or its dimensions are inconsistent.
    pub fn load(path: impl AsRef<Path>) -> ModelLoadResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self = serde_json::from_str(&text).map_err(|source| ModelLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        model.check()?;

        info!(
            model = %model.name,
            classes = model.labels.len(),
            inputs = model.input_len(),
            path = %path.display(),
            "Loaded model"
        );
        Ok(model)
    }

    /// Write the artifact as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ModelLoadError::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ModelLoadResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| ModelLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Deterministic pseudo-random model for demos and tests.
    #[must_use]
    pub fn synthetic(name: &str, labels: &[&str], input_len: usize, seed: u64) -> Self {
        let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        };

        let weights: Vec<Vec<f64>> = labels
            .iter()
            .map(|_| (0..input_len).map(|_| next() * 0.1).collect::<Vec<f64>>())
            .collect();
        let bias: Vec<f64> = labels.iter().map(|_| next() * 0.1).collect();

        Self {
            name: name.to_string(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            scaler: None,
            weights,
            bias,
        }
    }

    /// Check dimensions for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ModelLoadError::Malformed`] describing the first problem.
    pub fn check(&self) -> ModelLoadResult<()> {
        let malformed = |reason: String| {
            Err(ModelLoadError::Malformed { name: self.name.clone(), reason })
        };

        if self.labels.is_empty() {
            return malformed("no class labels".into());
        }
        if self.weights.len() != self.labels.len() || self.bias.len() != self.labels.len() {
            return malformed(format!(
                "{} labels, {} weight rows, {} biases",
                self.labels.len(),
                self.weights.len(),
                self.bias.len()
            ));
        }
        let n = self.input_len();
        if n == 0 {
            return malformed("zero-length input".into());
        }
        if let Some(row) = self.weights.iter().position(|w| w.len() != n) {
            return malformed(format!("weight row {row} has {} columns, expected {n}", self.weights[row].len()));
        }
        if let Some(scaler) = &self.scaler {
            if scaler.mean.len() != n || scaler.scale.len() != n {
                return malformed(format!(
                    "scaler has {}/{} entries, expected {n}",
                    scaler.mean.len(),
                    scaler.scale.len()
                ));
            }
            if scaler.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
                return malformed("scaler scale must be finite and non-zero".into());
            }
        }
        let all_finite = self.weights.iter().flatten().chain(&self.bias).all(|v| v.is_finite());
        if !all_finite {
            return malformed("non-finite weight or bias".into());
        }
        Ok(())
    }
}

impl Classifier for SoftmaxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn input_len(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn predict(&self, features: &[f64]) -> InferenceResult<Vec<f64>> {
        let n = self.input_len();
        if features.len() != n {
            return Err(InferenceError::ShapeMismatch { got: features.len(), expected: n });
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { stage: "input" });
        }

        let scaled: Vec<f64> = match &self.scaler {
            Some(s) => features
                .iter()
                .zip(s.mean.iter().zip(&s.scale))
                .map(|(x, (m, sd))| (x - m) / sd)
                .collect(),
            None => features.to_vec(),
        };

        let mut logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&scaled).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        if logits.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { stage: "output" });
        }
        softmax(&mut logits);
        Ok(logits)
    }
}
