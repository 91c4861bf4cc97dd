//! Dual-model classifier ensemble
//!
//! Runs the coarse and fine models independently on the same feature
//! vector. A failure in one model never affects the other: each slot carries
//! its own `Result`, and anything that is not a valid distribution becomes
//! "no vote" for that slot this cycle.

use std::path::PathBuf;
use std::time::Instant;

use neuropilot_core::{ClassProbabilities, ModelSlot};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::classifier::{Classifier, SoftmaxModel};
use super::features::FeatureVector;
use crate::error::{InferenceError, InferenceResult, ModelLoadError, ModelLoadResult};

/// Coarse motor-imagery classes of the reference deployment
pub const COARSE_LABELS: [&str; 4] = ["Rest", "Left_Fist", "Right_Fist", "Both_Fists"];

/// Fine kinesis classes of the reference deployment
pub const FINE_LABELS: [&str; 8] = [
    "Unknown_Disappear34",
    "Left_Foot",
    "Left_Arm",
    "Push",
    "Tongue",
    "Disappear22",
    "Rest",
    "Jumping_Jacks",
];

/// Model artifact locations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Coarse model artifact
    pub coarse_path: PathBuf,
    /// Fine model artifact
    pub fine_path: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            coarse_path: PathBuf::from("models/coarse.json"),
            fine_path: PathBuf::from("models/fine.json"),
        }
    }
}

/// Both models' results for one cycle
#[derive(Clone, Debug)]
pub struct EnsembleOutput {
    /// Timestamp of the features that were scored
    pub timestamp_us: u64,
    /// Per-slot result, indexed by [`ModelSlot::index`]
    pub results: [InferenceResult<ClassProbabilities>; 2],
    /// Wall-clock time spent in inference
    pub latency_us: u64,
}

impl EnsembleOutput {
    /// Valid distribution from `slot`, if it voted
    #[must_use]
    pub fn get(&self, slot: ModelSlot) -> Option<&ClassProbabilities> {
        self.results[slot.index()].as_ref().ok()
    }

    /// Failure reason for `slot`, if it did not vote
    #[must_use]
    pub fn error(&self, slot: ModelSlot) -> Option<&InferenceError> {
        self.results[slot.index()].as_ref().err()
    }

    /// Number of models that produced a valid distribution
    #[must_use]
    pub fn votes(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }
}

/// Result of scoring reference features through one model
#[derive(Clone, Debug, Serialize)]
pub struct ModelValidation {
    /// Ensemble slot
    pub slot: ModelSlot,
    /// Model name
    pub name: String,
    /// Predicted class, or the failure reason
    pub predicted: Result<String, String>,
    /// Probability of the predicted class
    pub confidence: f64,
    /// Inference latency
    pub latency_us: u64,
}

/// Exactly two load-once models sharing one feature layout
pub struct ClassifierEnsemble {
    models: [Box<dyn Classifier>; 2],
    feature_len: usize,
}

impl std::fmt::Debug for ClassifierEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierEnsemble")
            .field("coarse", &self.models[0].name())
            .field("fine", &self.models[1].name())
            .field("feature_len", &self.feature_len)
            .finish()
    }
}

impl ClassifierEnsemble {
    /// Pair two models, checking both accept `feature_len` inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ModelLoadError::InputLength`] on a shape mismatch and
    /// [`ModelLoadError::Malformed`] for a model without labels.
    pub fn new(
        coarse: Box<dyn Classifier>,
        fine: Box<dyn Classifier>,
        feature_len: usize,
    ) -> ModelLoadResult<Self> {
        let models = [coarse, fine];
        for slot in ModelSlot::ALL {
            let model = &models[slot.index()];
            if model.labels().is_empty() {
                return Err(ModelLoadError::Malformed {
                    name: model.name().to_string(),
                    reason: "no class labels".into(),
                });
            }
            if model.input_len() != feature_len {
                return Err(ModelLoadError::InputLength {
                    slot,
                    model_len: model.input_len(),
                    feature_len,
                });
            }
        }
        Ok(Self { models, feature_len })
    }

    /// Load both artifacts from disk.
    ///
    /// # Errors
    ///
    /// Any load or shape error is returned; model loading is fatal.
    pub fn load(config: &ModelsConfig, feature_len: usize) -> ModelLoadResult<Self> {
        let coarse = SoftmaxModel::load(&config.coarse_path)?;
        let fine = SoftmaxModel::load(&config.fine_path)?;
        Self::new(Box::new(coarse), Box::new(fine), feature_len)
    }

    /// Deterministic demo models with the reference class sets.
    ///
    /// # Errors
    ///
    /// Only fails for `feature_len == 0`.
    pub fn synthetic(feature_len: usize) -> ModelLoadResult<Self> {
        let coarse = SoftmaxModel::synthetic("coarse-demo", &COARSE_LABELS, feature_len, 1);
        let fine = SoftmaxModel::synthetic("fine-demo", &FINE_LABELS, feature_len, 2);
        coarse.check()?;
        fine.check()?;
        Self::new(Box::new(coarse), Box::new(fine), feature_len)
    }

    /// Model in `slot`
    #[must_use]
    pub fn model(&self, slot: ModelSlot) -> &dyn Classifier {
        self.models[slot.index()].as_ref()
    }

    /// Ordered labels of the model in `slot`
    #[must_use]
    pub fn labels(&self, slot: ModelSlot) -> &[String] {
        self.models[slot.index()].labels()
    }

    /// Expected feature vector length
    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    /// Score `features` through both models.
    pub fn infer(&self, features: &FeatureVector) -> EnsembleOutput {
        let start = Instant::now();
        let results = ModelSlot::ALL.map(|slot| {
            let result = self.score(slot, &features.values);
            if let Err(e) = &result {
                warn!(slot = %slot, model = self.model(slot).name(), error = %e, "Model produced no vote");
            }
            result
        });

        EnsembleOutput {
            timestamp_us: features.timestamp_us,
            results,
            latency_us: elapsed_us(start),
        }
    }

    /// Score `features` through the model in `slot` only.
    ///
    /// # Errors
    ///
    /// Returns the model's [`InferenceError`] or an invalid distribution.
    pub fn score(&self, slot: ModelSlot, features: &[f64]) -> InferenceResult<ClassProbabilities> {
        let model = self.model(slot);
        let raw = model.predict(features)?;
        Ok(ClassProbabilities::new(model.labels().to_vec(), raw)?)
    }

    /// Run `features` through both models and report what each predicts.
    pub fn validate(&self, features: &FeatureVector) -> Vec<ModelValidation> {
        ModelSlot::ALL
            .iter()
            .map(|&slot| {
                let start = Instant::now();
                let result = self.score(slot, &features.values);
                let latency_us = elapsed_us(start);
                let name = self.model(slot).name().to_string();

                let (predicted, confidence) = match &result {
                    Ok(probs) => match probs.argmax() {
                        Some((i, p)) => (Ok(probs.labels()[i].clone()), p),
                        None => (Err("empty output".to_string()), 0.0),
                    },
                    Err(e) => (Err(e.to_string()), 0.0),
                };

                match &predicted {
                    Ok(label) => info!(slot = %slot, model = %name, predicted = %label, confidence, latency_us, "Model validated"),
                    Err(reason) => warn!(slot = %slot, model = %name, reason = %reason, "Model validation failed"),
                }

                ModelValidation { slot, name, predicted, confidence, latency_us }
            })
            .collect()
    }
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}
