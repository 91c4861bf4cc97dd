//! Machine learning inference for BCI
//!
//! Provides covariance feature extraction and dual-model intent
//! classification. Models are linear softmax scorers loaded from JSON
//! artifacts; any other scorer can be plugged in through [`Classifier`].

pub mod classifier;
pub mod ensemble;
pub mod features;

pub use classifier::{Classifier, Scaler, SoftmaxModel};
pub use ensemble::{ClassifierEnsemble, EnsembleOutput, ModelValidation, ModelsConfig};
pub use features::{FeatureConfig, FeatureExtractor, FeatureLayout, FeatureVector};
