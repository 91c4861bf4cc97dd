//! Validated class probability distributions
//!
//! A [`ClassProbabilities`] can only be built through
//! [`ClassProbabilities::new`], which rejects anything that is not a proper
//! distribution. Downstream stages can therefore rely on every value being
//! finite, non-negative, and the total being one.

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::error::ProbabilityError;

/// Allowed deviation of the probability sum from 1.0.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-3;

/// One model's output for one cycle: ordered class labels and probabilities.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassProbabilities {
    labels: Vec<String>,
    values: Vec<f64>,
}

impl ClassProbabilities {
    /// Validate and wrap a model output.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbabilityError`] if the distribution is empty, the
    /// label count differs from the value count, any value is non-finite or
    /// negative, or the sum is outside `1 ± PROBABILITY_SUM_TOLERANCE`.
    pub fn new(labels: Vec<String>, values: Vec<f64>) -> Result<Self, ProbabilityError> {
        if values.is_empty() {
            return Err(ProbabilityError::Empty);
        }
        if labels.len() != values.len() {
            return Err(ProbabilityError::LengthMismatch {
                labels: labels.len(),
                values: values.len(),
            });
        }

        for (index, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(ProbabilityError::NonFinite { index });
            }
            if value < 0.0 {
                return Err(ProbabilityError::Negative { index, value });
            }
        }

        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(ProbabilityError::BadSum { sum });
        }

        Ok(Self { labels, values })
    }

    /// Class labels in model output order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Probabilities in model output order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a validated distribution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Probability of a class by label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.values[i])
    }

    /// Index and probability of the most likely class.
    ///
    /// Ties resolve to the lowest index.
    #[must_use]
    pub fn argmax(&self) -> Option<(usize, f64)> {
        self.values
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
    }

    /// Iterate over `(label, probability)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}
