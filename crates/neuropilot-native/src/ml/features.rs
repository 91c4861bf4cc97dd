//! Spatial covariance features for ML models
//!
//! Each decision cycle the extractor takes the most recent conditioned
//! window, computes the sample covariance across the active channels and
//! lays it out the way the classifiers expect.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, FeatureResult};
use crate::processing::WindowSnapshot;

/// Floor applied to variances before taking the log
pub const LOG_VARIANCE_FLOOR: f64 = 1e-12;

/// How the covariance matrix is flattened into a feature vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// Full matrix, row-major (`n²` values)
    #[default]
    Full,
    /// Upper triangle including the diagonal, row-major (`n(n+1)/2` values)
    UpperTriangle,
    /// Natural log of each channel variance (`n` values)
    LogVariance,
}

impl FeatureLayout {
    /// Output length for `channels` active channels
    #[must_use]
    pub const fn feature_len(self, channels: usize) -> usize {
        match self {
            Self::Full => channels * channels,
            Self::UpperTriangle => channels * (channels + 1) / 2,
            Self::LogVariance => channels,
        }
    }
}

/// Feature layout configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Covariance flattening
    pub layout: FeatureLayout,
}

/// Feature vector for one decision cycle
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    /// Flattened features
    pub values: Vec<f64>,
    /// Timestamp of the newest sample in the window
    pub timestamp_us: u64,
}

impl FeatureVector {
    /// Number of features
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Covariance feature extractor
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    channels: usize,
    active_channels: Vec<usize>,
    window_samples: usize,
    layout: FeatureLayout,
}

impl FeatureExtractor {
    /// Create an extractor over `active_channels` of `channels`-wide frames.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::NoActiveChannels`] or
    /// [`FeatureError::ChannelOutOfRange`] for a bad channel selection.
    pub fn new(
        channels: usize,
        active_channels: Vec<usize>,
        window_samples: usize,
        layout: FeatureLayout,
    ) -> FeatureResult<Self> {
        if active_channels.is_empty() {
            return Err(FeatureError::NoActiveChannels);
        }
        if let Some(&channel) = active_channels.iter().find(|&&ch| ch >= channels) {
            return Err(FeatureError::ChannelOutOfRange { channel, channels });
        }

        Ok(Self { channels, active_channels, window_samples, layout })
    }

    /// Length of every vector this extractor produces
    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.layout.feature_len(self.active_channels.len())
    }

    /// Frames required per window
    #[must_use]
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Configured layout
    #[must_use]
    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    /// Whether a snapshot holds a full window
    #[must_use]
    pub fn ready(&self, snapshot: &WindowSnapshot) -> bool {
        snapshot.len() >= self.window_samples
    }

    /// Compute features from the newest full window of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::WarmingUp`] until a full window has been
    /// buffered, and [`FeatureError::ChannelMismatch`] if the snapshot is
    /// not as wide as configured.
    pub fn extract(&self, snapshot: &WindowSnapshot) -> FeatureResult<FeatureVector> {
        if snapshot.channels() != self.channels {
            return Err(FeatureError::ChannelMismatch {
                expected: self.channels,
                got: snapshot.channels(),
            });
        }
        if !self.ready(snapshot) {
            return Err(FeatureError::WarmingUp {
                have: snapshot.len(),
                need: self.window_samples,
            });
        }

        let skip = snapshot.len() - self.window_samples;
        let cov = self.covariance(snapshot, skip);
        let values = self.flatten(&cov);

        Ok(FeatureVector {
            values,
            timestamp_us: snapshot.end_timestamp().unwrap_or_default(),
        })
    }

    /// Features of a fixed well-conditioned covariance (unit variances,
    /// 0.1 off-diagonal), used to exercise models at startup.
    #[must_use]
    pub fn reference_features(&self) -> FeatureVector {
        let c = self.active_channels.len();
        let cov = DMatrix::from_fn(c, c, |i, j| if i == j { 1.0 } else { 0.1 });
        FeatureVector { values: self.flatten(&cov), timestamp_us: 0 }
    }

    /// Sample covariance (`n − 1` denominator) over the active channels
    fn covariance(&self, snapshot: &WindowSnapshot, skip: usize) -> DMatrix<f64> {
        let n = self.window_samples;
        let c = self.active_channels.len();

        let mut means = vec![0.0; c];
        for row in skip..skip + n {
            let frame = snapshot.row(row);
            for (m, &ch) in means.iter_mut().zip(&self.active_channels) {
                *m += frame[ch];
            }
        }
        for m in &mut means {
            *m /= n as f64;
        }

        let centered = DMatrix::from_fn(n, c, |r, k| {
            snapshot.row(skip + r)[self.active_channels[k]] - means[k]
        });

        (centered.transpose() * &centered) / (n as f64 - 1.0)
    }

    fn flatten(&self, cov: &DMatrix<f64>) -> Vec<f64> {
        let c = cov.nrows();
        match self.layout {
            FeatureLayout::Full => (0..c).flat_map(|i| (0..c).map(move |j| cov[(i, j)])).collect(),
            FeatureLayout::UpperTriangle => {
                (0..c).flat_map(|i| (i..c).map(move |j| cov[(i, j)])).collect()
            }
            FeatureLayout::LogVariance => (0..c)
                .map(|i| cov[(i, i)].max(LOG_VARIANCE_FLOOR).ln())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two channels: ch0 = ±1 alternating, ch1 = 2 × ch0, ch2 = constant
    fn snapshot(frames: usize) -> WindowSnapshot {
        let mut samples = Vec::new();
        let mut timestamps = Vec::new();
        for i in 0..frames {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            samples.extend_from_slice(&[x, 2.0 * x, 5.0]);
            timestamps.push(i as u64 * 1_000);
        }
        WindowSnapshot::from_rows(3, timestamps, samples)
    }

    #[test]
    fn test_warming_up_never_partial() {
        let ex = FeatureExtractor::new(3, vec![0, 1], 8, FeatureLayout::Full).unwrap();
        for frames in 0..8 {
            assert_eq!(
                ex.extract(&snapshot(frames)),
                Err(FeatureError::WarmingUp { have: frames, need: 8 })
            );
        }
        assert!(ex.extract(&snapshot(8)).is_ok());
    }

    #[test]
    fn test_full_covariance() {
        let ex = FeatureExtractor::new(3, vec![0, 1], 4, FeatureLayout::Full).unwrap();
        let fv = ex.extract(&snapshot(4)).unwrap();

        // var(ch0) = 4/3, cov = 8/3, var(ch1) = 16/3
        let expected = [4.0 / 3.0, 8.0 / 3.0, 8.0 / 3.0, 16.0 / 3.0];
        assert_eq!(fv.len(), ex.feature_len());
        for (got, want) in fv.values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} != {want}");
        }
        assert_eq!(fv.timestamp_us, 3_000);
    }

    #[test]
    fn test_upper_triangle_and_log_variance() {
        let upper = FeatureExtractor::new(3, vec![0, 1, 2], 4, FeatureLayout::UpperTriangle).unwrap();
        let fv = upper.extract(&snapshot(4)).unwrap();
        assert_eq!(fv.len(), 6);
        assert!((fv.values[0] - 4.0 / 3.0).abs() < 1e-12);
        // Constant channel has zero covariance with everything
        assert_eq!(fv.values[5], 0.0);

        let logvar = FeatureExtractor::new(3, vec![0, 2], 4, FeatureLayout::LogVariance).unwrap();
        let fv = logvar.extract(&snapshot(4)).unwrap();
        assert!((fv.values[0] - (4.0_f64 / 3.0).ln()).abs() < 1e-12);
        assert!((fv.values[1] - LOG_VARIANCE_FLOOR.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_uses_most_recent_window() {
        let ex = FeatureExtractor::new(3, vec![2], 4, FeatureLayout::Full).unwrap();
        let mut samples = vec![100.0, 0.0, 0.0, -100.0, 0.0, 0.0];
        let mut timestamps = vec![0, 1];
        for i in 0..4 {
            samples.extend_from_slice(&[0.0, 0.0, f64::from(i % 2)]);
            timestamps.push(2 + i as u64);
        }
        let fv = ex.extract(&WindowSnapshot::from_rows(3, timestamps, samples)).unwrap();
        assert!((fv.values[0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_bad_channel_selection() {
        assert_eq!(
            FeatureExtractor::new(4, vec![], 8, FeatureLayout::Full).unwrap_err(),
            FeatureError::NoActiveChannels
        );
        assert_eq!(
            FeatureExtractor::new(4, vec![1, 4], 8, FeatureLayout::Full).unwrap_err(),
            FeatureError::ChannelOutOfRange { channel: 4, channels: 4 }
        );

        let ex = FeatureExtractor::new(2, vec![0], 4, FeatureLayout::Full).unwrap();
        assert_eq!(
            ex.extract(&snapshot(4)),
            Err(FeatureError::ChannelMismatch { expected: 2, got: 3 })
        );
    }

    #[test]
    fn test_feature_len() {
        assert_eq!(FeatureLayout::Full.feature_len(8), 64);
        assert_eq!(FeatureLayout::UpperTriangle.feature_len(8), 36);
        assert_eq!(FeatureLayout::LogVariance.feature_len(8), 8);
    }
}
