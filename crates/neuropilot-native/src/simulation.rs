//! Synthetic EEG source for demos and tests
//!
//! Each channel mixes a 10 Hz mu rhythm, a 20 Hz beta rhythm and
//! deterministic noise, with a per-channel phase offset. Output is
//! reproducible for a given seed.

use std::f64::consts::PI;

use neuropilot_core::types::US_PER_SEC;
use neuropilot_core::SampleFrame;

/// Deterministic multi-channel signal generator
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    channels: usize,
    sample_rate_hz: f64,
    sequence: u32,
    rng: u64,
    mu_amplitude: f64,
}

impl SyntheticSource {
    /// Create a source at `sample_rate_hz` with the given noise seed
    #[must_use]
    pub fn new(channels: usize, sample_rate_hz: f64, seed: u64) -> Self {
        Self {
            channels,
            sample_rate_hz,
            sequence: 0,
            rng: seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1),
            mu_amplitude: 10.0,
        }
    }

    /// Scale the mu rhythm, e.g. to mimic desynchronisation during imagery
    pub fn set_mu_amplitude(&mut self, amplitude: f64) {
        self.mu_amplitude = amplitude;
    }

    /// Timestamp of the frame [`Self::next_frame`] will return
    #[must_use]
    pub fn next_timestamp_us(&self) -> u64 {
        (f64::from(self.sequence) * US_PER_SEC as f64 / self.sample_rate_hz).round() as u64
    }

    /// Produce the next frame
    pub fn next_frame(&mut self) -> SampleFrame {
        let timestamp_us = self.next_timestamp_us();
        let t = f64::from(self.sequence) / self.sample_rate_hz;

        let channels = (0..self.channels)
            .map(|ch| {
                let phase = ch as f64 * 0.5;
                self.mu_amplitude * (2.0 * PI * 10.0 * t + phase).sin()
                    + 5.0 * (2.0 * PI * 20.0 * t + phase * 2.0).sin()
                    + 2.0 * self.noise()
            })
            .collect();

        let frame = SampleFrame::new(timestamp_us, self.sequence, channels);
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }

    /// Uniform noise in [-1, 1) from a 64-bit LCG
    fn noise(&mut self) -> f64 {
        self.rng = self
            .rng
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.rng >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}
