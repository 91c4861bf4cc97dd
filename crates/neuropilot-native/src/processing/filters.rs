//! Digital filters for EEG conditioning
//!
//! Provides causal floating-point IIR filters built from second-order
//! sections. Higher-order Butterworth responses are realised as cascades,
//! which stay numerically stable at low cutoff/sample-rate ratios where a
//! single direct-form polynomial would not.

use std::f64::consts::PI;

use crate::error::{ConditionerError, ConditionerResult};

/// Maximum supported Butterworth order per band edge
pub const MAX_FILTER_ORDER: usize = 8;

/// IIR section coefficients (second-order, or first-order with zero tails)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Second-order lowpass with quality factor `q` (bilinear, prewarped)
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Second-order highpass with quality factor `q` (bilinear, prewarped)
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [norm, -2.0 * norm, norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// First-order lowpass
    #[must_use]
    pub fn first_order_lowpass(sample_rate: f64, cutoff: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let norm = 1.0 / (1.0 + k);

        Self {
            b: [k * norm, k * norm, 0.0],
            a: [1.0, (k - 1.0) * norm, 0.0],
        }
    }

    /// First-order highpass
    #[must_use]
    pub fn first_order_highpass(sample_rate: f64, cutoff: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let norm = 1.0 / (1.0 + k);

        Self {
            b: [norm, -norm, 0.0],
            a: [1.0, (k - 1.0) * norm, 0.0],
        }
    }

    /// Magnitude response at `freq` Hz
    #[must_use]
    pub fn gain_at(&self, sample_rate: f64, freq: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());

        // H(e^jw) = (b0 + b1 e^-jw + b2 e^-2jw) / (1 + a1 e^-jw + a2 e^-2jw)
        let num_re = self.b[0] + self.b[1] * c1 + self.b[2] * c2;
        let num_im = -self.b[1] * s1 - self.b[2] * s2;
        let den_re = self.a[0] + self.a[1] * c1 + self.a[2] * c2;
        let den_im = -self.a[1] * s1 - self.a[2] * s2;

        (num_re.hypot(num_im)) / (den_re.hypot(den_im))
    }
}

/// Quality factors of the second-order sections of an order-`n` Butterworth
/// prototype. Odd orders add one first-order section, not listed here.
fn butterworth_q(order: usize) -> Vec<f64> {
    let n = order as f64;
    (0..order / 2)
        .map(|k| 1.0 / (2.0 * (PI * (2.0 * k as f64 + 1.0) / (2.0 * n)).sin()))
        .collect()
}

/// Single IIR section, transposed direct form II
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    /// State: [s1, s2]
    state: [f64; 2],
}

impl Biquad {
    /// Create a new section with given coefficients
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    /// Section coefficients
    #[must_use]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];

        self.state[0] = b[1] * input - a[1] * output + self.state[1];
        self.state[1] = b[2] * input - a[2] * output;

        output
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Butterworth bandpass as a highpass cascade followed by a lowpass cascade.
///
/// `order` applies to each band edge, so the overall filter has order
/// `2 × order`, matching the usual bandpass design convention.
#[derive(Clone, Debug)]
pub struct BandpassFilter {
    sections: Vec<Biquad>,
}

impl BandpassFilter {
    /// Design a bandpass filter for `[low_cutoff, high_cutoff]` Hz.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionerError::InvalidFilter`] unless
    /// `0 < low < high < sample_rate / 2` and `1 <= order <= MAX_FILTER_ORDER`.
    pub fn new(sample_rate: f64, low_cutoff: f64, high_cutoff: f64, order: usize) -> ConditionerResult<Self> {
        let nyquist = sample_rate / 2.0;
        if !(sample_rate > 0.0 && low_cutoff > 0.0 && low_cutoff < high_cutoff && high_cutoff < nyquist) {
            return Err(ConditionerError::InvalidFilter {
                reason: format!(
                    "cutoffs must satisfy 0 < {low_cutoff} < {high_cutoff} < {nyquist} Hz"
                ),
            });
        }
        if order == 0 || order > MAX_FILTER_ORDER {
            return Err(ConditionerError::InvalidFilter {
                reason: format!("order {order} outside 1..={MAX_FILTER_ORDER}"),
            });
        }

        let qs = butterworth_q(order);
        let mut sections = Vec::with_capacity(order + 1);

        for &q in &qs {
            sections.push(Biquad::new(BiquadCoeffs::highpass(sample_rate, low_cutoff, q)));
        }
        if order % 2 == 1 {
            sections.push(Biquad::new(BiquadCoeffs::first_order_highpass(sample_rate, low_cutoff)));
        }
        for &q in &qs {
            sections.push(Biquad::new(BiquadCoeffs::lowpass(sample_rate, high_cutoff, q)));
        }
        if order % 2 == 1 {
            sections.push(Biquad::new(BiquadCoeffs::first_order_lowpass(sample_rate, high_cutoff)));
        }

        Ok(Self { sections })
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections.iter_mut().fold(input, |x, s| s.filter(x))
    }

    /// Magnitude response at `freq` Hz
    #[must_use]
    pub fn gain_at(&self, sample_rate: f64, freq: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.coeffs().gain_at(sample_rate, freq))
            .product()
    }

    /// Number of cascaded sections
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        for s in &mut self.sections {
            s.reset();
        }
    }
}

/// Multi-channel bandpass bank with independent per-channel state
#[derive(Clone, Debug)]
pub struct FilterBank {
    filters: Vec<BandpassFilter>,
}

impl FilterBank {
    /// Create a filter bank with one identical bandpass per channel.
    ///
    /// # Errors
    ///
    /// Propagates filter design errors from [`BandpassFilter::new`].
    pub fn new(
        channels: usize,
        sample_rate: f64,
        low_cutoff: f64,
        high_cutoff: f64,
        order: usize,
    ) -> ConditionerResult<Self> {
        let prototype = BandpassFilter::new(sample_rate, low_cutoff, high_cutoff, order)?;
        Ok(Self { filters: vec![prototype; channels] })
    }

    /// Number of channels
    #[must_use]
    pub fn channels(&self) -> usize {
        self.filters.len()
    }

    /// Filter one frame into `out`. Both slices must have `channels()` entries.
    pub fn filter_into(&mut self, input: &[f64], out: &mut [f64]) {
        for ((filter, &x), y) in self.filters.iter_mut().zip(input).zip(out.iter_mut()) {
            *y = filter.filter(x);
        }
    }

    /// Reset all filters
    pub fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }
}
