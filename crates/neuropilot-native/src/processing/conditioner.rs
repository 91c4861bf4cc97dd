//! Signal conditioning: per-channel bandpass filtering into a ring buffer
//!
//! The conditioner is the only writer of the [`ConditionedBuffer`].
//! Ingestion runs at the device sample rate, independent of the decision
//! cycle; decision cycles read a [`WindowSnapshot`] copy.

use neuropilot_core::types::ms_to_us;
use neuropilot_core::SampleFrame;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::buffer::{ConditionedBuffer, WindowSnapshot};
use super::filters::{FilterBank, MAX_FILTER_ORDER};
use crate::error::{ConditionerResult, ConfigError, ConfigResult};

/// Acquisition and filtering configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Channels per frame, including padding channels
    pub channels: usize,
    /// Device sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Channel indices used for feature extraction
    pub active_channels: Vec<usize>,
    /// Bandpass low cutoff (Hz)
    pub low_cutoff_hz: f64,
    /// Bandpass high cutoff (Hz)
    pub high_cutoff_hz: f64,
    /// Butterworth order per band edge
    pub filter_order: usize,
    /// Conditioned history kept in the ring buffer (seconds)
    pub buffer_secs: f64,
    /// Feature window (seconds)
    pub window_secs: f64,
    /// No frame for this long marks the data stale (ms)
    pub stale_after_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            sample_rate_hz: 256.0,
            active_channels: (0..8).collect(),
            low_cutoff_hz: 7.0,
            high_cutoff_hz: 30.0,
            filter_order: 5,
            buffer_secs: 8.0,
            window_secs: 2.5,
            stale_after_ms: 500,
        }
    }
}

impl SignalConfig {
    /// Ring buffer capacity in frames
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        (self.buffer_secs * self.sample_rate_hz).round() as usize
    }

    /// Feature window length in frames
    #[must_use]
    pub fn window_samples(&self) -> usize {
        (self.window_secs * self.sample_rate_hz).round() as usize
    }

    /// Check ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |parameter: &'static str, reason: String| {
            Err(ConfigError::InvalidParameter { parameter, reason })
        };

        if self.channels == 0 {
            return invalid("signal.channels", "must be at least 1".into());
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return invalid("signal.sample_rate_hz", format!("{} is not a positive rate", self.sample_rate_hz));
        }
        if self.active_channels.is_empty() {
            return invalid("signal.active_channels", "at least one channel required".into());
        }
        if let Some(&ch) = self.active_channels.iter().find(|&&ch| ch >= self.channels) {
            return invalid("signal.active_channels", format!("channel {ch} >= {}", self.channels));
        }
        let nyquist = self.sample_rate_hz / 2.0;
        if !(self.low_cutoff_hz > 0.0 && self.low_cutoff_hz < self.high_cutoff_hz && self.high_cutoff_hz < nyquist) {
            return invalid(
                "signal.low_cutoff_hz",
                format!("need 0 < {} < {} < {nyquist}", self.low_cutoff_hz, self.high_cutoff_hz),
            );
        }
        if self.filter_order == 0 || self.filter_order > MAX_FILTER_ORDER {
            return invalid("signal.filter_order", format!("{} outside 1..={MAX_FILTER_ORDER}", self.filter_order));
        }
        if self.window_samples() < 2 {
            return invalid("signal.window_secs", "window must span at least 2 samples".into());
        }
        if self.buffer_capacity() < self.window_samples() {
            return invalid("signal.buffer_secs", "buffer shorter than the feature window".into());
        }
        Ok(())
    }
}

/// Causal bandpass filter bank feeding the conditioned ring buffer
#[derive(Clone, Debug)]
pub struct SignalConditioner {
    filters: FilterBank,
    buffer: ConditionedBuffer,
    scratch: Vec<f64>,
    window_samples: usize,
    stale_after_us: u64,
    last_timestamp_us: Option<u64>,
    frames_accepted: u64,
    frames_rejected: u64,
}

impl SignalConditioner {
    /// Build filters and buffer from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConditionerError::InvalidFilter`] for
    /// unrealisable filter parameters.
    pub fn new(config: &SignalConfig) -> ConditionerResult<Self> {
        let filters = FilterBank::new(
            config.channels,
            config.sample_rate_hz,
            config.low_cutoff_hz,
            config.high_cutoff_hz,
            config.filter_order,
        )?;

        Ok(Self {
            filters,
            buffer: ConditionedBuffer::new(config.channels, config.buffer_capacity()),
            scratch: vec![0.0; config.channels],
            window_samples: config.window_samples(),
            stale_after_us: ms_to_us(config.stale_after_ms),
            last_timestamp_us: None,
            frames_accepted: 0,
            frames_rejected: 0,
        })
    }

    /// Filter a frame and append it to the buffer.
    ///
    /// Rejected frames leave filter state and buffer untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConditionerError::Frame`] for a wrong channel
    /// count, a non-advancing timestamp or a non-finite reading.
    pub fn ingest(&mut self, frame: &SampleFrame) -> ConditionerResult<()> {
        if let Err(e) = frame.validate(self.filters.channels(), self.last_timestamp_us) {
            self.frames_rejected += 1;
            debug!(timestamp_us = frame.timestamp_us, error = %e, "Frame rejected");
            return Err(e.into());
        }

        self.filters.filter_into(&frame.channels, &mut self.scratch);
        self.buffer.push(frame.timestamp_us, &self.scratch);
        self.last_timestamp_us = Some(frame.timestamp_us);
        self.frames_accepted += 1;
        Ok(())
    }

    /// Copy of the most recent feature window (shorter while warming up)
    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        self.buffer.snapshot(self.window_samples)
    }

    /// Frames needed for one full window
    #[must_use]
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Read access to the ring buffer
    #[must_use]
    pub fn buffer(&self) -> &ConditionedBuffer {
        &self.buffer
    }

    /// Whether no frame has arrived within the stale interval.
    ///
    /// A session that has never received a frame is stale.
    #[must_use]
    pub fn is_stale(&self, now_us: u64) -> bool {
        match self.last_timestamp_us {
            Some(last) => now_us.saturating_sub(last) > self.stale_after_us,
            None => true,
        }
    }

    /// Timestamp of the last accepted frame
    #[must_use]
    pub fn last_timestamp_us(&self) -> Option<u64> {
        self.last_timestamp_us
    }

    /// Accepted and rejected frame counts
    #[must_use]
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.frames_accepted, self.frames_rejected)
    }

    /// Clear filter state and buffer for an explicit restart
    pub fn reset(&mut self) {
        self.filters.reset();
        self.buffer.clear();
        self.last_timestamp_us = None;
        self.frames_accepted = 0;
        self.frames_rejected = 0;
    }
}
