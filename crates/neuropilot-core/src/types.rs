//! Core data types for the BCI flight-control pipeline
//!
//! All timestamps are microseconds on the session clock (`timestamp_us`),
//! which must increase monotonically for frames coming from acquisition.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Microseconds per millisecond
pub const US_PER_MS: u64 = 1_000;

/// Microseconds per second
pub const US_PER_SEC: u64 = 1_000_000;

/// Convert milliseconds to microseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub const fn ms_to_us(ms: u64) -> u64 {
    ms.saturating_mul(US_PER_MS)
}

// ============================================================================
// Sample Frames
// ============================================================================

/// One timestamped multi-channel reading from the acquisition device.
///
/// Frames are immutable once produced. Padding/inactive channels are still
/// carried here; the feature extractor decides which channels it uses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Timestamp in microseconds since session start
    pub timestamp_us: u64,
    /// Device sequence number (wraps)
    pub sequence: u32,
    /// Per-channel readings in µV
    pub channels: Vec<f64>,
}

impl SampleFrame {
    /// Create a new frame.
    #[must_use]
    pub fn new(timestamp_us: u64, sequence: u32, channels: Vec<f64>) -> Self {
        Self { timestamp_us, sequence, channels }
    }

    /// Number of channels in this frame.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Get a single channel reading.
    #[inline]
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<f64> {
        self.channels.get(index).copied()
    }

    /// Check the frame against the session's channel count and the last
    /// accepted timestamp.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the channel count differs, the timestamp
    /// does not advance, or any reading is not finite.
    pub fn validate(&self, expected_channels: usize, previous_us: Option<u64>) -> Result<(), FrameError> {
        if self.channels.len() != expected_channels {
            return Err(FrameError::ChannelMismatch {
                expected: expected_channels,
                got: self.channels.len(),
            });
        }

        if let Some(previous_us) = previous_us {
            if self.timestamp_us <= previous_us {
                return Err(FrameError::NonMonotonic {
                    previous_us,
                    got_us: self.timestamp_us,
                });
            }
        }

        if let Some(channel) = self.channels.iter().position(|v| !v.is_finite()) {
            return Err(FrameError::NonFinite { channel });
        }

        Ok(())
    }
}

// ============================================================================
// Actuator State
// ============================================================================

/// Flight state of the actuator, owned by the command mapper.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorState {
    /// On the ground, motors idle
    #[default]
    Grounded,
    /// Takeoff sent, waiting for completion
    TakingOff,
    /// Airborne and accepting motion commands
    Flying,
    /// Land sent, waiting for completion
    Landing,
}

impl ActuatorState {
    /// All states in declaration order.
    pub const ALL: [Self; 4] = [Self::Grounded, Self::TakingOff, Self::Flying, Self::Landing];

    /// Get the state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Grounded => "grounded",
            Self::TakingOff => "taking_off",
            Self::Flying => "flying",
            Self::Landing => "landing",
        }
    }

    /// Whether a takeoff or landing is in progress.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::TakingOff | Self::Landing)
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Flight Commands
// ============================================================================

/// Command identifiers understood by the actuator dispatcher.
///
/// `ToggleFlight` is an intent-level command only; the mapper resolves it to
/// `Takeoff` or `Land` before emission.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightCommand {
    /// Takeoff when grounded, land when flying
    ToggleFlight,
    /// Take off
    Takeoff,
    /// Land
    Land,
    /// Stop motors immediately
    Emergency,
    /// Rotate counter-clockwise
    RotateLeft,
    /// Rotate clockwise
    RotateRight,
    /// Move forward
    Forward,
    /// Move backward
    Back,
    /// Strafe left
    Left,
    /// Strafe right
    Right,
    /// Ascend
    Up,
    /// Descend
    Down,
    /// Continuous counter-clockwise yaw, `magnitude` in percent of full rate
    YawLeft,
    /// Continuous clockwise yaw, `magnitude` in percent of full rate
    YawRight,
    /// Zero all continuous velocities
    Hover,
}

impl FlightCommand {
    /// All commands in declaration order.
    pub const ALL: [Self; 15] = [
        Self::ToggleFlight,
        Self::Takeoff,
        Self::Land,
        Self::Emergency,
        Self::RotateLeft,
        Self::RotateRight,
        Self::Forward,
        Self::Back,
        Self::Left,
        Self::Right,
        Self::Up,
        Self::Down,
        Self::YawLeft,
        Self::YawRight,
        Self::Hover,
    ];

    /// Get the command identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ToggleFlight => "toggle_flight",
            Self::Takeoff => "takeoff",
            Self::Land => "land",
            Self::Emergency => "emergency",
            Self::RotateLeft => "rotate_left",
            Self::RotateRight => "rotate_right",
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
            Self::YawLeft => "yaw_left",
            Self::YawRight => "yaw_right",
            Self::Hover => "hover",
        }
    }

    /// Rotations and translations; legal only while flying.
    #[must_use]
    pub const fn is_motion(self) -> bool {
        matches!(
            self,
            Self::RotateLeft
                | Self::RotateRight
                | Self::Forward
                | Self::Back
                | Self::Left
                | Self::Right
                | Self::Up
                | Self::Down
                | Self::YawLeft
                | Self::YawRight
                | Self::Hover
        )
    }

    /// States in which the command may be issued by default.
    #[must_use]
    pub fn default_legal_states(self) -> &'static [ActuatorState] {
        match self {
            Self::Emergency => &ActuatorState::ALL,
            Self::ToggleFlight => &[ActuatorState::Grounded, ActuatorState::Flying],
            Self::Takeoff => &[ActuatorState::Grounded],
            Self::Land => &[ActuatorState::Flying],
            _ => &[ActuatorState::Flying],
        }
    }
}

impl fmt::Display for FlightCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Models and Triggers
// ============================================================================

/// Which of the two ensemble models produced a distribution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSlot {
    /// Coarse motor-imagery model (e.g. rest / left fist / right fist / both)
    Coarse,
    /// Fine-grained model (e.g. 8 kinesis classes including push)
    Fine,
}

impl ModelSlot {
    /// Both slots in evaluation order.
    pub const ALL: [Self; 2] = [Self::Coarse, Self::Fine];

    /// Array index of this slot.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Coarse => 0,
            Self::Fine => 1,
        }
    }

    /// Get the slot name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Coarse => "coarse",
            Self::Fine => "fine",
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an intent was triggered.
///
/// Declaration order is arbitration precedence: instant beats spike beats
/// sustained.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Threshold crossing gated by release and cooldown
    Instant,
    /// Statistically anomalous instantaneous reading
    Spike,
    /// Confidence held above threshold for a required duration
    Sustained,
}

impl TriggerKind {
    /// Get the trigger name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Spike => "spike",
            Self::Sustained => "sustained",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Intents and Outgoing Commands
// ============================================================================

/// A decided user intent, produced at most once per cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Model that produced the winning class
    pub slot: ModelSlot,
    /// Winning class label
    pub label: String,
    /// Trigger that fired
    pub kind: TriggerKind,
    /// Smoothed (or raw, for spikes) probability of the class
    pub confidence: f64,
    /// Sustained progress in [0, 1]; 1.0 for instant and spike triggers
    pub progress: f64,
    /// Class is configured as an emergency stop
    pub emergency: bool,
    /// Cycle timestamp
    pub timestamp_us: u64,
}

/// A command handed to the external actuator dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingCommand {
    /// Resolved command (never `ToggleFlight`)
    pub command: FlightCommand,
    /// Optional magnitude (degrees for rotations, cm for translations,
    /// percent of full rate for continuous yaw)
    pub magnitude: Option<u32>,
    /// Class label that produced the command
    pub source_label: String,
    /// Trigger kind that produced the command, `None` for watchdog/operator
    pub trigger: Option<TriggerKind>,
    /// Emission timestamp
    pub issued_at_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_frame_validation() {
        let frame = SampleFrame::new(1000, 0, vec![1.0, 2.0, 3.0]);
        assert!(frame.validate(3, None).is_ok());
        assert!(frame.validate(3, Some(999)).is_ok());

        assert_eq!(
            frame.validate(4, None),
            Err(FrameError::ChannelMismatch { expected: 4, got: 3 })
        );
        assert_eq!(
            frame.validate(3, Some(1000)),
            Err(FrameError::NonMonotonic { previous_us: 1000, got_us: 1000 })
        );

        let bad = SampleFrame::new(2000, 1, vec![1.0, f64::NAN, 3.0]);
        assert_eq!(bad.validate(3, None), Err(FrameError::NonFinite { channel: 1 }));
    }

    #[test]
    fn test_default_legality() {
        for cmd in FlightCommand::ALL {
            if cmd.is_motion() {
                assert_eq!(cmd.default_legal_states(), &[ActuatorState::Flying]);
            }
        }
        assert_eq!(FlightCommand::Emergency.default_legal_states().len(), 4);
        assert!(!FlightCommand::ToggleFlight
            .default_legal_states()
            .contains(&ActuatorState::TakingOff));
    }

    #[test]
    fn test_ms_to_us_saturates() {
        assert_eq!(ms_to_us(1_500), 1_500_000);
        assert_eq!(ms_to_us(u64::MAX), u64::MAX);
        assert_eq!(ms_to_us(u64::MAX / 1_000 + 1), u64::MAX);
    }

    #[test]
    fn test_trigger_precedence() {
        assert!(TriggerKind::Instant < TriggerKind::Spike);
        assert!(TriggerKind::Spike < TriggerKind::Sustained);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ActuatorState::TakingOff).unwrap();
        assert_eq!(json, "\"taking_off\"");
        let cmd: FlightCommand = serde_json::from_str("\"rotate_left\"").unwrap();
        assert_eq!(cmd, FlightCommand::RotateLeft);
    }
}
