//! Spike-driven continuous yaw
//!
//! Probability spikes on a left and a right class are kept as events that
//! decay and expire within a short window. The net right-minus-left spike
//! intent passes a dead zone, a power curve and an exponential moving
//! average, and becomes a yaw rate streamed to the actuator while flying.
//!
//! Discrete intents always take precedence; the pipeline only asks for a
//! yaw command in cycles where nothing else was emitted.

use std::collections::VecDeque;

use neuropilot_core::types::{ms_to_us, US_PER_SEC};
use neuropilot_core::{ClassProbabilities, FlightCommand, ModelSlot, OutgoingCommand, TriggerKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::history::ClassHistory;
use super::triggers::{Observation, SpikeTrigger};
use crate::error::{ConfigError, ConfigResult};
use crate::telemetry::ContinuousSnapshot;

/// Largest yaw rate the actuator accepts, in percent
pub const MAX_YAW_PERCENT: i32 = 100;

/// Source label of the command that stops continuous motion
pub const HOVER_LABEL: &str = "continuous";

/// Continuous yaw configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    /// Stream yaw commands while flying
    pub enabled: bool,
    /// Model whose classes steer
    pub model: ModelSlot,
    /// Class whose spikes yaw counter-clockwise
    pub left_label: String,
    /// Class whose spikes yaw clockwise
    pub right_label: String,
    /// Raw probabilities kept per steering class
    pub history_size: usize,
    /// Standard deviations above the history mean that count as a spike
    pub spike_k: f64,
    /// Minimum raw probability of a spike
    pub min_magnitude: f64,
    /// Minimum history standard deviation
    pub min_std: f64,
    /// History entries needed before spikes are detected
    pub min_history: usize,
    /// Minimum interval between spikes of one class (ms)
    pub refractory_ms: u64,
    /// Spikes older than this are dropped (ms)
    pub spike_window_ms: u64,
    /// Fraction of a spike's magnitude left after one second
    pub decay_per_sec: f64,
    /// Decayed magnitude below which a spike is dropped
    pub min_decayed_magnitude: f64,
    /// Net spike intent below this is ignored
    pub dead_zone: f64,
    /// Exponent of the response curve above the dead zone
    pub scale_exponent: f64,
    /// Weight of the previous velocity in the moving average
    pub smoothing: f64,
    /// Yaw rate at unit velocity, in percent of full rate
    pub max_yaw_speed: u32,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: ModelSlot::Coarse,
            left_label: "Left_Fist".into(),
            right_label: "Right_Fist".into(),
            history_size: 30,
            spike_k: 1.5,
            min_magnitude: 0.1,
            min_std: 0.01,
            min_history: 10,
            refractory_ms: 500,
            spike_window_ms: 2_000,
            decay_per_sec: 0.95,
            min_decayed_magnitude: 0.01,
            dead_zone: 0.1,
            scale_exponent: 1.3,
            smoothing: 0.7,
            max_yaw_speed: 45,
        }
    }
}

impl ContinuousConfig {
    /// Check ranges and label distinctness.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] for the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |parameter: &'static str, reason: &str| {
            Err(ConfigError::InvalidParameter { parameter, reason: reason.to_string() })
        };

        if self.left_label == self.right_label {
            return invalid("continuous.right_label", "must differ from left_label");
        }
        if self.history_size < 2 || self.min_history > self.history_size {
            return invalid("continuous.history_size", "must be at least 2 and cover min_history");
        }
        if !(self.spike_k.is_finite() && self.spike_k > 0.0) {
            return invalid("continuous.spike_k", "must be positive");
        }
        if self.spike_window_ms == 0 {
            return invalid("continuous.spike_window_ms", "must be positive");
        }
        if !(self.decay_per_sec > 0.0 && self.decay_per_sec <= 1.0) {
            return invalid("continuous.decay_per_sec", "must be in (0, 1]");
        }
        if !(0.0..1.0).contains(&self.dead_zone) {
            return invalid("continuous.dead_zone", "must be in [0, 1)");
        }
        if !(self.scale_exponent.is_finite() && self.scale_exponent > 0.0) {
            return invalid("continuous.scale_exponent", "must be positive");
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return invalid("continuous.smoothing", "must be in [0, 1)");
        }
        if self.max_yaw_speed == 0 || self.max_yaw_speed > MAX_YAW_PERCENT.unsigned_abs() {
            return invalid("continuous.max_yaw_speed", "must be in 1..=100");
        }
        Ok(())
    }
}

/// Which way a steering class yaws
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YawSide {
    /// Counter-clockwise
    Left,
    /// Clockwise
    Right,
}

impl YawSide {
    /// Both sides, indexed by [`Self::index`]
    pub const ALL: [Self; 2] = [Self::Left, Self::Right];

    /// Array index of this side
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

/// A detected probability spike
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpikeEvent {
    /// Detection time
    pub timestamp_us: u64,
    /// Raw probability minus the history mean at detection
    pub magnitude: f64,
}

impl SpikeEvent {
    /// Magnitude left at `now_us`, losing `1 - decay_per_sec` per second
    #[must_use]
    pub fn decayed(&self, now_us: u64, decay_per_sec: f64) -> f64 {
        let age_secs = now_us.saturating_sub(self.timestamp_us) as f64 / US_PER_SEC as f64;
        self.magnitude * decay_per_sec.powf(age_secs)
    }
}

#[derive(Clone, Debug)]
struct SideState {
    label: String,
    index: usize,
    history: ClassHistory,
    detector: SpikeTrigger,
    spikes: VecDeque<SpikeEvent>,
}

/// Spike events to a smoothed yaw rate
#[derive(Clone, Debug)]
pub struct ContinuousController {
    slot: ModelSlot,
    sides: [SideState; 2],
    window_us: u64,
    decay_per_sec: f64,
    min_decayed_magnitude: f64,
    dead_zone: f64,
    scale_exponent: f64,
    smoothing: f64,
    max_yaw_speed: f64,
    velocity: f64,
    last_sent: i32,
}

impl ContinuousController {
    /// Resolve the steering classes against the model's labels.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLabel`] if the model does not produce
    /// a steering class, or a validation error from the config.
    pub fn new(config: &ContinuousConfig, labels: &[String]) -> ConfigResult<Self> {
        config.validate()?;

        let side = |label: &str| -> ConfigResult<SideState> {
            let index = labels.iter().position(|l| l == label).ok_or_else(|| ConfigError::UnknownLabel {
                slot: config.model,
                label: label.to_string(),
            })?;
            Ok(SideState {
                label: label.to_string(),
                index,
                history: ClassHistory::new(config.history_size, 1),
                detector: SpikeTrigger::new(
                    config.spike_k,
                    config.min_magnitude,
                    config.min_std,
                    config.min_history,
                    ms_to_us(config.refractory_ms),
                ),
                spikes: VecDeque::new(),
            })
        };

        Ok(Self {
            slot: config.model,
            sides: [side(&config.left_label)?, side(&config.right_label)?],
            window_us: ms_to_us(config.spike_window_ms),
            decay_per_sec: config.decay_per_sec,
            min_decayed_magnitude: config.min_decayed_magnitude,
            dead_zone: config.dead_zone,
            scale_exponent: config.scale_exponent,
            smoothing: config.smoothing,
            max_yaw_speed: f64::from(config.max_yaw_speed),
            velocity: 0.0,
            last_sent: 0,
        })
    }

    /// Model whose distribution steers
    #[must_use]
    pub fn slot(&self) -> ModelSlot {
        self.slot
    }

    /// Append this cycle's probabilities and record any new spikes.
    pub fn observe(&mut self, now_us: u64, probs: &ClassProbabilities) {
        for side in YawSide::ALL {
            let state = &mut self.sides[side.index()];
            let Some(&raw) = probs.values().get(state.index) else {
                continue;
            };

            let prior = state.history.stats();
            state.history.push(raw);
            let obs = Observation { now_us, raw, smoothed: raw, prior };
            if state.detector.observe(&obs).is_some() {
                state.detector.record_fire(now_us);
                let event = SpikeEvent { timestamp_us: now_us, magnitude: raw - prior.mean };
                debug!(label = %state.label, magnitude = event.magnitude, "Steering spike");
                state.spikes.push_back(event);
            }
        }
    }

    /// Record a spike detected elsewhere
    pub fn push_spike(&mut self, side: YawSide, event: SpikeEvent) {
        self.sides[side.index()].spikes.push_back(event);
    }

    /// Sum of live, decayed spike magnitudes on one side
    #[must_use]
    pub fn intensity(&self, side: YawSide, now_us: u64) -> f64 {
        self.sides[side.index()]
            .spikes
            .iter()
            .map(|e| e.decayed(now_us, self.decay_per_sec))
            .sum()
    }

    /// Drop expired spikes and advance the smoothed velocity.
    ///
    /// Returns the new velocity; positive is clockwise.
    pub fn update(&mut self, now_us: u64) -> f64 {
        let (window_us, floor, decay) = (self.window_us, self.min_decayed_magnitude, self.decay_per_sec);
        for state in &mut self.sides {
            state
                .spikes
                .retain(|e| now_us.saturating_sub(e.timestamp_us) < window_us && e.decayed(now_us, decay) > floor);
        }

        let net = self.intensity(YawSide::Right, now_us) - self.intensity(YawSide::Left, now_us);
        let target = self.shape(net);
        self.velocity = self.smoothing * self.velocity + (1.0 - self.smoothing) * target;
        self.velocity
    }

    /// Dead zone, then a power curve on the remainder
    fn shape(&self, value: f64) -> f64 {
        if value.abs() < self.dead_zone {
            return 0.0;
        }
        let scaled = (value.abs() - self.dead_zone) / (1.0 - self.dead_zone);
        value.signum() * scaled.powf(self.scale_exponent)
    }

    /// Smoothed velocity
    #[must_use]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Velocity as a yaw rate in `-100..=100` percent
    #[must_use]
    pub fn yaw_percent(&self) -> i32 {
        let limit = f64::from(MAX_YAW_PERCENT);
        (self.velocity * self.max_yaw_speed).clamp(-limit, limit) as i32
    }

    /// Command for the current yaw rate, if it differs from the last one
    /// acknowledged with [`Self::acknowledge`]
    #[must_use]
    pub fn pending_command(&self, now_us: u64) -> Option<OutgoingCommand> {
        let yaw = self.yaw_percent();
        if yaw == self.last_sent {
            return None;
        }

        let (command, magnitude, label) = match yaw {
            0 => (FlightCommand::Hover, None, HOVER_LABEL),
            y if y < 0 => (FlightCommand::YawLeft, Some(y.unsigned_abs()), self.sides[0].label.as_str()),
            y => (FlightCommand::YawRight, Some(y.unsigned_abs()), self.sides[1].label.as_str()),
        };
        Some(OutgoingCommand {
            command,
            magnitude,
            source_label: label.to_string(),
            trigger: Some(TriggerKind::Spike),
            issued_at_us: now_us,
        })
    }

    /// Mark the current yaw rate as sent
    pub fn acknowledge(&mut self) {
        self.last_sent = self.yaw_percent();
    }

    /// Forget spikes, history and velocity; the actuator is hovering
    pub fn reset(&mut self) {
        for state in &mut self.sides {
            state.history.clear();
            state.spikes.clear();
            state.detector.reset();
        }
        self.velocity = 0.0;
        self.last_sent = 0;
        info!("Continuous control reset");
    }

    /// Telemetry view at `now_us`
    #[must_use]
    pub fn snapshot(&self, now_us: u64) -> ContinuousSnapshot {
        ContinuousSnapshot {
            velocity: self.velocity,
            yaw_percent: self.yaw_percent(),
            left_intensity: self.intensity(YawSide::Left, now_us),
            right_intensity: self.intensity(YawSide::Right, now_us),
            live_spikes: self.sides.iter().map(|s| s.spikes.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ensemble::COARSE_LABELS;

    fn labels() -> Vec<String> {
        COARSE_LABELS.iter().map(|s| (*s).to_string()).collect()
    }

    /// No smoothing, no dead zone, linear response, 100% at unit velocity
    fn linear() -> ContinuousConfig {
        ContinuousConfig {
            enabled: true,
            dead_zone: 0.0,
            scale_exponent: 1.0,
            smoothing: 0.0,
            max_yaw_speed: 100,
            ..ContinuousConfig::default()
        }
    }

    fn spike(timestamp_us: u64, magnitude: f64) -> SpikeEvent {
        SpikeEvent { timestamp_us, magnitude }
    }

    fn right_fist(p: f64) -> ClassProbabilities {
        let rest = (1.0 - p) / 3.0;
        ClassProbabilities::new(labels(), vec![rest, rest, p, rest]).unwrap()
    }

    #[test]
    fn test_spikes_decay_then_expire() {
        let mut c = ContinuousController::new(&linear(), &labels()).unwrap();
        c.push_spike(YawSide::Right, spike(0, 0.5));

        assert!((c.update(0) - 0.5).abs() < 1e-12);
        assert_eq!(c.yaw_percent(), 50);

        // One second later the spike keeps 95% of its magnitude
        assert!((c.update(1_000_000) - 0.475).abs() < 1e-12);
        assert_eq!(c.yaw_percent(), 47);

        // Gone once the window has passed
        assert_eq!(c.update(2_000_000), 0.0);
        assert_eq!(c.snapshot(2_000_000).live_spikes, 0);
    }

    #[test]
    fn test_dead_zone_and_opposing_spikes() {
        let config = ContinuousConfig { dead_zone: 0.1, ..linear() };
        let mut c = ContinuousController::new(&config, &labels()).unwrap();

        c.push_spike(YawSide::Left, spike(0, 0.08));
        assert_eq!(c.update(0), 0.0);
        assert!(c.pending_command(0).is_none());

        // Balanced left and right cancel out
        c.push_spike(YawSide::Right, spike(0, 0.4));
        c.push_spike(YawSide::Left, spike(0, 0.32));
        assert_eq!(c.update(0), 0.0);

        // Above the dead zone the remainder is rescaled to [0, 1]
        c.push_spike(YawSide::Left, spike(0, 0.55));
        // Net -0.55 leaves 0.45 of the 0.9 range above the dead zone
        let v = c.update(0);
        assert!((v + 0.5).abs() < 1e-9);
        let out = c.pending_command(0).unwrap();
        assert_eq!(out.command, FlightCommand::YawLeft);
        assert_eq!(out.source_label, "Left_Fist");
    }

    #[test]
    fn test_yaw_is_clamped() {
        let mut c = ContinuousController::new(&ContinuousConfig { scale_exponent: 1.3, ..linear() }, &labels())
            .unwrap();
        c.push_spike(YawSide::Right, spike(0, 3.0));
        assert!(c.update(0) > 1.0);
        assert_eq!(c.yaw_percent(), 100);

        let mut c = ContinuousController::new(&linear(), &labels()).unwrap();
        c.push_spike(YawSide::Left, spike(0, 2.5));
        c.update(0);
        assert_eq!(c.yaw_percent(), -100);
        assert_eq!(c.pending_command(0).unwrap().magnitude, Some(100));
    }

    #[test]
    fn test_smoothing_and_hover_once() {
        let config = ContinuousConfig { smoothing: 0.5, ..linear() };
        let mut c = ContinuousController::new(&config, &labels()).unwrap();
        c.push_spike(YawSide::Right, spike(0, 0.8));

        assert!((c.update(0) - 0.4).abs() < 1e-12);
        let out = c.pending_command(0).unwrap();
        assert_eq!(out.command, FlightCommand::YawRight);
        assert_eq!(out.magnitude, Some(40));
        c.acknowledge();
        assert!(c.pending_command(0).is_none());

        // After expiry the average falls towards zero and a hover goes out once
        let mut t = 2_000_000;
        while c.yaw_percent() != 0 {
            c.update(t);
            t += 500_000;
        }
        assert_eq!(c.pending_command(t).unwrap().command, FlightCommand::Hover);
        c.acknowledge();
        assert!(c.pending_command(t).is_none());
    }

    #[test]
    fn test_observe_detects_spike_with_refractory() {
        let mut c = ContinuousController::new(&linear(), &labels()).unwrap();
        let mut t = 0;
        for p in [0.10, 0.14, 0.10, 0.14, 0.10, 0.14, 0.10, 0.14, 0.10, 0.14] {
            c.observe(t, &right_fist(p));
            t += 100_000;
        }
        assert_eq!(c.intensity(YawSide::Right, t), 0.0);

        c.observe(t, &right_fist(0.9));
        assert!((c.intensity(YawSide::Right, t) - 0.78).abs() < 1e-9);

        // Inside the refractory interval a second spike is ignored
        c.observe(t + 100_000, &right_fist(0.95));
        assert_eq!(c.snapshot(t + 100_000).live_spikes, 1);
    }

    #[test]
    fn test_reset_and_validation() {
        let mut c = ContinuousController::new(&linear(), &labels()).unwrap();
        c.push_spike(YawSide::Right, spike(0, 0.6));
        c.update(0);
        c.reset();
        assert_eq!(c.velocity(), 0.0);
        assert_eq!(c.update(0), 0.0);
        assert!(c.pending_command(0).is_none());

        let bad = ContinuousConfig { right_label: "Left_Fist".into(), ..ContinuousConfig::default() };
        assert!(bad.validate().is_err());
        let bad = ContinuousConfig { max_yaw_speed: 150, ..ContinuousConfig::default() };
        assert!(bad.validate().is_err());

        let unknown = ContinuousConfig { left_label: "Jump".into(), ..ContinuousConfig::default() };
        assert!(matches!(
            ContinuousController::new(&unknown, &labels()),
            Err(ConfigError::UnknownLabel { slot: ModelSlot::Coarse, .. })
        ));
    }
}
