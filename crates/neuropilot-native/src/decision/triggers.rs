//! Per-class trigger state machines
//!
//! Every configured class owns exactly one [`ClassTrigger`]. A trigger is
//! observed once per cycle in which its model voted, may put forward a
//! [`Candidate`], and only mutates its firing bookkeeping when the
//! arbitration picks it ([`ClassTrigger::commit`]).

use std::collections::VecDeque;

use neuropilot_core::types::ms_to_us;
use neuropilot_core::TriggerKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::history::ClassStatistics;
use crate::error::{ConfigError, ConfigResult};
use crate::telemetry::TriggerSnapshot;

// ============================================================================
// Configuration
// ============================================================================

fn default_min_magnitude() -> f64 {
    0.1
}

fn default_min_std() -> f64 {
    0.01
}

fn default_min_history() -> usize {
    10
}

fn default_refractory_ms() -> u64 {
    500
}

/// Trigger configuration for one class
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerRule {
    /// Smoothed confidence held above `threshold` for `required_duration_ms`
    Sustained {
        /// Smoothed probability threshold
        threshold: f64,
        /// Required accumulated duration (ms)
        required_duration_ms: u64,
    },
    /// Smoothed confidence crossing `threshold`, gated by release and cooldown
    Instant {
        /// Smoothed probability threshold
        threshold: f64,
        /// Falling below this re-arms the trigger (defaults to `threshold`)
        #[serde(default)]
        release_threshold: Option<f64>,
        /// Re-fire allowed without release after this long (ms)
        cooldown_ms: u64,
    },
    /// Raw probability above `mean + k·std` of the history
    Spike {
        /// Standard deviations above the mean
        k: f64,
        /// Minimum raw probability
        #[serde(default = "default_min_magnitude")]
        min_magnitude: f64,
        /// Minimum history standard deviation
        #[serde(default = "default_min_std")]
        min_std: f64,
        /// Minimum history entries before spikes are considered
        #[serde(default = "default_min_history")]
        min_history: usize,
        /// Minimum interval between spike firings (ms)
        #[serde(default = "default_refractory_ms")]
        refractory_ms: u64,
    },
}

impl TriggerRule {
    /// Trigger kind produced by this rule
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Sustained { .. } => TriggerKind::Sustained,
            Self::Instant { .. } => TriggerKind::Instant,
            Self::Spike { .. } => TriggerKind::Spike,
        }
    }

    /// Check thresholds and durations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] for out-of-range values.
    pub fn validate(&self) -> ConfigResult<()> {
        let probability = |parameter: &'static str, v: f64| {
            if v.is_finite() && v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter { parameter, reason: format!("{v} not in (0, 1]") })
            }
        };

        match *self {
            Self::Sustained { threshold, required_duration_ms } => {
                probability("sustained.threshold", threshold)?;
                if required_duration_ms == 0 {
                    return Err(ConfigError::InvalidParameter {
                        parameter: "sustained.required_duration_ms",
                        reason: "must be positive".into(),
                    });
                }
            }
            Self::Instant { threshold, release_threshold, .. } => {
                probability("instant.threshold", threshold)?;
                if let Some(release) = release_threshold {
                    probability("instant.release_threshold", release)?;
                    if release > threshold {
                        return Err(ConfigError::InvalidParameter {
                            parameter: "instant.release_threshold",
                            reason: format!("{release} above threshold {threshold}"),
                        });
                    }
                }
            }
            Self::Spike { k, min_magnitude, min_std, .. } => {
                if !(k.is_finite() && k > 0.0) {
                    return Err(ConfigError::InvalidParameter {
                        parameter: "spike.k",
                        reason: format!("{k} must be positive"),
                    });
                }
                probability("spike.min_magnitude", min_magnitude)?;
                if !(min_std.is_finite() && min_std >= 0.0) {
                    return Err(ConfigError::InvalidParameter {
                        parameter: "spike.min_std",
                        reason: format!("{min_std} must be non-negative"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Engine-wide settings shared by all sustained triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SustainedSettings {
    /// Nominal decision cycle period
    pub cycle_period_us: u64,
    /// Consecutive misses tolerated before accumulation resets
    pub jitter_tolerance_cycles: usize,
    /// Hits required among the recent observations
    pub min_consistent_predictions: usize,
    /// Observations kept for the consistency check
    pub consistency_window: usize,
}

// ============================================================================
// Per-cycle data
// ============================================================================

/// What a trigger sees for its class in one cycle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    /// Cycle timestamp
    pub now_us: u64,
    /// This cycle's raw probability
    pub raw: f64,
    /// Smoothed probability including this cycle
    pub smoothed: f64,
    /// History statistics before this cycle's value was appended
    pub prior: ClassStatistics,
}

/// A trigger that qualified this cycle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Trigger kind
    pub kind: TriggerKind,
    /// Smoothed probability, raw for spikes
    pub confidence: f64,
    /// Sustained progress, 1.0 otherwise
    pub progress: f64,
}

// ============================================================================
// Sustained
// ============================================================================

/// Accumulation phase of a sustained trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SustainedPhase {
    /// No qualifying cycles since the last reset
    Idle,
    /// Qualifying cycles are adding up
    Accumulating {
        /// Time credited so far
        accumulated_us: u64,
    },
    /// Fired; stays quiet until the next reset
    Latched,
}

/// Sustained tracker state
#[derive(Clone, Debug)]
pub struct SustainedTracker {
    /// Current phase
    pub phase: SustainedPhase,
    /// Timestamp of the last qualifying cycle
    pub last_hit_us: Option<u64>,
    /// Non-qualifying cycles in a row
    pub consecutive_misses: usize,
    /// Recent hit/miss observations, newest last
    pub recent: VecDeque<bool>,
}

impl SustainedTracker {
    fn new(window: usize) -> Self {
        Self {
            phase: SustainedPhase::Idle,
            last_hit_us: None,
            consecutive_misses: 0,
            recent: VecDeque::with_capacity(window),
        }
    }

    fn hits(&self) -> usize {
        self.recent.iter().filter(|&&h| h).count()
    }

    fn reset(&mut self) {
        self.phase = SustainedPhase::Idle;
        self.last_hit_us = None;
        self.consecutive_misses = 0;
        self.recent.clear();
    }
}

/// Fires once confidence has been held long enough
#[derive(Clone, Debug)]
pub struct SustainedTrigger {
    threshold: f64,
    required_us: u64,
    settings: SustainedSettings,
    tracker: SustainedTracker,
}

impl SustainedTrigger {
    /// Create an idle trigger
    #[must_use]
    pub fn new(threshold: f64, required_us: u64, settings: SustainedSettings) -> Self {
        Self {
            threshold,
            required_us,
            settings,
            tracker: SustainedTracker::new(settings.consistency_window),
        }
    }

    /// Tracker state
    #[must_use]
    pub fn tracker(&self) -> &SustainedTracker {
        &self.tracker
    }

    /// `accumulated / required`, clamped to `[0, 1]`
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.tracker.phase {
            SustainedPhase::Idle => 0.0,
            SustainedPhase::Accumulating { accumulated_us } => {
                (accumulated_us as f64 / self.required_us as f64).min(1.0)
            }
            SustainedPhase::Latched => 1.0,
        }
    }

    fn observe(&mut self, obs: &Observation) -> Option<Candidate> {
        let hit = obs.smoothed >= self.threshold;
        let period = self.settings.cycle_period_us;
        let t = &mut self.tracker;

        if t.recent.len() == self.settings.consistency_window {
            t.recent.pop_front();
        }
        t.recent.push_back(hit);

        if hit {
            t.consecutive_misses = 0;
            t.phase = match t.phase {
                SustainedPhase::Idle => SustainedPhase::Accumulating { accumulated_us: period },
                SustainedPhase::Accumulating { accumulated_us } => {
                    let credit = t
                        .last_hit_us
                        .map_or(period, |last| obs.now_us.saturating_sub(last).min(period));
                    SustainedPhase::Accumulating { accumulated_us: accumulated_us + credit }
                }
                SustainedPhase::Latched => SustainedPhase::Latched,
            };
            t.last_hit_us = Some(obs.now_us);
        } else {
            t.consecutive_misses += 1;
            if t.consecutive_misses > self.settings.jitter_tolerance_cycles {
                if t.phase != SustainedPhase::Idle {
                    debug!(misses = t.consecutive_misses, "Sustained tracker reset");
                }
                t.reset();
            }
        }

        let SustainedPhase::Accumulating { accumulated_us } = self.tracker.phase else {
            return None;
        };
        let fires = hit
            && accumulated_us >= self.required_us
            && self.tracker.hits() >= self.settings.min_consistent_predictions;

        fires.then(|| Candidate {
            kind: TriggerKind::Sustained,
            confidence: obs.smoothed,
            progress: self.progress(),
        })
    }
}

// ============================================================================
// Instant
// ============================================================================

/// Instant tracker state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstantTracker {
    /// Dropped below the release threshold since the last firing
    pub was_released: bool,
    /// Re-fire without release allowed from here on
    pub cooldown_until_us: u64,
}

impl Default for InstantTracker {
    fn default() -> Self {
        Self { was_released: true, cooldown_until_us: 0 }
    }
}

/// Fires on a threshold crossing, gated by release or cooldown
#[derive(Clone, Debug)]
pub struct InstantTrigger {
    threshold: f64,
    release_threshold: f64,
    cooldown_us: u64,
    tracker: InstantTracker,
}

impl InstantTrigger {
    /// Create an armed trigger
    #[must_use]
    pub fn new(threshold: f64, release_threshold: f64, cooldown_us: u64) -> Self {
        Self {
            threshold,
            release_threshold,
            cooldown_us,
            tracker: InstantTracker::default(),
        }
    }

    /// Tracker state
    #[must_use]
    pub fn tracker(&self) -> &InstantTracker {
        &self.tracker
    }

    /// Time left before re-fire is allowed without a release
    #[must_use]
    pub fn cooldown_remaining_us(&self, now_us: u64) -> u64 {
        self.tracker.cooldown_until_us.saturating_sub(now_us)
    }

    fn observe(&mut self, obs: &Observation) -> Option<Candidate> {
        if obs.smoothed < self.release_threshold {
            self.tracker.was_released = true;
        }

        let armed = self.tracker.was_released || obs.now_us >= self.tracker.cooldown_until_us;
        (obs.smoothed >= self.threshold && armed).then_some(Candidate {
            kind: TriggerKind::Instant,
            confidence: obs.smoothed,
            progress: 1.0,
        })
    }

    fn arm_cooldown(&mut self, now_us: u64) {
        self.tracker.was_released = false;
        self.tracker.cooldown_until_us = now_us.saturating_add(self.cooldown_us);
    }
}

// ============================================================================
// Spike
// ============================================================================

/// Spike tracker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpikeTracker {
    /// Last firing (or emergency preemption)
    pub last_fired_us: Option<u64>,
    /// Spike condition held on the last observed cycle
    pub active: bool,
}

/// Fires on a statistically anomalous raw reading
#[derive(Clone, Debug)]
pub struct SpikeTrigger {
    k: f64,
    min_magnitude: f64,
    min_std: f64,
    min_history: usize,
    refractory_us: u64,
    tracker: SpikeTracker,
}

impl SpikeTrigger {
    /// Create a trigger
    #[must_use]
    pub fn new(k: f64, min_magnitude: f64, min_std: f64, min_history: usize, refractory_us: u64) -> Self {
        Self {
            k,
            min_magnitude,
            min_std,
            min_history,
            refractory_us,
            tracker: SpikeTracker::default(),
        }
    }

    /// Tracker state
    #[must_use]
    pub fn tracker(&self) -> &SpikeTracker {
        &self.tracker
    }

    /// Time left in the refractory interval
    #[must_use]
    pub fn refractory_remaining_us(&self, now_us: u64) -> u64 {
        self.tracker
            .last_fired_us
            .map_or(0, |last| last.saturating_add(self.refractory_us).saturating_sub(now_us))
    }

    pub(super) fn observe(&mut self, obs: &Observation) -> Option<Candidate> {
        let prior = obs.prior;
        let spiking = prior.samples >= self.min_history
            && prior.std > self.min_std
            && obs.raw > self.min_magnitude
            && obs.raw > prior.mean + self.k * prior.std;
        self.tracker.active = spiking;

        (spiking && self.refractory_remaining_us(obs.now_us) == 0).then_some(Candidate {
            kind: TriggerKind::Spike,
            confidence: obs.raw,
            progress: 1.0,
        })
    }

    /// Start the refractory interval at `now_us`
    pub(super) fn record_fire(&mut self, now_us: u64) {
        self.tracker.last_fired_us = Some(now_us);
    }

    pub(super) fn reset(&mut self) {
        self.tracker = SpikeTracker::default();
    }
}

// ============================================================================
// Tagged trigger
// ============================================================================

/// One class's trigger with its explicit tracker state
#[derive(Clone, Debug)]
pub enum ClassTrigger {
    /// Duration-based
    Sustained(SustainedTrigger),
    /// Threshold crossing with release/cooldown
    Instant(InstantTrigger),
    /// Statistical anomaly
    Spike(SpikeTrigger),
}

impl ClassTrigger {
    /// Build a fresh trigger from its rule
    #[must_use]
    pub fn from_rule(rule: &TriggerRule, settings: SustainedSettings) -> Self {
        match *rule {
            TriggerRule::Sustained { threshold, required_duration_ms } => {
                Self::Sustained(SustainedTrigger::new(threshold, ms_to_us(required_duration_ms), settings))
            }
            TriggerRule::Instant { threshold, release_threshold, cooldown_ms } => Self::Instant(
                InstantTrigger::new(threshold, release_threshold.unwrap_or(threshold), ms_to_us(cooldown_ms)),
            ),
            TriggerRule::Spike { k, min_magnitude, min_std, min_history, refractory_ms } => Self::Spike(
                SpikeTrigger::new(k, min_magnitude, min_std, min_history, ms_to_us(refractory_ms)),
            ),
        }
    }

    /// Trigger kind
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Sustained(_) => TriggerKind::Sustained,
            Self::Instant(_) => TriggerKind::Instant,
            Self::Spike(_) => TriggerKind::Spike,
        }
    }

    /// Update per-cycle bookkeeping and report whether the class qualifies.
    pub fn observe(&mut self, obs: &Observation) -> Option<Candidate> {
        match self {
            Self::Sustained(t) => t.observe(obs),
            Self::Instant(t) => t.observe(obs),
            Self::Spike(t) => t.observe(obs),
        }
    }

    /// Record a firing after winning arbitration
    pub fn commit(&mut self, now_us: u64) {
        match self {
            Self::Sustained(t) => t.tracker.phase = SustainedPhase::Latched,
            Self::Instant(t) => t.arm_cooldown(now_us),
            Self::Spike(t) => t.record_fire(now_us),
        }
    }

    /// Emergency preemption: drop progress and require fresh evidence
    pub fn preempt(&mut self, now_us: u64) {
        match self {
            Self::Sustained(t) => t.tracker.reset(),
            Self::Instant(t) => t.arm_cooldown(now_us),
            Self::Spike(t) => t.record_fire(now_us),
        }
    }

    /// Restore the initial state
    pub fn reset(&mut self) {
        match self {
            Self::Sustained(t) => t.tracker.reset(),
            Self::Instant(t) => t.tracker = InstantTracker::default(),
            Self::Spike(t) => t.reset(),
        }
    }

    /// Telemetry view of the tracker
    #[must_use]
    pub fn snapshot(&self, now_us: u64) -> TriggerSnapshot {
        match self {
            Self::Sustained(t) => TriggerSnapshot::Sustained {
                progress: t.progress(),
                consistent: t.tracker.hits(),
                accumulated_ms: match t.tracker.phase {
                    SustainedPhase::Idle => 0,
                    SustainedPhase::Accumulating { accumulated_us } => accumulated_us / 1_000,
                    SustainedPhase::Latched => t.required_us / 1_000,
                },
                latched: t.tracker.phase == SustainedPhase::Latched,
            },
            Self::Instant(t) => TriggerSnapshot::Instant {
                was_released: t.tracker.was_released,
                cooldown_remaining_ms: t.cooldown_remaining_us(now_us) / 1_000,
            },
            Self::Spike(t) => TriggerSnapshot::Spike {
                active: t.tracker.active,
                refractory_remaining_ms: t.refractory_remaining_us(now_us) / 1_000,
            },
        }
    }
}
