//! Temporal decision engine
//!
//! Turns per-cycle class probabilities from both models into at most one
//! [`Intent`]. All per-class state is kept in index-addressed vectors per
//! model; labels are resolved to indices once, at construction.

use neuropilot_core::{ClassProbabilities, Intent, ModelSlot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::arbitration::{arbitrate, ArbitrationCandidate};
use super::history::{ArgmaxTrail, ClassHistory, ClassStatistics};
use super::triggers::{ClassTrigger, Observation, SustainedSettings, TriggerRule};
use crate::error::{ConfigError, ConfigResult};
use crate::ml::EnsembleOutput;
use crate::telemetry::{ClassSnapshot, EngineSnapshot, ModelSnapshot};

/// Trigger configuration for one class
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Model producing the class
    pub model: ModelSlot,
    /// Class label as produced by the model
    pub label: String,
    /// Tie-break priority, higher wins
    #[serde(default)]
    pub priority: u8,
    /// Bypasses tier order and preempts all other bookkeeping
    #[serde(default)]
    pub emergency: bool,
    /// Trigger kind and parameters
    pub trigger: TriggerRule,
}

/// Decision engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Raw probabilities kept per class
    pub history_size: usize,
    /// Cycles averaged for the smoothed value
    pub smoothing_window: usize,
    /// Recent observations considered by sustained triggers
    pub consistency_window: usize,
    /// Qualifying observations required in the consistency window
    pub min_consistent_predictions: usize,
    /// Consecutive misses tolerated before a sustained trigger resets
    pub jitter_tolerance_cycles: usize,
    /// `k` used for the telemetry spike flag on every class
    pub telemetry_spike_k: f64,
    /// Configured classes, in declaration order
    pub rules: Vec<ClassRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            smoothing_window: 5,
            consistency_window: 5,
            min_consistent_predictions: 3,
            jitter_tolerance_cycles: 1,
            telemetry_spike_k: 1.5,
            rules: vec![
                ClassRule {
                    model: ModelSlot::Coarse,
                    label: "Left_Fist".into(),
                    priority: 40,
                    emergency: false,
                    trigger: TriggerRule::Sustained { threshold: 0.7, required_duration_ms: 1_500 },
                },
                ClassRule {
                    model: ModelSlot::Coarse,
                    label: "Right_Fist".into(),
                    priority: 40,
                    emergency: false,
                    trigger: TriggerRule::Sustained { threshold: 0.7, required_duration_ms: 1_500 },
                },
                ClassRule {
                    model: ModelSlot::Fine,
                    label: "Push".into(),
                    priority: 80,
                    emergency: false,
                    trigger: TriggerRule::Instant {
                        threshold: 0.75,
                        release_threshold: None,
                        cooldown_ms: 3_000,
                    },
                },
            ],
        }
    }
}

impl EngineConfig {
    /// Check window sizes and every rule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] for the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |parameter: &'static str, reason: &str| {
            Err(ConfigError::InvalidParameter { parameter, reason: reason.to_string() })
        };

        if self.history_size == 0 {
            return invalid("engine.history_size", "must be at least 1");
        }
        if self.smoothing_window == 0 || self.smoothing_window > self.history_size {
            return invalid("engine.smoothing_window", "must be in 1..=history_size");
        }
        if self.consistency_window == 0 {
            return invalid("engine.consistency_window", "must be at least 1");
        }
        if self.min_consistent_predictions > self.consistency_window {
            return invalid("engine.min_consistent_predictions", "exceeds consistency_window");
        }
        if !(self.telemetry_spike_k.is_finite() && self.telemetry_spike_k > 0.0) {
            return invalid("engine.telemetry_spike_k", "must be positive");
        }
        for rule in &self.rules {
            rule.trigger.validate()?;
        }
        Ok(())
    }
}

/// A class with a configured trigger
#[derive(Clone, Debug)]
struct ArmedClass {
    trigger: ClassTrigger,
    priority: u8,
    emergency: bool,
    order: usize,
}

#[derive(Clone, Debug)]
struct ClassState {
    history: ClassHistory,
    spike: bool,
    armed: Option<ArmedClass>,
}

#[derive(Clone, Debug)]
struct ModelState {
    slot: ModelSlot,
    labels: Vec<String>,
    classes: Vec<ClassState>,
    trail: ArgmaxTrail,
    voted: bool,
    last_error: Option<String>,
    argmax: Option<usize>,
}

/// Per-cycle smoothing, trigger detection and arbitration
#[derive(Clone, Debug)]
pub struct TemporalDecisionEngine {
    models: [ModelState; 2],
    telemetry_spike_k: f64,
    last_update_us: Option<u64>,
}

impl TemporalDecisionEngine {
    /// Resolve rules against the models' labels.
    ///
    /// `labels` is indexed by [`ModelSlot::index`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLabel`] if a rule names a class the
    /// model does not produce, [`ConfigError::DuplicateRule`] if two rules
    /// target the same class, or a validation error from the config.
    pub fn new(config: &EngineConfig, cycle_period_us: u64, labels: [&[String]; 2]) -> ConfigResult<Self> {
        config.validate()?;

        let settings = SustainedSettings {
            cycle_period_us,
            jitter_tolerance_cycles: config.jitter_tolerance_cycles,
            min_consistent_predictions: config.min_consistent_predictions,
            consistency_window: config.consistency_window,
        };

        let mut models = ModelSlot::ALL.map(|slot| ModelState {
            slot,
            labels: labels[slot.index()].to_vec(),
            classes: labels[slot.index()]
                .iter()
                .map(|_| ClassState {
                    history: ClassHistory::new(config.history_size, config.smoothing_window),
                    spike: false,
                    armed: None,
                })
                .collect(),
            trail: ArgmaxTrail::default(),
            voted: false,
            last_error: None,
            argmax: None,
        });

        for (order, rule) in config.rules.iter().enumerate() {
            let model = &mut models[rule.model.index()];
            let index = model
                .labels
                .iter()
                .position(|l| *l == rule.label)
                .ok_or_else(|| ConfigError::UnknownLabel { slot: rule.model, label: rule.label.clone() })?;

            let class = &mut model.classes[index];
            if class.armed.is_some() {
                return Err(ConfigError::DuplicateRule { slot: rule.model, label: rule.label.clone() });
            }
            class.armed = Some(ArmedClass {
                trigger: ClassTrigger::from_rule(&rule.trigger, settings),
                priority: rule.priority,
                emergency: rule.emergency,
                order,
            });
        }

        Ok(Self {
            models,
            telemetry_spike_k: config.telemetry_spike_k,
            last_update_us: None,
        })
    }

    /// Process one cycle and return the winning intent, if any.
    ///
    /// A model without a valid distribution this cycle is skipped entirely:
    /// no history is appended and no trigger sees a miss.
    pub fn update(&mut self, now_us: u64, output: &EnsembleOutput) -> Option<Intent> {
        let mut candidates = Vec::new();

        for slot in ModelSlot::ALL {
            match output.get(slot) {
                Some(probs) => self.observe_model(slot, now_us, probs, &mut candidates),
                None => {
                    let model = &mut self.models[slot.index()];
                    model.voted = false;
                    model.last_error = output.error(slot).map(ToString::to_string);
                    for class in &mut model.classes {
                        class.spike = false;
                    }
                }
            }
        }
        self.last_update_us = Some(now_us);

        let winner = arbitrate(&candidates)?.clone();
        if candidates.len() > 1 {
            debug!(candidates = candidates.len(), "Arbitrated competing triggers");
        }

        let model = &mut self.models[winner.slot.index()];
        let label = model.labels[winner.class].clone();
        if let Some(armed) = model.classes[winner.class].armed.as_mut() {
            armed.trigger.commit(now_us);
        }

        if winner.emergency {
            self.preempt(now_us, Some((winner.slot, winner.class)));
            debug!("Emergency preempted trigger bookkeeping");
        }

        info!(
            slot = %winner.slot,
            label = %label,
            kind = %winner.kind,
            confidence = winner.confidence,
            emergency = winner.emergency,
            "Intent decided"
        );

        Some(Intent {
            slot: winner.slot,
            label,
            kind: winner.kind,
            confidence: winner.confidence,
            progress: winner.progress,
            emergency: winner.emergency,
            timestamp_us: now_us,
        })
    }

    fn observe_model(
        &mut self,
        slot: ModelSlot,
        now_us: u64,
        probs: &ClassProbabilities,
        candidates: &mut Vec<ArbitrationCandidate>,
    ) {
        let k = self.telemetry_spike_k;
        let model = &mut self.models[slot.index()];

        if probs.labels() != model.labels.as_slice() {
            warn!(slot = %slot, "Distribution labels differ from model labels; ignoring vote");
            model.voted = false;
            model.last_error = Some("label mismatch".into());
            return;
        }

        model.voted = true;
        model.last_error = None;
        model.argmax = probs.argmax().map(|(i, _)| i);
        if let Some(i) = model.argmax {
            model.trail.push(i);
        }

        for (index, (class, &raw)) in model.classes.iter_mut().zip(probs.values()).enumerate() {
            let prior = class.history.stats();
            class.history.push(raw);
            let smoothed = class.history.smoothed().unwrap_or(raw);
            class.spike = prior.samples > 1 && prior.std > 0.0 && raw > prior.mean + k * prior.std;

            let Some(armed) = class.armed.as_mut() else {
                continue;
            };
            let obs = Observation { now_us, raw, smoothed, prior };
            if let Some(c) = armed.trigger.observe(&obs) {
                candidates.push(ArbitrationCandidate {
                    slot,
                    class: index,
                    kind: c.kind,
                    confidence: c.confidence,
                    progress: c.progress,
                    priority: armed.priority,
                    emergency: armed.emergency,
                    order: armed.order,
                });
            }
        }

        if model.trail.is_jittering() {
            debug!(slot = %slot, changes = model.trail.changes(), "Predictions jittering");
        }
    }

    /// Operator emergency stop: every trigger drops its progress and
    /// instant triggers restart their cooldown at `now_us`
    pub fn preempt_all(&mut self, now_us: u64) {
        self.preempt(now_us, None);
        info!("Emergency stop preempted all triggers");
    }

    fn preempt(&mut self, now_us: u64, except: Option<(ModelSlot, usize)>) {
        for model in &mut self.models {
            for (index, state) in model.classes.iter_mut().enumerate() {
                if except == Some((model.slot, index)) {
                    continue;
                }
                if let Some(armed) = state.armed.as_mut() {
                    armed.trigger.preempt(now_us);
                }
            }
        }
    }

    /// Smoothed probability of a class
    #[must_use]
    pub fn smoothed(&self, slot: ModelSlot, label: &str) -> Option<f64> {
        let model = &self.models[slot.index()];
        let i = model.labels.iter().position(|l| l == label)?;
        model.classes[i].history.smoothed()
    }

    /// History statistics of a class
    #[must_use]
    pub fn statistics(&self, slot: ModelSlot, label: &str) -> Option<ClassStatistics> {
        let model = &self.models[slot.index()];
        let i = model.labels.iter().position(|l| l == label)?;
        Some(model.classes[i].history.stats())
    }

    /// Whether a model's argmax is flipping between classes
    #[must_use]
    pub fn is_jittering(&self, slot: ModelSlot) -> bool {
        self.models[slot.index()].trail.is_jittering()
    }

    /// Telemetry view of both models
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let now_us = self.last_update_us.unwrap_or_default();
        let models = self
            .models
            .iter()
            .map(|m| ModelSnapshot {
                slot: m.slot,
                voted: m.voted,
                error: m.last_error.clone(),
                argmax: m.argmax.map(|i| m.labels[i].clone()),
                jittering: m.trail.is_jittering(),
                classes: m
                    .labels
                    .iter()
                    .zip(&m.classes)
                    .map(|(label, c)| ClassSnapshot {
                        label: label.clone(),
                        raw: c.history.last(),
                        smoothed: c.history.smoothed(),
                        stats: c.history.stats(),
                        spike: c.spike,
                        trigger: c.armed.as_ref().map(|a| a.trigger.snapshot(now_us)),
                    })
                    .collect(),
            })
            .collect();
        EngineSnapshot { models }
    }

    /// Clear every history and tracker (explicit restart only)
    pub fn reset(&mut self) {
        for model in &mut self.models {
            model.trail.clear();
            model.voted = false;
            model.last_error = None;
            model.argmax = None;
            for class in &mut model.classes {
                class.history.clear();
                class.spike = false;
                if let Some(armed) = class.armed.as_mut() {
                    armed.trigger.reset();
                }
            }
        }
        self.last_update_us = None;
        info!("Decision engine reset");
    }
}
