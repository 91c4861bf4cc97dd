//! Command mapper: intents to flight commands
//!
//! Single owner of the [`ActuatorState`] and the [`CooldownRegistry`].
//! Each intent is either emitted as one [`OutgoingCommand`] or dropped with
//! an observable reason; nothing is queued or retried.
//!
//! Evaluation order for a non-emergency intent:
//! binding, enabled, cooldown, legality, toggle resolution, emission.

use std::collections::{HashMap, HashSet, VecDeque};

use neuropilot_core::types::US_PER_SEC;
use neuropilot_core::{ActuatorState, FlightCommand, Intent, OutgoingCommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cooldown::{CooldownRegistry, CooldownTable};
use crate::error::{ConfigError, ConfigResult};

/// Outcomes kept for inspection
pub const OUTCOME_HISTORY_LEN: usize = 100;

fn default_enabled() -> bool {
    true
}

/// Class label to command binding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandBinding {
    /// Class label
    pub label: String,
    /// Intent-level command
    pub command: FlightCommand,
    /// Disabled bindings drop their intents
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Degrees for rotations, cm for translations
    #[serde(default)]
    pub magnitude: Option<u32>,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl CommandBinding {
    fn new(label: &str, command: FlightCommand, enabled: bool, magnitude: Option<u32>, description: &str) -> Self {
        Self {
            label: label.into(),
            command,
            enabled,
            magnitude,
            description: description.into(),
        }
    }
}

/// Command mapper configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Label bindings
    pub bindings: Vec<CommandBinding>,
    /// Cooldown durations
    pub cooldowns: CooldownTable,
    /// Replaces the default legal states of the listed commands
    pub legality: HashMap<FlightCommand, Vec<ActuatorState>>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            bindings: vec![
                CommandBinding::new("Left_Fist", FlightCommand::RotateLeft, true, Some(45), "Rotate counter-clockwise 45 degrees"),
                CommandBinding::new("Right_Fist", FlightCommand::RotateRight, true, Some(45), "Rotate clockwise 45 degrees"),
                CommandBinding::new("Push", FlightCommand::ToggleFlight, true, None, "Takeoff if grounded, land if flying"),
                CommandBinding::new("Tongue", FlightCommand::Forward, false, Some(50), "Move forward 50cm"),
                CommandBinding::new("Left_Foot", FlightCommand::Emergency, false, None, "Emergency stop"),
            ],
            cooldowns: CooldownTable::default(),
            legality: HashMap::new(),
        }
    }
}

impl MapperConfig {
    /// Check bindings for duplicates and emergency legality.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] for a duplicate label or a
    /// legality override that tries to restrict emergency.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for binding in &self.bindings {
            if !seen.insert(binding.label.as_str()) {
                return Err(ConfigError::InvalidParameter {
                    parameter: "mapper.bindings",
                    reason: format!("label {:?} bound twice", binding.label),
                });
            }
        }
        if self.legality.contains_key(&FlightCommand::Emergency) {
            return Err(ConfigError::InvalidParameter {
                parameter: "mapper.legality",
                reason: "emergency is legal in every state".into(),
            });
        }
        Ok(())
    }
}

/// Flight-time limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Maximum continuous flight time (seconds)
    pub max_flight_secs: u64,
    /// Land automatically when the limit is exceeded
    pub auto_land: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { max_flight_secs: 600, auto_land: true }
    }
}

/// Why an intent produced no command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// No binding for the label
    Unmapped,
    /// Binding exists but is disabled
    Disabled,
    /// Command still cooling down
    CooldownActive {
        /// Time left (ms)
        remaining_ms: u64,
    },
    /// Command not legal in the current state
    IllegalInState {
        /// State at the time of the drop
        state: ActuatorState,
    },
}

/// Result of the last mapper decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Command handed to the dispatcher
    Emitted(OutgoingCommand),
    /// Intent dropped
    Dropped {
        /// Source class label
        label: String,
        /// Bound command, if any
        command: Option<FlightCommand>,
        /// Reason
        #[serde(flatten)]
        reason: DropReason,
        /// Decision time
        at_us: u64,
    },
}

/// State machine from intents to flight commands
#[derive(Clone, Debug)]
pub struct CommandMapper {
    bindings: HashMap<String, CommandBinding>,
    cooldowns: CooldownTable,
    legality: HashMap<FlightCommand, Vec<ActuatorState>>,
    safety: SafetyConfig,
    registry: CooldownRegistry,
    state: ActuatorState,
    flight_started_us: Option<u64>,
    last_outcome: Option<CommandOutcome>,
    history: VecDeque<CommandOutcome>,
}

impl CommandMapper {
    /// Create a grounded mapper.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the mapper configuration is invalid.
    pub fn new(config: &MapperConfig, safety: &SafetyConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            bindings: config
                .bindings
                .iter()
                .map(|b| (b.label.clone(), b.clone()))
                .collect(),
            cooldowns: config.cooldowns.clone(),
            legality: config.legality.clone(),
            safety: safety.clone(),
            registry: CooldownRegistry::default(),
            state: ActuatorState::Grounded,
            flight_started_us: None,
            last_outcome: None,
            history: VecDeque::with_capacity(OUTCOME_HISTORY_LEN),
        })
    }

    /// Current actuator state
    #[must_use]
    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Last emitted or dropped decision
    #[must_use]
    pub fn last_outcome(&self) -> Option<&CommandOutcome> {
        self.last_outcome.as_ref()
    }

    /// Recent decisions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.history.iter()
    }

    /// Time airborne, while flying
    #[must_use]
    pub fn flight_time_us(&self, now_us: u64) -> Option<u64> {
        match self.state {
            ActuatorState::Flying => self.flight_started_us.map(|t| now_us.saturating_sub(t)),
            _ => None,
        }
    }

    /// Whether `command` may be issued in `state`
    #[must_use]
    pub fn is_legal(&self, command: FlightCommand, state: ActuatorState) -> bool {
        match self.legality.get(&command) {
            Some(states) => states.contains(&state),
            None => command.default_legal_states().contains(&state),
        }
    }

    /// Map an intent to at most one command.
    pub fn apply(&mut self, intent: &Intent, now_us: u64) -> Option<OutgoingCommand> {
        let binding = self.bindings.get(&intent.label);
        let bound_emergency = binding.is_some_and(|b| b.enabled && b.command == FlightCommand::Emergency);

        if intent.emergency || bound_emergency {
            return Some(self.emergency(&intent.label, Some(intent), now_us));
        }

        let Some(binding) = binding else {
            return self.drop_intent(&intent.label, None, DropReason::Unmapped, now_us);
        };
        let (command, magnitude) = (binding.command, binding.magnitude);

        if !binding.enabled {
            return self.drop_intent(&intent.label, Some(command), DropReason::Disabled, now_us);
        }

        let remaining_us = self.registry.remaining_us(command, now_us);
        if remaining_us > 0 {
            let reason = DropReason::CooldownActive { remaining_ms: remaining_us.div_ceil(1_000) };
            return self.drop_intent(&intent.label, Some(command), reason, now_us);
        }

        if !self.is_legal(command, self.state) {
            let reason = DropReason::IllegalInState { state: self.state };
            return self.drop_intent(&intent.label, Some(command), reason, now_us);
        }

        let resolved = match (command, self.state) {
            (FlightCommand::ToggleFlight, ActuatorState::Grounded) => FlightCommand::Takeoff,
            (FlightCommand::ToggleFlight, ActuatorState::Flying) => FlightCommand::Land,
            // Legality excludes the transitional states unless overridden
            (FlightCommand::ToggleFlight, state) => {
                let reason = DropReason::IllegalInState { state };
                return self.drop_intent(&intent.label, Some(command), reason, now_us);
            }
            (other, _) => other,
        };

        self.transition_on_emit(resolved);
        self.registry.record(command, now_us, self.cooldowns.duration_us(command));

        let out = OutgoingCommand {
            command: resolved,
            magnitude,
            source_label: intent.label.clone(),
            trigger: Some(intent.kind),
            issued_at_us: now_us,
        };
        info!(
            command = %resolved,
            label = %intent.label,
            state = %self.state,
            magnitude = ?magnitude,
            "Command emitted"
        );
        self.record(CommandOutcome::Emitted(out.clone()));
        Some(out)
    }

    /// Operator emergency stop, same path as an emergency intent
    pub fn emergency_stop(&mut self, now_us: u64) -> OutgoingCommand {
        self.emergency("operator", None, now_us)
    }

    /// Apply an actuator completion signal.
    ///
    /// Returns whether the signal matched the pending transition.
    pub fn complete(&mut self, command: FlightCommand, success: bool, now_us: u64) -> bool {
        let next = match (command, self.state) {
            (FlightCommand::Takeoff, ActuatorState::TakingOff) => {
                if success {
                    self.flight_started_us = Some(now_us);
                    ActuatorState::Flying
                } else {
                    ActuatorState::Grounded
                }
            }
            (FlightCommand::Land, ActuatorState::Landing) => {
                if success {
                    self.flight_started_us = None;
                    ActuatorState::Grounded
                } else {
                    ActuatorState::Flying
                }
            }
            (command, state) => {
                warn!(command = %command, state = %state, success, "Ignoring mismatched completion");
                return false;
            }
        };

        info!(from = %self.state, to = %next, command = %command, success, "Actuator state changed");
        self.state = next;
        true
    }

    /// Land once the flight time limit is exceeded
    pub fn check_watchdog(&mut self, now_us: u64) -> Option<OutgoingCommand> {
        if !self.safety.auto_land {
            return None;
        }
        let flown_us = self.flight_time_us(now_us)?;
        if flown_us <= self.safety.max_flight_secs * US_PER_SEC {
            return None;
        }

        warn!(flight_secs = flown_us / US_PER_SEC, "Flight time limit exceeded, landing");
        self.transition_on_emit(FlightCommand::Land);
        self.registry.record(FlightCommand::Land, now_us, self.cooldowns.duration_us(FlightCommand::Land));

        let out = OutgoingCommand {
            command: FlightCommand::Land,
            magnitude: None,
            source_label: "watchdog".into(),
            trigger: None,
            issued_at_us: now_us,
        };
        self.record(CommandOutcome::Emitted(out.clone()));
        Some(out)
    }

    fn emergency(&mut self, label: &str, intent: Option<&Intent>, now_us: u64) -> OutgoingCommand {
        let from = self.state;
        self.state = ActuatorState::Grounded;
        self.flight_started_us = None;
        self.registry
            .record(FlightCommand::Emergency, now_us, self.cooldowns.duration_us(FlightCommand::Emergency));

        warn!(from = %from, label = %label, "Emergency stop");
        let out = OutgoingCommand {
            command: FlightCommand::Emergency,
            magnitude: None,
            source_label: label.to_string(),
            trigger: intent.map(|i| i.kind),
            issued_at_us: now_us,
        };
        self.record(CommandOutcome::Emitted(out.clone()));
        out
    }

    /// Optimistic state change for transition-triggering commands
    fn transition_on_emit(&mut self, command: FlightCommand) {
        let next = match command {
            FlightCommand::Takeoff => ActuatorState::TakingOff,
            FlightCommand::Land => ActuatorState::Landing,
            _ => return,
        };
        info!(from = %self.state, to = %next, "Actuator state changed");
        self.state = next;
    }

    fn drop_intent(
        &mut self,
        label: &str,
        command: Option<FlightCommand>,
        reason: DropReason,
        now_us: u64,
    ) -> Option<OutgoingCommand> {
        debug!(label = %label, command = ?command, reason = ?reason, state = %self.state, "Intent dropped");
        self.record(CommandOutcome::Dropped {
            label: label.to_string(),
            command,
            reason,
            at_us: now_us,
        });
        None
    }

    fn record(&mut self, outcome: CommandOutcome) {
        if self.history.len() == OUTCOME_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(outcome.clone());
        self.last_outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuropilot_core::{ModelSlot, TriggerKind};

    const SEC: u64 = 1_000_000;

    fn mapper() -> CommandMapper {
        CommandMapper::new(&MapperConfig::default(), &SafetyConfig::default()).unwrap()
    }

    fn intent(label: &str, at: u64) -> Intent {
        Intent {
            slot: ModelSlot::Fine,
            label: label.into(),
            kind: TriggerKind::Instant,
            confidence: 0.9,
            progress: 1.0,
            emergency: false,
            timestamp_us: at,
        }
    }

    fn dropped_reason(m: &CommandMapper) -> Option<DropReason> {
        match m.last_outcome()? {
            CommandOutcome::Dropped { reason, .. } => Some(reason.clone()),
            CommandOutcome::Emitted(_) => None,
        }
    }

    fn fly(m: &mut CommandMapper, at: u64) {
        let out = m.apply(&intent("Push", at), at).unwrap();
        assert_eq!(out.command, FlightCommand::Takeoff);
        assert!(m.complete(FlightCommand::Takeoff, true, at + 1));
        assert_eq!(m.state(), ActuatorState::Flying);
    }

    #[test]
    fn test_rotate_while_grounded_dropped() {
        let mut m = mapper();
        assert!(m.apply(&intent("Left_Fist", 0), 0).is_none());
        assert_eq!(m.state(), ActuatorState::Grounded);
        assert_eq!(
            dropped_reason(&m),
            Some(DropReason::IllegalInState { state: ActuatorState::Grounded })
        );
    }

    #[test]
    fn test_toggle_flight_cycle() {
        let mut m = mapper();
        fly(&mut m, 0);

        let out = m.apply(&intent("Left_Fist", 4 * SEC), 4 * SEC).unwrap();
        assert_eq!(out.command, FlightCommand::RotateLeft);
        assert_eq!(out.magnitude, Some(45));
        assert_eq!(m.state(), ActuatorState::Flying);

        let out = m.apply(&intent("Push", 5 * SEC), 5 * SEC).unwrap();
        assert_eq!(out.command, FlightCommand::Land);
        assert_eq!(m.state(), ActuatorState::Landing);

        assert!(m.complete(FlightCommand::Land, true, 6 * SEC));
        assert_eq!(m.state(), ActuatorState::Grounded);
    }

    #[test]
    fn test_cooldown_checked_before_legality() {
        let mut m = mapper();
        m.apply(&intent("Push", 0), 0).unwrap();
        assert_eq!(m.state(), ActuatorState::TakingOff);

        // Toggle is both cooling down and illegal while taking off
        assert!(m.apply(&intent("Push", SEC), SEC).is_none());
        assert_eq!(dropped_reason(&m), Some(DropReason::CooldownActive { remaining_ms: 2_000 }));

        // Once cooled down, legality applies
        assert!(m.apply(&intent("Push", 3 * SEC), 3 * SEC).is_none());
        assert_eq!(
            dropped_reason(&m),
            Some(DropReason::IllegalInState { state: ActuatorState::TakingOff })
        );
    }

    #[test]
    fn test_rotation_cooldown() {
        let mut m = mapper();
        fly(&mut m, 0);
        let t = 4 * SEC;
        assert!(m.apply(&intent("Left_Fist", t), t).is_some());
        assert!(m.apply(&intent("Left_Fist", t + 100_000), t + 100_000).is_none());
        assert!(matches!(dropped_reason(&m), Some(DropReason::CooldownActive { remaining_ms: 400 })));
        // Other commands have their own cooldown
        assert!(m.apply(&intent("Right_Fist", t + 100_000), t + 100_000).is_some());
        assert!(m.apply(&intent("Left_Fist", t + 500_000), t + 500_000).is_some());
    }

    #[test]
    fn test_unmapped_and_disabled() {
        let mut m = mapper();
        assert!(m.apply(&intent("Jumping_Jacks", 0), 0).is_none());
        assert_eq!(dropped_reason(&m), Some(DropReason::Unmapped));

        assert!(m.apply(&intent("Tongue", 0), 0).is_none());
        assert_eq!(dropped_reason(&m), Some(DropReason::Disabled));

        // Disabled emergency binding does not stop the drone
        assert!(m.apply(&intent("Left_Foot", 0), 0).is_none());
        assert_eq!(dropped_reason(&m), Some(DropReason::Disabled));
    }

    #[test]
    fn test_emergency_from_every_state() {
        for target in ActuatorState::ALL {
            let mut m = mapper();
            match target {
                ActuatorState::Grounded => {}
                ActuatorState::TakingOff => {
                    m.apply(&intent("Push", 0), 0);
                }
                ActuatorState::Flying => fly(&mut m, 0),
                ActuatorState::Landing => {
                    fly(&mut m, 0);
                    m.apply(&intent("Push", 4 * SEC), 4 * SEC);
                }
            }
            assert_eq!(m.state(), target);

            // Within every other cooldown window
            let at = 4 * SEC + 1;
            let mut em = intent("Unbound_Class", at);
            em.emergency = true;
            let out = m.apply(&em, at).unwrap();
            assert_eq!(out.command, FlightCommand::Emergency);
            assert_eq!(m.state(), ActuatorState::Grounded);

            // Even immediately again, inside the emergency cooldown
            assert!(m.apply(&em, at + 1).is_some());
        }
    }

    #[test]
    fn test_enabled_emergency_binding() {
        let mut config = MapperConfig::default();
        for b in &mut config.bindings {
            if b.label == "Left_Foot" {
                b.enabled = true;
            }
        }
        let mut m = CommandMapper::new(&config, &SafetyConfig::default()).unwrap();
        fly(&mut m, 0);
        let out = m.apply(&intent("Left_Foot", SEC), SEC).unwrap();
        assert_eq!(out.command, FlightCommand::Emergency);
        assert_eq!(m.state(), ActuatorState::Grounded);
    }

    #[test]
    fn test_mismatched_completion_ignored() {
        let mut m = mapper();
        assert!(!m.complete(FlightCommand::Takeoff, true, 0));
        assert_eq!(m.state(), ActuatorState::Grounded);

        m.apply(&intent("Push", 0), 0);
        assert!(!m.complete(FlightCommand::Land, true, 1));
        assert_eq!(m.state(), ActuatorState::TakingOff);

        // Failed takeoff returns to the ground
        assert!(m.complete(FlightCommand::Takeoff, false, 2));
        assert_eq!(m.state(), ActuatorState::Grounded);
    }

    #[test]
    fn test_failed_landing_keeps_flying() {
        let mut m = mapper();
        fly(&mut m, 0);
        m.apply(&intent("Push", 4 * SEC), 4 * SEC).unwrap();
        assert!(m.complete(FlightCommand::Land, false, 5 * SEC));
        assert_eq!(m.state(), ActuatorState::Flying);
    }

    #[test]
    fn test_legality_override() {
        let mut config = MapperConfig::default();
        config
            .legality
            .insert(FlightCommand::RotateLeft, vec![ActuatorState::Grounded, ActuatorState::Flying]);
        let mut m = CommandMapper::new(&config, &SafetyConfig::default()).unwrap();
        assert!(m.apply(&intent("Left_Fist", 0), 0).is_some());

        config.legality.insert(FlightCommand::Emergency, vec![ActuatorState::Flying]);
        assert!(CommandMapper::new(&config, &SafetyConfig::default()).is_err());
    }

    #[test]
    fn test_watchdog_lands_once() {
        let safety = SafetyConfig { max_flight_secs: 10, auto_land: true };
        let mut m = CommandMapper::new(&MapperConfig::default(), &safety).unwrap();
        fly(&mut m, 0);

        assert!(m.check_watchdog(10 * SEC).is_none());
        let out = m.check_watchdog(11 * SEC).unwrap();
        assert_eq!(out.command, FlightCommand::Land);
        assert_eq!(out.trigger, None);
        assert_eq!(m.state(), ActuatorState::Landing);
        assert!(m.check_watchdog(12 * SEC).is_none());

        let off = SafetyConfig { max_flight_secs: 10, auto_land: false };
        let mut m = CommandMapper::new(&MapperConfig::default(), &off).unwrap();
        fly(&mut m, 0);
        assert!(m.check_watchdog(100 * SEC).is_none());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let mut config = MapperConfig::default();
        config.bindings.push(config.bindings[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_outcome_json() {
        let outcome = CommandOutcome::Dropped {
            label: "Push".into(),
            command: Some(FlightCommand::ToggleFlight),
            reason: DropReason::CooldownActive { remaining_ms: 1500 },
            at_us: 0,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "dropped");
        assert_eq!(json["reason"], "cooldown_active");
        assert_eq!(json["remaining_ms"], 1500);
    }
}
