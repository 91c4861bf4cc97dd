//! Decision pipeline glue
//!
//! One decision cycle is: snapshot, extract, infer, engine, mapper (and
//! flight watchdog), then continuous yaw, strictly in that order. [`DecisionStage`] owns
//! everything after the snapshot, so the async [`runtime`] can run
//! inference on a worker thread and still resolve the cycle in one place.
//! [`DecisionPipeline`] wraps a stage and a conditioner for synchronous use.

pub mod runtime;

use std::sync::Arc;

use neuropilot_core::{ActuatorState, FlightCommand, Intent, ModelSlot, OutgoingCommand, SampleFrame};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::control::CommandMapper;
use crate::decision::{ContinuousController, TemporalDecisionEngine};
use crate::error::{ConditionerResult, FeatureError, FeatureResult, ModelLoadError, PipelineResult};
use crate::ml::{ClassifierEnsemble, EnsembleOutput, FeatureExtractor, FeatureVector, ModelValidation};
use crate::processing::{SignalConditioner, WindowSnapshot};
use crate::telemetry::CycleTelemetry;

pub use runtime::{ControlSignal, PipelineRuntime, RuntimeChannels, SessionClock};

/// How a decision cycle ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    /// Not enough conditioned samples for a full window yet
    WarmingUp {
        /// Samples buffered
        have: usize,
        /// Samples per window
        need: usize,
    },
    /// Features could not be computed
    FeatureError {
        /// Reason
        reason: String,
    },
    /// Neither model produced a valid distribution
    NoVote,
    /// The engine evaluated at least one model's distribution
    Evaluated {
        /// Models that voted
        votes: usize,
    },
}

/// What reached the decision stage this cycle
#[derive(Clone, Debug)]
pub enum CycleInput {
    /// Feature extraction is still warming up
    WarmingUp {
        /// Samples buffered
        have: usize,
        /// Samples per window
        need: usize,
    },
    /// Feature extraction failed
    FeatureFailed(FeatureError),
    /// Both models were run (possibly without a vote)
    Inferred(EnsembleOutput),
}

impl From<FeatureError> for CycleInput {
    fn from(e: FeatureError) -> Self {
        match e {
            FeatureError::WarmingUp { have, need } => Self::WarmingUp { have, need },
            other => Self::FeatureFailed(other),
        }
    }
}

/// Result of one decision cycle
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleReport {
    /// Cycle counter since start
    pub cycle: u64,
    /// Cycle timestamp
    pub timestamp_us: u64,
    /// How the cycle ended
    pub status: CycleStatus,
    /// Intent decided this cycle
    pub intent: Option<Intent>,
    /// Command for the dispatcher
    pub command: Option<OutgoingCommand>,
    /// Full telemetry
    pub telemetry: CycleTelemetry,
}

/// Extraction, engine and mapper: everything a cycle needs after the
/// snapshot. Single owner of the actuator state.
#[derive(Debug)]
pub struct DecisionStage {
    extractor: FeatureExtractor,
    ensemble: Arc<ClassifierEnsemble>,
    engine: TemporalDecisionEngine,
    mapper: CommandMapper,
    continuous: Option<ContinuousController>,
    cycle: u64,
}

impl DecisionStage {
    /// Build the stage and check models against the feature layout.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] for an invalid
    /// configuration, a model/layout mismatch or rules naming unknown
    /// classes.
    pub fn new(config: &PipelineConfig, ensemble: Arc<ClassifierEnsemble>) -> PipelineResult<Self> {
        let extractor = FeatureExtractor::new(
            config.signal.channels,
            config.signal.active_channels.clone(),
            config.signal.window_samples(),
            config.features.layout,
        )?;

        for slot in ModelSlot::ALL {
            let model_len = ensemble.model(slot).input_len();
            if model_len != extractor.feature_len() {
                return Err(ModelLoadError::InputLength {
                    slot,
                    model_len,
                    feature_len: extractor.feature_len(),
                }
                .into());
            }
        }

        let engine = TemporalDecisionEngine::new(
            &config.engine,
            config.cycle.period_us(),
            [ensemble.labels(ModelSlot::Coarse), ensemble.labels(ModelSlot::Fine)],
        )?;
        let mapper = CommandMapper::new(&config.mapper, &config.safety)?;
        let continuous = if config.continuous.enabled {
            let labels = ensemble.labels(config.continuous.model);
            Some(ContinuousController::new(&config.continuous, labels)?)
        } else {
            None
        };

        Ok(Self { extractor, ensemble, engine, mapper, continuous, cycle: 0 })
    }

    /// Features of the newest full window
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::WarmingUp`] before a full window exists.
    pub fn extract(&self, snapshot: &WindowSnapshot) -> FeatureResult<FeatureVector> {
        self.extractor.extract(snapshot)
    }

    /// Shared handle to the models, for off-thread inference
    #[must_use]
    pub fn ensemble(&self) -> Arc<ClassifierEnsemble> {
        Arc::clone(&self.ensemble)
    }

    /// Feature extractor
    #[must_use]
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Decision engine
    #[must_use]
    pub fn engine(&self) -> &TemporalDecisionEngine {
        &self.engine
    }

    /// Command mapper
    #[must_use]
    pub fn mapper(&self) -> &CommandMapper {
        &self.mapper
    }

    /// Continuous yaw controller, when enabled
    #[must_use]
    pub fn continuous(&self) -> Option<&ContinuousController> {
        self.continuous.as_ref()
    }

    /// Run engine and mapper for one cycle. Never fails.
    pub fn resolve(&mut self, now_us: u64, input: CycleInput, stale: bool) -> CycleReport {
        self.cycle += 1;

        let (status, intent, latency) = match input {
            CycleInput::WarmingUp { have, need } => {
                debug!(have, need, "Warming up");
                (CycleStatus::WarmingUp { have, need }, None, None)
            }
            CycleInput::FeatureFailed(e) => {
                warn!(error = %e, "Feature extraction failed");
                (CycleStatus::FeatureError { reason: e.to_string() }, None, None)
            }
            CycleInput::Inferred(output) => {
                if let Some(continuous) = self.continuous.as_mut() {
                    if let Some(probs) = output.get(continuous.slot()) {
                        continuous.observe(now_us, probs);
                    }
                }
                let votes = output.votes();
                let intent = self.engine.update(now_us, &output);
                let status = if votes == 0 {
                    CycleStatus::NoVote
                } else {
                    CycleStatus::Evaluated { votes }
                };
                (status, intent, Some(output.latency_us))
            }
        };

        let mut command = intent.as_ref().and_then(|i| self.mapper.apply(i, now_us));
        if command.is_none() {
            command = self.mapper.check_watchdog(now_us);
        }
        if let Some(continuous) = self.continuous.as_mut() {
            continuous.update(now_us);
            let state = self.mapper.state();
            if command.is_none() && state == ActuatorState::Flying {
                command = continuous
                    .pending_command(now_us)
                    .filter(|out| self.mapper.is_legal(out.command, state));
                if command.is_some() {
                    continuous.acknowledge();
                }
            }
        }

        let engine = self.engine.snapshot();
        let telemetry = CycleTelemetry {
            cycle: self.cycle,
            timestamp_us: now_us,
            status: status.clone(),
            stale,
            active_spikes: engine.active_spikes(),
            engine,
            intent: intent.clone(),
            actuator_state: self.mapper.state(),
            flight_time_ms: self.mapper.flight_time_us(now_us).map(|us| us / 1_000),
            last_outcome: self.mapper.last_outcome().cloned(),
            inference_latency_us: latency,
            continuous: self.continuous.as_ref().map(|c| c.snapshot(now_us)),
        };

        CycleReport {
            cycle: self.cycle,
            timestamp_us: now_us,
            status,
            intent,
            command,
            telemetry,
        }
    }

    /// Forward an actuator completion signal. A completed takeoff leaves
    /// the actuator hovering, so continuous yaw starts from rest.
    pub fn complete(&mut self, command: FlightCommand, success: bool, now_us: u64) -> bool {
        let matched = self.mapper.complete(command, success, now_us);
        if matched && success && command == FlightCommand::Takeoff {
            if let Some(continuous) = self.continuous.as_mut() {
                continuous.reset();
            }
        }
        matched
    }

    /// Operator emergency stop. Preempts all trigger bookkeeping exactly as
    /// an emergency intent does, then grounds the actuator.
    pub fn emergency_stop(&mut self, now_us: u64) -> OutgoingCommand {
        self.engine.preempt_all(now_us);
        if let Some(continuous) = self.continuous.as_mut() {
            continuous.reset();
        }
        self.mapper.emergency_stop(now_us)
    }

    /// Clear engine statistics (explicit restart)
    pub fn reset_engine(&mut self) {
        self.engine.reset();
        if let Some(continuous) = self.continuous.as_mut() {
            continuous.reset();
        }
    }
}

/// Synchronous pipeline: conditioner plus decision stage
#[derive(Debug)]
pub struct DecisionPipeline {
    conditioner: SignalConditioner,
    stage: DecisionStage,
}

impl DecisionPipeline {
    /// Build a pipeline around already-loaded models.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] for invalid configuration
    /// or a model/layout mismatch.
    pub fn new(config: &PipelineConfig, ensemble: Arc<ClassifierEnsemble>) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            conditioner: SignalConditioner::new(&config.signal)?,
            stage: DecisionStage::new(config, ensemble)?,
        })
    }

    /// Load the configured model artifacts and build a pipeline.
    ///
    /// # Errors
    ///
    /// Model load failures are fatal and returned here.
    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let feature_len = config.features.layout.feature_len(config.signal.active_channels.len());
        let ensemble = ClassifierEnsemble::load(&config.models, feature_len)?;
        Self::new(config, Arc::new(ensemble))
    }

    /// Condition one frame; rejected frames are logged and reported.
    ///
    /// # Errors
    ///
    /// Returns the conditioner's rejection; the pipeline stays usable.
    pub fn ingest(&mut self, frame: &SampleFrame) -> ConditionerResult<()> {
        self.conditioner.ingest(frame).inspect_err(|e| {
            warn!(sequence = frame.sequence, error = %e, "Frame rejected");
        })
    }

    /// Run one full decision cycle.
    pub fn run_cycle(&mut self, now_us: u64) -> CycleReport {
        let snapshot = self.conditioner.snapshot();
        let stale = self.conditioner.is_stale(now_us);
        let input = match self.stage.extract(&snapshot) {
            Ok(features) => CycleInput::Inferred(self.stage.ensemble.infer(&features)),
            Err(e) => e.into(),
        };
        self.stage.resolve(now_us, input, stale)
    }

    /// Forward an actuator completion signal
    pub fn complete(&mut self, command: FlightCommand, success: bool, now_us: u64) -> bool {
        self.stage.complete(command, success, now_us)
    }

    /// Operator emergency stop
    pub fn emergency_stop(&mut self, now_us: u64) -> OutgoingCommand {
        self.stage.emergency_stop(now_us)
    }

    /// Run both models on reference features and report each prediction
    pub fn validate_models(&self) -> Vec<ModelValidation> {
        let features = self.stage.extractor.reference_features();
        self.stage.ensemble.validate(&features)
    }

    /// Current actuator state
    #[must_use]
    pub fn state(&self) -> ActuatorState {
        self.stage.mapper.state()
    }

    /// Decision stage
    #[must_use]
    pub fn stage(&self) -> &DecisionStage {
        &self.stage
    }

    /// Signal conditioner
    #[must_use]
    pub fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    /// Clear buffer, filters and engine statistics
    pub fn reset(&mut self) {
        self.conditioner.reset();
        self.stage.reset_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InferenceResult, PipelineError};
    use crate::ml::{Classifier, FeatureLayout};
    use crate::ml::ensemble::{COARSE_LABELS, FINE_LABELS};
    use crate::simulation::SyntheticSource;
    use crate::control::{CommandOutcome, DropReason};
    use crate::decision::{ClassRule, TriggerRule};
    use neuropilot_core::TriggerKind;
    use std::sync::Mutex;

    const PERIOD: u64 = 500_000;

    /// Returns scripted distributions, one per call, repeating the last
    struct ScriptedClassifier {
        name: String,
        labels: Vec<String>,
        input_len: usize,
        script: Mutex<Vec<Vec<f64>>>,
    }

    impl ScriptedClassifier {
        fn new(name: &str, labels: &[&str], input_len: usize) -> Self {
            Self {
                name: name.into(),
                labels: labels.iter().map(|s| (*s).to_string()).collect(),
                input_len,
                script: Mutex::new(Vec::new()),
            }
        }

        /// Queue `p` on `hot`, remainder spread evenly
        fn with(self, steps: &[(&str, f64)]) -> Self {
            {
                let mut script = self.script.lock().unwrap();
                for &(hot, p) in steps.iter().rev() {
                    let rest = (1.0 - p) / (self.labels.len() - 1) as f64;
                    script.push(self.labels.iter().map(|l| if l == hot { p } else { rest }).collect());
                }
            }
            self
        }
    }

    impl Classifier for ScriptedClassifier {
        fn name(&self) -> &str {
            &self.name
        }
        fn labels(&self) -> &[String] {
            &self.labels
        }
        fn input_len(&self) -> usize {
            self.input_len
        }
        fn predict(&self, _features: &[f64]) -> InferenceResult<Vec<f64>> {
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 { script.pop() } else { script.last().cloned() };
            Ok(next.unwrap_or_else(|| vec![1.0 / self.labels.len() as f64; self.labels.len()]))
        }
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.signal.channels = 4;
        config.signal.active_channels = vec![0, 1, 2, 3];
        config.signal.buffer_secs = 2.0;
        config.signal.window_secs = 1.0;
        config
    }

    fn pipeline(config: &PipelineConfig, coarse: &[(&str, f64)], fine: &[(&str, f64)]) -> DecisionPipeline {
        let n = FeatureLayout::Full.feature_len(4);
        let ensemble = ClassifierEnsemble::new(
            Box::new(ScriptedClassifier::new("coarse", &COARSE_LABELS, n).with(coarse)),
            Box::new(ScriptedClassifier::new("fine", &FINE_LABELS, n).with(fine)),
            n,
        )
        .unwrap();
        DecisionPipeline::new(config, Arc::new(ensemble)).unwrap()
    }

    /// Feed one second of frames ending at `until_us`
    fn warm(p: &mut DecisionPipeline, source: &mut SyntheticSource, until_us: u64) {
        while source.next_timestamp_us() <= until_us {
            p.ingest(&source.next_frame()).unwrap();
        }
    }

    /// Emit a takeoff directly and complete it
    fn airborne(p: &mut DecisionPipeline, now_us: u64) {
        let push = Intent {
            slot: ModelSlot::Fine,
            label: "Push".into(),
            kind: TriggerKind::Instant,
            confidence: 1.0,
            progress: 1.0,
            emergency: false,
            timestamp_us: now_us,
        };
        assert_eq!(p.stage.mapper.apply(&push, now_us).unwrap().command, FlightCommand::Takeoff);
        assert!(p.complete(FlightCommand::Takeoff, true, now_us + 1));
    }

    #[test]
    fn test_warm_up_yields_no_intent() {
        let config = small_config();
        let mut p = pipeline(&config, &[("Left_Fist", 0.9)], &[("Rest", 0.9)]);
        let mut src = SyntheticSource::new(4, 256.0, 7);

        warm(&mut p, &mut src, 200_000);
        let report = p.run_cycle(200_000);
        assert!(matches!(report.status, CycleStatus::WarmingUp { need: 256, .. }));
        assert!(report.intent.is_none());
        assert!(report.command.is_none());
    }

    #[test]
    fn test_left_fist_scenario_grounded_then_flying() {
        let config = small_config();
        let mut p = pipeline(&config, &[("Left_Fist", 0.9)], &[("Rest", 0.9)]);
        let mut src = SyntheticSource::new(4, 256.0, 7);

        let mut t = 1_000_000;
        warm(&mut p, &mut src, t);

        // Grounded: the intent fires on the third cycle but is illegal
        let mut intents = Vec::new();
        for cycle in 1..=3 {
            warm(&mut p, &mut src, t);
            let report = p.run_cycle(t);
            assert!(report.command.is_none());
            if let Some(intent) = report.intent {
                intents.push((cycle, intent));
            }
            t += PERIOD;
        }
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].0, 3);
        assert_eq!(intents[0].1.label, "Left_Fist");
        assert_eq!(p.state(), ActuatorState::Grounded);
        assert!(matches!(
            p.stage().mapper().last_outcome(),
            Some(CommandOutcome::Dropped {
                reason: DropReason::IllegalInState { state: ActuatorState::Grounded },
                ..
            })
        ));
    }

    #[test]
    fn test_left_fist_scenario_emits_rotate_left_once() {
        let config = small_config();
        let mut p = pipeline(&config, &[("Left_Fist", 0.9)], &[("Rest", 0.9)]);
        let mut src = SyntheticSource::new(4, 256.0, 7);

        // Get airborne through the operator-independent path
        p.stage.mapper.apply(
            &Intent {
                slot: ModelSlot::Fine,
                label: "Push".into(),
                kind: TriggerKind::Instant,
                confidence: 1.0,
                progress: 1.0,
                emergency: false,
                timestamp_us: 0,
            },
            0,
        );
        assert!(p.complete(FlightCommand::Takeoff, true, 1));

        let mut t = 1_000_000;
        let mut commands = Vec::new();
        for cycle in 1..=8 {
            warm(&mut p, &mut src, t);
            if let Some(cmd) = p.run_cycle(t).command {
                commands.push((cycle, cmd));
            }
            t += PERIOD;
        }
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, 3);
        assert_eq!(commands[0].1.command, FlightCommand::RotateLeft);
        assert_eq!(commands[0].1.trigger, Some(TriggerKind::Sustained));
    }

    #[test]
    fn test_push_second_rise_is_cooldown_blocked() {
        let mut config = small_config();
        config.engine.smoothing_window = 1;
        let fine = [("Push", 0.9), ("Rest", 0.9), ("Push", 0.9)];
        let mut p = pipeline(&config, &[("Rest", 0.9)], &fine);
        let mut src = SyntheticSource::new(4, 256.0, 3);

        let mut t = 1_000_000;
        let mut reports = Vec::new();
        for _ in 0..3 {
            warm(&mut p, &mut src, t);
            reports.push(p.run_cycle(t));
            t += PERIOD;
        }

        let first = reports[0].command.as_ref().unwrap();
        assert_eq!(first.command, FlightCommand::Takeoff);
        assert_eq!(first.source_label, "Push");

        // Released on the second cycle, fires again on the third
        assert!(reports[1].intent.is_none());
        assert_eq!(reports[2].intent.as_ref().unwrap().label, "Push");
        assert!(reports[2].command.is_none());
        assert!(matches!(
            reports[2].telemetry.last_outcome,
            Some(CommandOutcome::Dropped { reason: DropReason::CooldownActive { .. }, .. })
        ));
        assert_eq!(p.state(), ActuatorState::TakingOff);
    }

    #[test]
    fn test_push_release_and_rise_with_default_smoothing() {
        let config = small_config();
        assert_eq!(config.engine.smoothing_window, 5);
        let fine = [("Push", 0.9), ("Rest", 0.9), ("Push", 0.97), ("Push", 0.97), ("Push", 0.97)];
        let mut p = pipeline(&config, &[("Rest", 0.9)], &fine);
        let mut src = SyntheticSource::new(4, 256.0, 5);

        let mut t = 1_000_000;
        let mut reports = Vec::new();
        for _ in 0..5 {
            warm(&mut p, &mut src, t);
            reports.push(p.run_cycle(t));
            t += PERIOD;
        }

        assert_eq!(reports[0].command.as_ref().unwrap().command, FlightCommand::Takeoff);
        // The Rest cycle pulls the 5-cycle mean under the release threshold,
        // and it takes three strong cycles to climb back over 0.75
        assert!(reports[1..4].iter().all(|r| r.intent.is_none()));
        assert!(p.stage().engine().smoothed(ModelSlot::Fine, "Push").unwrap() >= 0.75);

        assert_eq!(reports[4].intent.as_ref().unwrap().label, "Push");
        assert!(reports[4].command.is_none());
        assert!(matches!(
            reports[4].telemetry.last_outcome,
            Some(CommandOutcome::Dropped { reason: DropReason::CooldownActive { remaining_ms: 1_000 }, .. })
        ));
        assert_eq!(p.state(), ActuatorState::TakingOff);
    }

    #[test]
    fn test_operator_stop_restarts_instant_cooldown() {
        let mut config = small_config();
        config.engine.smoothing_window = 1;
        let mut p = pipeline(&config, &[("Rest", 0.9)], &[("Push", 0.9)]);
        let mut src = SyntheticSource::new(4, 256.0, 9);

        warm(&mut p, &mut src, 1_000_000);
        assert_eq!(p.run_cycle(1_000_000).command.unwrap().command, FlightCommand::Takeoff);
        assert!(p.complete(FlightCommand::Takeoff, true, 1_200_000));
        warm(&mut p, &mut src, 1_500_000);
        assert!(p.run_cycle(1_500_000).command.is_none());

        assert_eq!(p.emergency_stop(2_000_000).command, FlightCommand::Emergency);
        assert_eq!(p.state(), ActuatorState::Grounded);

        // Push stays held; its own cooldown would have ended at 4.0 s
        let mut t = 2_500_000;
        while t < 5_000_000 {
            warm(&mut p, &mut src, t);
            let report = p.run_cycle(t);
            assert!(report.intent.is_none(), "Push re-fired at {t}us");
            assert!(report.command.is_none());
            t += PERIOD;
        }

        warm(&mut p, &mut src, t);
        let report = p.run_cycle(t);
        assert_eq!(report.intent.unwrap().label, "Push");
        assert_eq!(report.command.unwrap().command, FlightCommand::Takeoff);
    }

    #[test]
    fn test_continuous_yaw_while_flying() {
        let mut config = small_config();
        config.continuous.enabled = true;
        let mut coarse: Vec<(&str, f64)> = (0..10).map(|i| ("Right_Fist", if i % 2 == 0 { 0.10 } else { 0.14 })).collect();
        coarse.push(("Right_Fist", 0.9));
        coarse.push(("Right_Fist", 0.10));
        let mut p = pipeline(&config, &coarse, &[("Rest", 0.9)]);
        let mut src = SyntheticSource::new(4, 256.0, 4);
        airborne(&mut p, 0);

        let mut t = 1_000_000;
        for _ in 0..10 {
            warm(&mut p, &mut src, t);
            assert!(p.run_cycle(t).command.is_none());
            t += PERIOD;
        }

        // Spike of 0.78 over the baseline mean, shaped and averaged
        warm(&mut p, &mut src, t);
        let report = p.run_cycle(t);
        let out = report.command.unwrap();
        assert_eq!(out.command, FlightCommand::YawRight);
        assert_eq!(out.magnitude, Some(9));
        assert_eq!(out.source_label, "Right_Fist");
        assert_eq!(out.trigger, Some(TriggerKind::Spike));
        let snap = report.telemetry.continuous.unwrap();
        assert_eq!(snap.live_spikes, 1);
        assert!((snap.right_intensity - 0.78).abs() < 1e-9);

        // Nothing streams once grounded, and the stop clears the velocity
        p.emergency_stop(t + 1);
        assert_eq!(p.stage().continuous().unwrap().velocity(), 0.0);
        t += PERIOD;
        warm(&mut p, &mut src, t);
        assert!(p.run_cycle(t).command.is_none());
    }

    #[test]
    fn test_continuous_reset_on_takeoff() {
        let mut config = small_config();
        config.continuous.enabled = true;
        let mut p = pipeline(&config, &[("Rest", 0.9)], &[("Rest", 0.9)]);
        p.stage
            .continuous
            .as_mut()
            .unwrap()
            .push_spike(crate::decision::YawSide::Left, crate::decision::SpikeEvent { timestamp_us: 0, magnitude: 0.9 });
        p.run_cycle(10);
        assert!(p.stage().continuous().unwrap().velocity() < 0.0);

        airborne(&mut p, 20);
        assert_eq!(p.stage().continuous().unwrap().velocity(), 0.0);
        assert!(p.run_cycle(30).command.is_none());
    }

    #[test]
    fn test_emergency_stop_and_telemetry() {
        let config = small_config();
        let mut p = pipeline(&config, &[("Rest", 0.9)], &[("Rest", 0.9)]);
        let out = p.emergency_stop(5);
        assert_eq!(out.command, FlightCommand::Emergency);
        assert_eq!(p.state(), ActuatorState::Grounded);

        let report = p.run_cycle(10);
        assert!(report.telemetry.stale);
        assert_eq!(report.telemetry.actuator_state, ActuatorState::Grounded);
        assert!(matches!(report.telemetry.last_outcome, Some(CommandOutcome::Emitted(_))));
        serde_json::to_string(&report.telemetry).unwrap();
    }

    #[test]
    fn test_one_model_failing_still_decides() {
        struct Broken(Vec<String>);
        impl Classifier for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn labels(&self) -> &[String] {
                &self.0
            }
            fn input_len(&self) -> usize {
                16
            }
            fn predict(&self, _features: &[f64]) -> InferenceResult<Vec<f64>> {
                Ok(vec![f64::NAN])
            }
        }

        let mut config = small_config();
        config.engine.rules.retain(|r| r.model == ModelSlot::Coarse);
        let ensemble = ClassifierEnsemble::new(
            Box::new(ScriptedClassifier::new("coarse", &COARSE_LABELS, 16).with(&[("Left_Fist", 0.9)])),
            Box::new(Broken(vec!["Push".into()])),
            16,
        )
        .unwrap();
        let mut p = DecisionPipeline::new(&config, Arc::new(ensemble)).unwrap();
        let mut src = SyntheticSource::new(4, 256.0, 1);

        warm(&mut p, &mut src, 1_000_000);
        let report = p.run_cycle(1_000_000);
        assert_eq!(report.status, CycleStatus::Evaluated { votes: 1 });
        let fine = &report.telemetry.engine.models[1];
        assert!(!fine.voted);
        assert!(fine.error.is_some());
    }

    #[test]
    fn test_validate_models_reports_both_slots() {
        let config = small_config();
        let p = DecisionPipeline::new(&config, Arc::new(ClassifierEnsemble::synthetic(16).unwrap())).unwrap();
        let report = p.validate_models();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].slot, ModelSlot::Coarse);
        assert!(report.iter().all(|v| v.predicted.is_ok()));
        assert!(COARSE_LABELS.contains(&report[0].predicted.as_deref().unwrap()));
    }

    #[test]
    fn test_layout_mismatch_is_fatal() {
        let mut config = small_config();
        config.features.layout = FeatureLayout::LogVariance;
        let ensemble = ClassifierEnsemble::synthetic(16).unwrap();
        assert!(matches!(
            DecisionPipeline::new(&config, Arc::new(ensemble)),
            Err(PipelineError::ModelLoad(ModelLoadError::InputLength {
                slot: ModelSlot::Coarse,
                model_len: 16,
                feature_len: 4,
            }))
        ));
    }

    #[test]
    fn test_unknown_rule_label_is_fatal() {
        let mut config = small_config();
        config.engine.rules.push(ClassRule {
            model: ModelSlot::Fine,
            label: "Left_Fist".into(),
            priority: 0,
            emergency: false,
            trigger: TriggerRule::Sustained { threshold: 0.7, required_duration_ms: 1_000 },
        });
        let ensemble = ClassifierEnsemble::synthetic(16).unwrap();
        assert!(matches!(
            DecisionPipeline::new(&config, Arc::new(ensemble)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_watchdog_runs_during_warm_up() {
        let mut config = small_config();
        config.safety.max_flight_secs = 1;
        let mut p = pipeline(&config, &[("Rest", 0.9)], &[("Rest", 0.9)]);
        p.stage.mapper.apply(
            &Intent {
                slot: ModelSlot::Fine,
                label: "Push".into(),
                kind: TriggerKind::Instant,
                confidence: 1.0,
                progress: 1.0,
                emergency: false,
                timestamp_us: 0,
            },
            0,
        );
        p.complete(FlightCommand::Takeoff, true, 0);

        let report = p.run_cycle(2_000_000);
        assert!(matches!(report.status, CycleStatus::WarmingUp { .. }));
        assert_eq!(report.command.unwrap().command, FlightCommand::Land);
    }
}
