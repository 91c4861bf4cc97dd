//! Async pipeline runtime
//!
//! Two tasks run independently: ingestion conditions frames as they
//! arrive, and the cycle task runs decision cycles at a fixed rate.
//! They share only the conditioner, behind a mutex held for one frame or
//! one snapshot copy. Each model runs on the blocking pool under its own
//! time budget; a late result counts as no vote for that model only, and a
//! model still busy with an earlier cycle is skipped rather than stacked.
//! A `watch` flag stops both tasks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use neuropilot_core::{ClassProbabilities, FlightCommand, ModelSlot, OutgoingCommand, SampleFrame};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CycleInput, DecisionStage};
use crate::config::PipelineConfig;
use crate::error::{InferenceError, InferenceResult, PipelineResult};
use crate::ml::{ClassifierEnsemble, EnsembleOutput, FeatureVector};
use crate::processing::SignalConditioner;
use crate::telemetry::CycleTelemetry;

/// Frames buffered between producer and conditioner
const FRAME_QUEUE: usize = 1024;
/// Commands buffered for the dispatcher
const COMMAND_QUEUE: usize = 32;
/// Telemetry cycles kept for slow subscribers
const TELEMETRY_QUEUE: usize = 64;

/// One model's inference on the blocking pool
type ModelTask = JoinHandle<InferenceResult<ClassProbabilities>>;

/// Monotonic microseconds since session start
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    /// Start counting now
    #[must_use]
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Microseconds since start
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Out-of-band input to the cycle task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// The actuator finished a takeoff or landing
    Completed {
        /// Command that finished
        command: FlightCommand,
        /// Whether it succeeded
        success: bool,
    },
    /// Operator emergency stop
    EmergencyStop,
}

/// Producer and consumer ends of a running pipeline
#[derive(Debug)]
pub struct RuntimeChannels {
    /// Raw frames in
    pub frames: mpsc::Sender<SampleFrame>,
    /// Completion signals and operator input
    pub control: mpsc::Sender<ControlSignal>,
    /// Commands out, in emission order
    pub commands: mpsc::Receiver<OutgoingCommand>,
    /// Per-cycle telemetry; subscribe for more receivers
    pub telemetry: broadcast::Sender<CycleTelemetry>,
    /// Clock shared with the pipeline, for stamping frames
    pub clock: SessionClock,
}

/// Handles to the ingestion and cycle tasks
#[derive(Debug)]
pub struct PipelineRuntime {
    ingest: JoinHandle<()>,
    cycles: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl PipelineRuntime {
    /// Validate `config`, build the pipeline and start both tasks.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] if the pipeline cannot
    /// be built; nothing is spawned in that case.
    pub fn spawn(
        config: &PipelineConfig,
        ensemble: Arc<ClassifierEnsemble>,
    ) -> PipelineResult<(Self, RuntimeChannels)> {
        config.validate()?;
        let conditioner = Arc::new(Mutex::new(SignalConditioner::new(&config.signal)?));
        let stage = DecisionStage::new(config, ensemble)?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (telemetry_tx, _) = broadcast::channel(TELEMETRY_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let clock = SessionClock::start();

        let ingest = tokio::spawn(ingest_frames(frame_rx, Arc::clone(&conditioner), shutdown_rx.clone()));
        let cycles = tokio::spawn(
            CycleTask {
                stage,
                conditioner,
                clock,
                period: Duration::from_micros(config.cycle.period_us()),
                inference_timeout: Duration::from_millis(config.cycle.inference_timeout_ms),
                in_flight: [None, None],
                commands: command_tx,
                telemetry: telemetry_tx.clone(),
            }
            .run(control_rx, shutdown_rx),
        );

        info!(
            cycle_hz = config.cycle.cycle_hz,
            timeout_ms = config.cycle.inference_timeout_ms,
            "Pipeline runtime started"
        );

        let channels = RuntimeChannels {
            frames: frame_tx,
            control: control_tx,
            commands: command_rx,
            telemetry: telemetry_tx,
            clock,
        };
        Ok((Self { ingest, cycles, shutdown: shutdown_tx }, channels))
    }

    /// Whether both tasks have exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished() && self.cycles.is_finished()
    }

    /// Signal both tasks to stop and wait for them.
    pub async fn shutdown(self) {
        // Receivers may already be gone if the tasks exited on their own
        let _ = self.shutdown.send(true);
        self.join().await;
    }

    /// Wait for both tasks. Ingestion ends when every frame sender is
    /// dropped; cycles end when every control sender is dropped. Either
    /// also ends on [`Self::shutdown`].
    pub async fn join(self) {
        if let Err(e) = self.cycles.await {
            warn!(error = %e, "Cycle task ended abnormally");
        }
        if let Err(e) = self.ingest.await {
            warn!(error = %e, "Ingestion task ended abnormally");
        }
        info!("Pipeline runtime stopped");
    }
}

async fn ingest_frames(
    mut frames: mpsc::Receiver<SampleFrame>,
    conditioner: Arc<Mutex<SignalConditioner>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = conditioner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(&frame);
        if let Err(e) = result {
            warn!(sequence = frame.sequence, error = %e, "Frame rejected");
        }
    }

    let (accepted, rejected) = conditioner
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .frame_counts();
    info!(accepted, rejected, "Frame source closed");
}

struct CycleTask {
    stage: DecisionStage,
    conditioner: Arc<Mutex<SignalConditioner>>,
    clock: SessionClock,
    period: Duration,
    inference_timeout: Duration,
    /// Timed-out model tasks that have not returned yet, by slot
    in_flight: [Option<ModelTask>; 2],
    commands: mpsc::Sender<OutgoingCommand>,
    telemetry: broadcast::Sender<CycleTelemetry>,
}

impl CycleTask {
    async fn run(mut self, mut control: mpsc::Receiver<ControlSignal>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.period);
        // An overrunning cycle delays the next one instead of bunching up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                signal = control.recv() => match signal {
                    Some(ControlSignal::Completed { command, success }) => {
                        self.stage.complete(command, success, self.clock.now_us());
                    }
                    Some(ControlSignal::EmergencyStop) => {
                        let out = self.stage.emergency_stop(self.clock.now_us());
                        self.dispatch(out).await;
                    }
                    None => break,
                },

                _ = ticker.tick() => self.cycle().await,
            }
        }
    }

    async fn cycle(&mut self) {
        let now_us = self.clock.now_us();
        let (snapshot, stale) = {
            let conditioner = self.conditioner.lock().unwrap_or_else(PoisonError::into_inner);
            (conditioner.snapshot(), conditioner.is_stale(now_us))
        };

        let input = match self.stage.extract(&snapshot) {
            Ok(features) => CycleInput::Inferred(self.infer(features).await),
            Err(e) => e.into(),
        };

        let report = self.stage.resolve(now_us, input, stale);
        debug!(cycle = report.cycle, status = ?report.status, "Cycle complete");

        if let Some(out) = report.command {
            self.dispatch(out).await;
        }
        // No subscribers is fine
        let _ = self.telemetry.send(report.telemetry);
    }

    /// Run both models concurrently, each under the inference budget
    async fn infer(&mut self, features: FeatureVector) -> EnsembleOutput {
        let start = Instant::now();
        let timestamp_us = features.timestamp_us;
        let features = Arc::new(features);

        let [coarse, fine] = ModelSlot::ALL.map(|slot| self.launch(slot, &features));
        let budget = self.inference_timeout;
        let ((coarse, coarse_late), (fine, fine_late)) = tokio::join!(
            settle(ModelSlot::Coarse, coarse, budget),
            settle(ModelSlot::Fine, fine, budget)
        );
        for (slot, late) in [(ModelSlot::Coarse, coarse_late), (ModelSlot::Fine, fine_late)] {
            if late.is_some() {
                self.in_flight[slot.index()] = late;
            }
        }

        EnsembleOutput {
            timestamp_us,
            results: [coarse, fine],
            latency_us: start.elapsed().as_micros() as u64,
        }
    }

    /// Start `slot` on the blocking pool unless its last task is still running
    fn launch(&mut self, slot: ModelSlot, features: &Arc<FeatureVector>) -> InferenceResult<ModelTask> {
        if let Some(previous) = self.in_flight[slot.index()].take() {
            if !previous.is_finished() {
                self.in_flight[slot.index()] = Some(previous);
                warn!(slot = %slot, "Model still busy with an earlier cycle, skipping");
                return Err(InferenceError::Busy);
            }
        }

        let ensemble = self.stage.ensemble();
        let features = Arc::clone(features);
        Ok(tokio::task::spawn_blocking(move || ensemble.score(slot, &features.values)))
    }

    async fn dispatch(&self, out: OutgoingCommand) {
        if self.commands.send(out).await.is_err() {
            warn!("Command receiver dropped");
        }
    }
}

/// Wait up to `budget` for one model. A task that overruns is handed back
/// so the next cycle can tell the model is still busy.
async fn settle(
    slot: ModelSlot,
    launched: InferenceResult<ModelTask>,
    budget: Duration,
) -> (InferenceResult<ClassProbabilities>, Option<ModelTask>) {
    let mut task = match launched {
        Ok(task) => task,
        Err(e) => return (Err(e), None),
    };

    match time::timeout(budget, &mut task).await {
        Ok(Ok(result)) => {
            if let Err(e) = &result {
                warn!(slot = %slot, error = %e, "Model produced no vote");
            }
            (result, None)
        }
        Ok(Err(e)) => (Err(InferenceError::TaskFailed { reason: e.to_string() }), None),
        Err(_) => {
            let timeout_ms = budget.as_millis() as u64;
            warn!(slot = %slot, timeout_ms, "Inference missed its budget");
            (Err(InferenceError::Timeout { timeout_ms }), Some(task))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ensemble::{COARSE_LABELS, FINE_LABELS};
    use crate::ml::{Classifier, SoftmaxModel};
    use crate::pipeline::CycleStatus;
    use crate::simulation::SyntheticSource;

    /// Answers uniformly, but only after `delay`
    struct Sleepy {
        labels: Vec<String>,
        delay: Duration,
    }

    impl Classifier for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn labels(&self) -> &[String] {
            &self.labels
        }
        fn input_len(&self) -> usize {
            16
        }
        fn predict(&self, _features: &[f64]) -> InferenceResult<Vec<f64>> {
            std::thread::sleep(self.delay);
            Ok(vec![1.0 / self.labels.len() as f64; self.labels.len()])
        }
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.signal.channels = 4;
        config.signal.active_channels = vec![0, 1, 2, 3];
        config.signal.buffer_secs = 2.0;
        config.signal.window_secs = 1.0;
        config.cycle.cycle_hz = 20.0;
        config.cycle.inference_timeout_ms = 500;
        config
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<CycleTelemetry>,
        pred: impl Fn(&CycleTelemetry) -> bool,
    ) -> CycleTelemetry {
        loop {
            match rx.recv().await {
                Ok(t) if pred(&t) => return t,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("telemetry closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_runtime_warms_up_then_evaluates() {
        let config = config();
        let ensemble = Arc::new(ClassifierEnsemble::synthetic(16).unwrap());
        let (runtime, channels) = PipelineRuntime::spawn(&config, ensemble).unwrap();
        let mut telemetry = channels.telemetry.subscribe();

        let first = time::timeout(Duration::from_secs(5), telemetry.recv()).await.unwrap().unwrap();
        assert!(matches!(first.status, CycleStatus::WarmingUp { have: 0, need: 256 }));

        let mut source = SyntheticSource::new(4, 256.0, 11);
        for _ in 0..300 {
            channels.frames.send(source.next_frame()).await.unwrap();
        }

        let evaluated = time::timeout(
            Duration::from_secs(5),
            next_matching(&mut telemetry, |t| matches!(t.status, CycleStatus::Evaluated { votes: 2 })),
        )
        .await
        .unwrap();
        assert!(evaluated.inference_latency_us.is_some());
        assert_eq!(evaluated.engine.models.len(), 2);

        time::timeout(Duration::from_secs(5), runtime.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_emergency_stop_dispatches() {
        let config = config();
        let ensemble = Arc::new(ClassifierEnsemble::synthetic(16).unwrap());
        let (runtime, mut channels) = PipelineRuntime::spawn(&config, ensemble).unwrap();

        channels.control.send(ControlSignal::EmergencyStop).await.unwrap();
        let out = time::timeout(Duration::from_secs(5), channels.commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.command, FlightCommand::Emergency);
        assert_eq!(out.source_label, "operator");

        // A stray completion is ignored without stopping the task
        channels
            .control
            .send(ControlSignal::Completed { command: FlightCommand::Land, success: true })
            .await
            .unwrap();

        drop(channels.control);
        drop(channels.frames);
        time::timeout(Duration::from_secs(5), runtime.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_model_times_out_alone() {
        let mut config = config();
        config.cycle.inference_timeout_ms = 50;
        let ensemble = ClassifierEnsemble::new(
            Box::new(SoftmaxModel::synthetic("coarse", &COARSE_LABELS, 16, 1)),
            Box::new(Sleepy {
                labels: FINE_LABELS.iter().map(|s| (*s).to_string()).collect(),
                delay: Duration::from_millis(300),
            }),
            16,
        )
        .unwrap();
        let (runtime, channels) = PipelineRuntime::spawn(&config, Arc::new(ensemble)).unwrap();
        let mut telemetry = channels.telemetry.subscribe();

        let mut source = SyntheticSource::new(4, 256.0, 13);
        for _ in 0..300 {
            channels.frames.send(source.next_frame()).await.unwrap();
        }

        // The coarse model still votes while the fine one misses its budget
        let timed_out = time::timeout(
            Duration::from_secs(5),
            next_matching(&mut telemetry, |t| {
                t.status == CycleStatus::Evaluated { votes: 1 }
                    && t.engine.models[0].voted
                    && t.engine.models[1].error.as_deref() == Some("Inference timed out after 50ms")
            }),
        )
        .await
        .unwrap();
        assert!(timed_out.inference_latency_us.unwrap() < 300_000);

        // Ingestion keeps draining the queue meanwhile
        time::timeout(Duration::from_secs(5), async {
            for _ in 0..2_000 {
                channels.frames.send(source.next_frame()).await.unwrap();
            }
        })
        .await
        .unwrap();

        // While the late task runs, the fine slot is skipped instead of stacked
        let busy = time::timeout(
            Duration::from_secs(5),
            next_matching(&mut telemetry, |t| {
                t.engine.models[1].error.as_deref() == Some("Previous inference still running")
            }),
        )
        .await
        .unwrap();
        assert!(busy.engine.models[0].voted);

        time::timeout(Duration::from_secs(5), runtime.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_config() {
        let mut config = config();
        config.cycle.cycle_hz = 0.0;
        let ensemble = Arc::new(ClassifierEnsemble::synthetic(16).unwrap());
        assert!(PipelineRuntime::spawn(&config, ensemble).is_err());
    }
}
