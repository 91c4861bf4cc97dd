//! NeuroPilot Application
//!
//! Command-line entry point for the EEG flight-control pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Simulated end-to-end run with demo models for 30 seconds
//! neuropilot run --simulate --demo-models --seconds 30
//!
//! # Replay JSON-lines frames from stdin with trained models
//! neuropilot run --config neuropilot.json --models-dir models/ < session.jsonl
//!
//! # Check model artifacts before a session
//! neuropilot validate-models --config neuropilot.json
//!
//! # Dump the default configuration
//! neuropilot print-config > neuropilot.json
//! ```

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use neuropilot_core::{FlightCommand, OutgoingCommand, SampleFrame};
use neuropilot_native::{
    ClassifierEnsemble, ControlSignal, CycleTelemetry, DecisionPipeline, PipelineConfig, PipelineRuntime,
    RuntimeChannels, SessionClock, SyntheticSource,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulated time the actuator takes to finish a takeoff or landing
const ACK_DELAY: Duration = Duration::from_millis(1_500);

/// NeuroPilot Application
#[derive(Parser, Debug)]
#[command(name = "neuropilot")]
#[command(author, version, about = "EEG motor-imagery flight control", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the decision pipeline
    Run {
        /// JSON configuration file (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding coarse.json and fine.json
        #[arg(long)]
        models_dir: Option<PathBuf>,

        /// Use deterministic demo models instead of artifacts
        #[arg(long)]
        demo_models: bool,

        /// Generate synthetic EEG instead of reading frames from stdin
        #[arg(long)]
        simulate: bool,

        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Print per-cycle telemetry as JSON lines on stdout
        #[arg(long)]
        telemetry: bool,
    },

    /// Load both models and run them on reference features
    ValidateModels {
        /// JSON configuration file (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding coarse.json and fine.json
        #[arg(long)]
        models_dir: Option<PathBuf>,

        /// Use deterministic demo models instead of artifacts
        #[arg(long)]
        demo_models: bool,
    },

    /// Print the configuration as JSON
    PrintConfig {
        /// Print this file after validation instead of the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so telemetry on stdout stays machine-readable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("NeuroPilot v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            config,
            models_dir,
            demo_models,
            simulate,
            seconds,
            telemetry,
        } => {
            let config = load_config(config.as_deref(), models_dir)?;
            let ensemble = load_ensemble(&config, demo_models)?;
            run(config, ensemble, simulate, seconds, telemetry)?;
        }
        Commands::ValidateModels {
            config,
            models_dir,
            demo_models,
        } => {
            let config = load_config(config.as_deref(), models_dir)?;
            let ensemble = load_ensemble(&config, demo_models)?;
            validate_models(&config, ensemble)?;
        }
        Commands::PrintConfig { config } => {
            let config = load_config(config.as_deref(), None)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, models_dir: Option<PathBuf>) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            info!("No config file given, using defaults");
            PipelineConfig::default()
        }
    };
    if let Some(dir) = models_dir {
        config.models.coarse_path = dir.join("coarse.json");
        config.models.fine_path = dir.join("fine.json");
    }
    Ok(config)
}

fn load_ensemble(config: &PipelineConfig, demo: bool) -> anyhow::Result<Arc<ClassifierEnsemble>> {
    let feature_len = config.features.layout.feature_len(config.signal.active_channels.len());
    let ensemble = if demo {
        warn!("Using demo models; predictions are not meaningful");
        ClassifierEnsemble::synthetic(feature_len)?
    } else {
        ClassifierEnsemble::load(&config.models, feature_len).with_context(|| {
            format!(
                "loading models {} and {}",
                config.models.coarse_path.display(),
                config.models.fine_path.display()
            )
        })?
    };
    Ok(Arc::new(ensemble))
}

fn validate_models(config: &PipelineConfig, ensemble: Arc<ClassifierEnsemble>) -> anyhow::Result<()> {
    let pipeline = DecisionPipeline::new(config, ensemble)?;
    let report = pipeline.validate_models();
    println!("{}", serde_json::to_string_pretty(&report)?);

    let failed = report.iter().filter(|v| v.predicted.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} models failed validation", report.len());
    }
    info!("All models validated");
    Ok(())
}

/// Run the async pipeline until the time limit or Ctrl-C
fn run(
    config: PipelineConfig,
    ensemble: Arc<ClassifierEnsemble>,
    simulate: bool,
    seconds: Option<u64>,
    telemetry: bool,
) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let (runtime, channels) = PipelineRuntime::spawn(&config, ensemble)?;
        let RuntimeChannels {
            frames,
            control,
            commands,
            telemetry: telemetry_tx,
            clock,
        } = channels;

        let source = if simulate {
            info!("Frame source: synthetic EEG");
            tokio::spawn(simulate_frames(frames, config.signal.channels, config.signal.sample_rate_hz, clock))
        } else {
            info!("Frame source: JSON lines on stdin");
            tokio::task::spawn_blocking(move || replay_stdin(&frames, clock))
        };
        let dispatcher = tokio::spawn(dispatch_commands(commands, control.clone()));
        let reporter = tokio::spawn(report_telemetry(telemetry_tx.subscribe(), telemetry));

        let limit = async {
            match seconds {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("Interrupted, stopping");
            }
            () = limit => info!("Run time elapsed, stopping"),
        }

        source.abort();
        runtime.shutdown().await;
        drop(control);
        drop(telemetry_tx);
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "Dispatcher ended abnormally");
        }
        if let Err(e) = reporter.await {
            warn!(error = %e, "Telemetry reporter ended abnormally");
        }
        anyhow::Ok(())
    });

    // A stdin reader blocked on input must not hold the process open
    rt.shutdown_timeout(Duration::from_millis(500));
    result
}

/// Feed synthetic frames in real time, alternating rest and imagery
async fn simulate_frames(frames: mpsc::Sender<SampleFrame>, channels: usize, sample_rate_hz: f64, clock: SessionClock) {
    let mut source = SyntheticSource::new(channels, sample_rate_hz, 7);
    let mut ticker = tokio::time::interval(Duration::from_millis(20));

    loop {
        ticker.tick().await;
        let now_us = clock.now_us();

        // Mu desynchronises for 4 s out of every 10 s
        let imagery = (now_us / 1_000_000) % 10 >= 6;
        source.set_mu_amplitude(if imagery { 2.0 } else { 10.0 });

        while source.next_timestamp_us() <= now_us {
            if frames.send(source.next_frame()).await.is_err() {
                return;
            }
        }
    }
}

/// Replay frames from stdin, paced by their timestamps
fn replay_stdin(frames: &mpsc::Sender<SampleFrame>, clock: SessionClock) {
    let stdin = std::io::stdin();
    let mut offset_us = None;

    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: SampleFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping unparseable frame");
                continue;
            }
        };

        // Align the first frame with now, then keep the recorded spacing
        let offset = *offset_us.get_or_insert_with(|| clock.now_us().saturating_sub(frame.timestamp_us));
        let due_us = frame.timestamp_us + offset;
        let now_us = clock.now_us();
        if due_us > now_us {
            std::thread::sleep(Duration::from_micros(due_us - now_us));
        }

        let frame = SampleFrame::new(due_us, frame.sequence, frame.channels);
        if frames.blocking_send(frame).is_err() {
            break;
        }
    }
    info!("Stdin frame source finished");
}

/// Log commands and acknowledge takeoff/land after a delay
async fn dispatch_commands(mut commands: mpsc::Receiver<OutgoingCommand>, control: mpsc::Sender<ControlSignal>) {
    while let Some(out) = commands.recv().await {
        info!(
            command = %out.command,
            label = %out.source_label,
            magnitude = ?out.magnitude,
            "Dispatching command"
        );

        if matches!(out.command, FlightCommand::Takeoff | FlightCommand::Land) {
            let control = control.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ACK_DELAY).await;
                let signal = ControlSignal::Completed { command: out.command, success: true };
                if control.send(signal).await.is_err() {
                    debug!(command = %out.command, "Pipeline stopped before completion");
                }
            });
        }
    }
}

async fn report_telemetry(mut rx: broadcast::Receiver<CycleTelemetry>, print: bool) {
    loop {
        match rx.recv().await {
            Ok(t) => {
                if print {
                    match serde_json::to_string(&t) {
                        Ok(json) => println!("{json}"),
                        Err(e) => warn!(error = %e, "Failed to serialize telemetry"),
                    }
                }
                if let Some(intent) = &t.intent {
                    info!(cycle = t.cycle, label = %intent.label, kind = %intent.kind, state = %t.actuator_state, "Intent");
                } else {
                    debug!(cycle = t.cycle, status = ?t.status, stale = t.stale, "Cycle");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Telemetry reporter lagged, dropped {} cycles", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
