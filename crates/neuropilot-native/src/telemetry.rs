//! Read-only per-cycle telemetry
//!
//! Everything a dashboard needs to render one decision cycle. These types
//! are plain serializable snapshots; nothing here holds references into the
//! live pipeline.

use neuropilot_core::{ActuatorState, Intent, ModelSlot};
use serde::Serialize;

use crate::control::CommandOutcome;
use crate::decision::ClassStatistics;
use crate::pipeline::CycleStatus;

/// Trigger tracker state for one class
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSnapshot {
    /// Sustained trigger
    Sustained {
        /// `accumulated / required` in `[0, 1]`
        progress: f64,
        /// Qualifying cycles in the consistency window
        consistent: usize,
        /// Accumulated duration (ms)
        accumulated_ms: u64,
        /// Fired and waiting for a reset
        latched: bool,
    },
    /// Instant trigger
    Instant {
        /// Dropped below the release threshold since the last firing
        was_released: bool,
        /// Cooldown left (ms)
        cooldown_remaining_ms: u64,
    },
    /// Spike trigger
    Spike {
        /// Spike condition held this cycle
        active: bool,
        /// Refractory interval left (ms)
        refractory_remaining_ms: u64,
    },
}

/// One class of one model
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassSnapshot {
    /// Class label
    pub label: String,
    /// Latest raw probability
    pub raw: Option<f64>,
    /// Smoothed probability
    pub smoothed: Option<f64>,
    /// History statistics
    pub stats: ClassStatistics,
    /// Raw value above `mean + k·std` this cycle
    pub spike: bool,
    /// Trigger state, for configured classes
    pub trigger: Option<TriggerSnapshot>,
}

/// One model's view for this cycle
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelSnapshot {
    /// Ensemble slot
    pub slot: ModelSlot,
    /// Produced a valid distribution this cycle
    pub voted: bool,
    /// Why it did not vote
    pub error: Option<String>,
    /// Most likely class this cycle
    pub argmax: Option<String>,
    /// Argmax flipping between classes
    pub jittering: bool,
    /// Per-class detail, in model output order
    pub classes: Vec<ClassSnapshot>,
}

/// Decision engine state across both models
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EngineSnapshot {
    /// Coarse then fine
    pub models: Vec<ModelSnapshot>,
}

impl EngineSnapshot {
    /// Labels currently flagged as spiking, as `slot/label`
    #[must_use]
    pub fn active_spikes(&self) -> Vec<String> {
        self.models
            .iter()
            .flat_map(|m| {
                m.classes
                    .iter()
                    .filter(|c| c.spike)
                    .map(move |c| format!("{}/{}", m.slot, c.label))
            })
            .collect()
    }

    /// Snapshot of a class by slot and label
    #[must_use]
    pub fn class(&self, slot: ModelSlot, label: &str) -> Option<&ClassSnapshot> {
        self.models
            .iter()
            .find(|m| m.slot == slot)
            .and_then(|m| m.classes.iter().find(|c| c.label == label))
    }
}

/// Continuous yaw state after a cycle
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContinuousSnapshot {
    /// Smoothed velocity, positive clockwise
    pub velocity: f64,
    /// Velocity as a yaw rate in percent
    pub yaw_percent: i32,
    /// Decayed spike sum of the left class
    pub left_intensity: f64,
    /// Decayed spike sum of the right class
    pub right_intensity: f64,
    /// Spikes still inside the window
    pub live_spikes: usize,
}

/// Everything observable about one decision cycle
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleTelemetry {
    /// Cycle counter since start
    pub cycle: u64,
    /// Cycle timestamp
    pub timestamp_us: u64,
    /// How the cycle ended
    pub status: CycleStatus,
    /// No frame arrived recently
    pub stale: bool,
    /// Engine state after this cycle
    pub engine: EngineSnapshot,
    /// `slot/label` of classes spiking this cycle
    pub active_spikes: Vec<String>,
    /// Intent decided this cycle
    pub intent: Option<Intent>,
    /// Actuator state after this cycle
    pub actuator_state: ActuatorState,
    /// Time airborne (ms), if flying
    pub flight_time_ms: Option<u64>,
    /// Last emitted or dropped command
    pub last_outcome: Option<CommandOutcome>,
    /// Inference latency (µs)
    pub inference_latency_us: Option<u64>,
    /// Continuous yaw state, when enabled
    pub continuous: Option<ContinuousSnapshot>,
}
