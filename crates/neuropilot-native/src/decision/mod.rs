//! Temporal decision engine
//!
//! - [`history`]: Bounded per-class probability history and statistics
//! - [`triggers`]: Sustained, instant and spike trigger state machines
//! - [`arbitration`]: Pure one-intent-per-cycle selection
//! - [`engine`]: Ties the above together per decision cycle
//! - [`continuous`]: Spike-driven yaw rate while flying

pub mod arbitration;
pub mod continuous;
pub mod engine;
pub mod history;
pub mod triggers;

pub use arbitration::{arbitrate, ArbitrationCandidate};
pub use continuous::{ContinuousConfig, ContinuousController, SpikeEvent, YawSide};
pub use engine::{ClassRule, EngineConfig, TemporalDecisionEngine};
pub use history::ClassStatistics;
pub use triggers::{ClassTrigger, TriggerRule};
