//! Actuator control
//!
//! - [`cooldown`]: Per-command cooldown durations and registry
//! - [`mapper`]: Intent to flight-command state machine

pub mod cooldown;
pub mod mapper;

pub use cooldown::{CooldownRegistry, CooldownTable};
pub use mapper::{CommandBinding, CommandMapper, CommandOutcome, DropReason, MapperConfig, SafetyConfig};
