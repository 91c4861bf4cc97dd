//! NeuroPilot BCI Core - `no_std` data model for BCI flight control
//!
//! This crate provides the value types shared by every stage of the
//! decision pipeline: raw sample frames, validated class probabilities,
//! intents, actuator states and outgoing flight commands. It only needs
//! `alloc`, so the same types can be used on a host or on a companion
//! microcontroller.
//!
//! # Modules
//!
//! - [`types`]: Sample frames, actuator states, flight commands, intents
//! - [`probability`]: Validated per-model class probability distributions
//! - [`error`]: Error types for frame and probability validation
//! - [`math`]: Small statistics helpers (mean, variance, softmax)
//!
//! # Features
//!
//! - `std`: Enable standard library support (`std::error::Error` impls)
//!
//! # Example
//!
//! ```rust
//! use neuropilot_core::probability::ClassProbabilities;
//!
//! let probs = ClassProbabilities::new(
//!     vec!["Rest".into(), "Left_Fist".into()],
//!     vec![0.25, 0.75],
//! )
//! .unwrap();
//!
//! assert_eq!(probs.argmax(), Some((1, 0.75)));
//! assert_eq!(probs.get("Rest"), Some(0.25));
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod math;
pub mod probability;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{FrameError, ProbabilityError};
pub use probability::ClassProbabilities;
pub use types::{
    ActuatorState, FlightCommand, Intent, ModelSlot, OutgoingCommand, SampleFrame, TriggerKind,
};
