//! scentctl - control core for multi-channel scent dispensing hardware
//!
//! Converts a percentage-based scent formula into a timed sequence of
//! physical actuations and carries them to the device. Two actuation
//! modalities share one pipeline:
//!
//! - metered liquid dispensing, where pump duration is proportional to
//!   desired volume over channel flow rate, executed over an
//!   error-checked serial protocol;
//! - piezo atomizer activation, where burst duration is proportional to
//!   relative concentration times an intensity preset, executed directly
//!   through actuator capabilities under concurrency and power budgets.
//!
//! The flow is formula -> [`plan::FormulaCompiler`] -> [`plan::Plan`] ->
//! [`exec::ActuationScheduler`] or [`exec::SerialDispenser`] -> hardware.
//! [`plan::TransitionBlender`] composes two plans into a crossfade series,
//! and [`payload`] maps formulas onto the portable device's six accord
//! cartridges.

pub mod config;
pub mod error;
pub mod exec;
pub mod formula;
pub mod payload;
pub mod plan;
pub mod protocol;
pub mod registry;

pub use config::{BlendMode, CalibrationPolicy, IntensityPreset};
pub use error::{Error, Result};
pub use exec::{ActuationScheduler, RunOutcome, SerialDispenser};
pub use formula::{Formula, Ingredient, NoteType};
pub use plan::{FormulaCompiler, Plan, Step, TransitionBlender};
pub use registry::{Channel, ChannelRegistry};
