//! Actuation plans
//!
//! A [`Plan`] is the compiled form of a formula: an ordered list of
//! [`Step`]s (order is a scheduling contract, not insertion order), the
//! ingredients that could not be planned, and aggregate timing. Plans are
//! built once per compile call and read-only during execution.

pub mod compiler;
pub mod transition;

pub use compiler::FormulaCompiler;
pub use transition::TransitionBlender;

use serde::{Deserialize, Serialize};

use crate::config::IntensityPreset;
use crate::formula::NoteType;

/// One planned actuation. Immutable once added to a Plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub channel: u8,
    pub ingredient: String,
    /// Share of the formula this step represents, 0-100.
    pub percentage: f64,
    /// Dispensed volume for liquid steps; `None` for atomizer steps.
    pub volume_ml: Option<f64>,
    /// Executed duration in milliseconds, for both modalities.
    pub duration_ms: u64,
    pub note_type: NoteType,
    pub cas: Option<String>,
}

impl Step {
    /// Activation time in seconds, the atomizer's native unit.
    pub fn duration_s(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// One ingredient the compiler could not plan. Informational only; a skip
/// never aborts plan construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipRecord {
    pub ingredient: String,
    pub percentage: f64,
    pub reason: String,
}

/// Mode-specific compile parameters, kept with the plan for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanParams {
    Liquid { total_volume_ml: f64 },
    Atomizer { intensity: IntensityPreset },
}

/// Compiled, ordered actuation instructions derived from a formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub formula_name: String,
    pub description: String,
    pub steps: Vec<Step>,
    pub skipped: Vec<SkipRecord>,
    /// Step durations plus mode-specific inter-step overhead.
    pub estimated_ms: u64,
    pub params: PlanParams,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of step durations, without inter-step overhead.
    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }
}
