//! Hardware constants, presets, and configuration file loading
//!
//! Values here describe the physical device: pump flow limits, atomizer
//! burst bounds, fan timings, and the safety budgets the scheduler enforces.
//! The channel map and calibration files are consumed (never produced) by
//! this crate; their JSON schemas match what the device tooling already
//! writes.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::formula::NoteType;

// ---------------------------------------------------------------------------
// Liquid dispensing constraints
// ---------------------------------------------------------------------------

/// Below this the pump cannot deliver a controlled amount (10 uL).
pub const MIN_DISPENSE_VOLUME_ML: f64 = 0.01;
/// Maximum single dispense volume.
pub const MAX_DISPENSE_VOLUME_ML: f64 = 50.0;
/// Default output volume when the caller does not specify one.
pub const DEFAULT_TOTAL_VOLUME_ML: f64 = 5.0;
/// Nominal flow rate for a 12 V peristaltic pump with silicone tubing.
pub const DEFAULT_FLOW_RATE_ML_PER_MIN: f64 = 2.5;

/// Minimum pump actuation; shorter bursts are not repeatable.
pub const MIN_PUMP_DURATION_MS: u64 = 50;
/// 5 minutes max continuous run per channel.
pub const MAX_PUMP_DURATION_MS: u64 = 300_000;
/// Delay between sequential pump actuations.
pub const INTER_PUMP_DELAY_MS: u64 = 200;
/// Default line-clearing flush duration.
pub const FLUSH_DURATION_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Atomizer constraints
// ---------------------------------------------------------------------------

pub const MIN_ACTIVATION_TIME_S: f64 = 0.5;
pub const MAX_ACTIVATION_TIME_S: f64 = 10.0;
/// Time for the fan to reach speed before atomizing begins.
pub const FAN_SPIN_UP_DELAY_S: f64 = 0.3;
/// How long to run the fan to clear residual scent from the air.
pub const FAN_CLEAR_DURATION_S: f64 = 15.0;
/// Delay between sequential channel activations.
pub const INTER_CHANNEL_DELAY_S: f64 = 0.1;
/// Minimum time between full dispensing cycles.
pub const COOLDOWN_BETWEEN_RUNS_S: f64 = 5.0;
/// Ceiling on summed activation time across all channels in one run.
pub const MAX_TOTAL_ACTIVATION_S: f64 = 60.0;
/// Power budget: channels active at any instant.
pub const MAX_SIMULTANEOUS_CHANNELS: usize = 8;

// ---------------------------------------------------------------------------
// Transition (crossfade) settings
// ---------------------------------------------------------------------------

/// Number of intermediate blend steps in a transition.
pub const TRANSITION_STEPS: usize = 10;
pub const TRANSITION_PAUSE_S: f64 = 1.0;
/// Brief full-speed fan burst between transition steps.
pub const TRANSITION_FAN_CLEAR_S: f64 = 2.0;
/// Blend contributions below this fraction are dropped as negligible.
pub const MIN_BLEND_CONTRIBUTION: f64 = 0.05;

/// Calibration factors outside this band are suspicious.
pub const CALIBRATION_FACTOR_MIN: f64 = 0.2;
pub const CALIBRATION_FACTOR_MAX: f64 = 2.0;

// ---------------------------------------------------------------------------
// Intensity presets
// ---------------------------------------------------------------------------

/// Named multiplier scaling atomizer activation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntensityPreset {
    /// Barely perceptible; very short bursts.
    Whisper,
    /// Subtle background scent.
    Low,
    /// Comfortable room-filling scent.
    Medium,
    /// Strong, clearly noticeable.
    High,
    /// Full calculated activation time.
    Max,
}

impl IntensityPreset {
    /// Multiplier applied to the calculated activation time.
    pub fn multiplier(self) -> f64 {
        match self {
            IntensityPreset::Whisper => 0.15,
            IntensityPreset::Low => 0.30,
            IntensityPreset::Medium => 0.60,
            IntensityPreset::High => 0.85,
            IntensityPreset::Max => 1.00,
        }
    }

    /// Parse a preset name (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" => Some(IntensityPreset::Whisper),
            "low" => Some(IntensityPreset::Low),
            "medium" => Some(IntensityPreset::Medium),
            "high" => Some(IntensityPreset::High),
            "max" | "full" => Some(IntensityPreset::Max),
            _ => None,
        }
    }

    pub fn all_variants() -> &'static [IntensityPreset] {
        &[
            IntensityPreset::Whisper,
            IntensityPreset::Low,
            IntensityPreset::Medium,
            IntensityPreset::High,
            IntensityPreset::Max,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            IntensityPreset::Whisper => "whisper",
            IntensityPreset::Low => "low",
            IntensityPreset::Medium => "medium",
            IntensityPreset::High => "high",
            IntensityPreset::Max => "max",
        }
    }
}

impl Default for IntensityPreset {
    fn default() -> Self {
        IntensityPreset::Medium
    }
}

impl std::fmt::Display for IntensityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Blend modes
// ---------------------------------------------------------------------------

/// Execution strategy for a plan's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// All channels of a batch activate at once.
    Simultaneous,
    /// Channels activate strictly one after another.
    Sequential,
    /// Base notes first, then heart, then top.
    Layered,
}

impl BlendMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simultaneous" => Some(BlendMode::Simultaneous),
            "sequential" => Some(BlendMode::Sequential),
            "layered" => Some(BlendMode::Layered),
            _ => None,
        }
    }

    /// Parse with fallback: unknown blend modes run as Simultaneous.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| {
            tracing::warn!("unknown blend mode '{}', falling back to simultaneous", s);
            BlendMode::Simultaneous
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Simultaneous => "simultaneous",
            BlendMode::Sequential => "sequential",
            BlendMode::Layered => "layered",
        }
    }
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Simultaneous
    }
}

impl std::fmt::Display for BlendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Calibration policy
// ---------------------------------------------------------------------------

/// What to do when a loaded calibration factor falls outside
/// [[`CALIBRATION_FACTOR_MIN`], [`CALIBRATION_FACTOR_MAX`]].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationPolicy {
    /// Accept silently.
    Ignore,
    /// Accept but log a warning.
    #[default]
    Warn,
    /// Refuse to load the calibration file.
    Reject,
}

// ---------------------------------------------------------------------------
// Channel map file (consumed at the configuration boundary)
// ---------------------------------------------------------------------------

/// One entry of the on-disk channel map.
///
/// Liquid devices carry flow/volume figures; atomizer devices carry
/// activation bounds. Absent fields fall back to the crate defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMapEntry {
    pub channel: u8,
    pub ingredient: String,
    #[serde(default)]
    pub cas: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "noteType")]
    pub note_type: NoteType,
    #[serde(default)]
    pub flow_rate_ml_per_min: Option<f64>,
    #[serde(default)]
    pub max_volume_ml: Option<f64>,
    #[serde(default)]
    pub calibration_factor: Option<f64>,
    #[serde(default)]
    pub min_activation_s: Option<f64>,
    #[serde(default)]
    pub max_activation_s: Option<f64>,
}

/// The on-disk channel map: `{"channels": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMapFile {
    pub channels: Vec<ChannelMapEntry>,
}

impl ChannelMapFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

// ---------------------------------------------------------------------------
// Calibration file (consumed, never produced)
// ---------------------------------------------------------------------------

/// One per-channel calibration record. Only the factor is consumed; the
/// rest is metadata written by the calibration tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub channel: u8,
    #[serde(default)]
    pub ingredient: String,
    pub calibration_factor: f64,
    #[serde(default)]
    pub calibrated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFile {
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    pub channels: Vec<CalibrationEntry>,
}

impl CalibrationFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
