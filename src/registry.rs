//! Channel registry: ingredient identity to physical channel
//!
//! The registry owns the channel table and answers one question for the
//! compiler: which channel dispenses this ingredient, and under what
//! constraints. Resolution is read-only; the single mutation path is
//! [`ChannelRegistry::apply_calibration`], which runs before a dispensing
//! cycle, never during one.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::{
    CalibrationFile, CalibrationPolicy, ChannelMapEntry, ChannelMapFile,
    CALIBRATION_FACTOR_MAX, CALIBRATION_FACTOR_MIN, DEFAULT_FLOW_RATE_ML_PER_MIN,
    MAX_ACTIVATION_TIME_S, MAX_DISPENSE_VOLUME_ML, MIN_ACTIVATION_TIME_S,
};
use crate::error::{Error, Result};
use crate::formula::NoteType;

/// Physical constraints of one channel, by actuation modality.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelConstraints {
    /// Metered liquid pump.
    Pump {
        flow_rate_ml_per_min: f64,
        max_volume_ml: f64,
        /// Multiplicative correction from calibration; 1.0 = nominal.
        calibration_factor: f64,
    },
    /// Piezo atomizer burst bounds.
    Atomizer {
        min_activation_s: f64,
        max_activation_s: f64,
    },
}

/// One physical actuation unit and its bound ingredient.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u8,
    pub ingredient: String,
    pub cas: String,
    pub category: String,
    pub note_type: NoteType,
    pub constraints: ChannelConstraints,
}

impl Channel {
    /// Calibration-adjusted flow rate, for pump channels only.
    pub fn effective_flow_rate(&self) -> Option<f64> {
        match self.constraints {
            ChannelConstraints::Pump {
                flow_rate_ml_per_min,
                calibration_factor,
                ..
            } => Some(flow_rate_ml_per_min * calibration_factor),
            ChannelConstraints::Atomizer { .. } => None,
        }
    }
}

/// Lookup table from ingredient name to channel.
///
/// Channels are held in id order so that substring fallback resolution is
/// deterministic: the lowest-numbered matching channel always wins.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<u8, Channel>,
}

impl ChannelRegistry {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        ChannelRegistry {
            channels: channels.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    /// Build a registry of pump channels from a loaded channel map file.
    pub fn from_pump_map(map: &ChannelMapFile) -> Self {
        Self::new(map.channels.iter().map(|e| pump_channel(e)))
    }

    /// Build a registry of atomizer channels from a loaded channel map file.
    pub fn from_atomizer_map(map: &ChannelMapFile) -> Self {
        Self::new(map.channels.iter().map(|e| atomizer_channel(e)))
    }

    /// The built-in 16-channel pump palette, used when no map file exists.
    /// Channels 0-2 are carrier solvents; the rest are common aroma
    /// materials.
    pub fn default_pump_palette() -> Self {
        let entries: &[(u8, &str, &str, &str, f64, f64)] = &[
            (0, "Ethanol (denatured)", "64-17-5", "carrier", 5.0, 50.0),
            (1, "Dipropylene Glycol (DPG)", "25265-71-8", "carrier", 3.0, 30.0),
            (2, "Isopropyl Myristate (IPM)", "110-27-0", "carrier", 2.5, 10.0),
            (3, "Bergamot Oil", "8007-75-8", "citrus", 2.5, 5.0),
            (4, "Linalool", "78-70-6", "fresh-floral", 2.5, 5.0),
            (5, "Hedione", "24851-98-7", "fresh-floral", 2.5, 10.0),
            (6, "Rose Absolute", "8007-01-0", "floral", 2.0, 3.0),
            (7, "Jasmine Absolute", "8022-96-6", "floral", 2.0, 3.0),
            (8, "Iso E Super", "54464-57-2", "woody", 2.5, 10.0),
            (9, "Cedarwood Oil (Atlas)", "8000-27-9", "woody", 2.5, 8.0),
            (10, "Sandalwood Oil", "8006-87-9", "woody", 2.0, 5.0),
            (11, "Vanillin", "121-33-5", "gourmand", 2.0, 5.0),
            (12, "Ambroxan", "6790-58-5", "amber", 2.5, 8.0),
            (13, "Galaxolide", "1222-05-5", "musk", 2.5, 8.0),
            (14, "Patchouli Oil", "8014-09-3", "woody-earthy", 2.0, 5.0),
            (15, "Dihydromyrcenol", "18479-58-8", "fresh", 2.5, 8.0),
        ];
        Self::new(entries.iter().map(|&(id, ing, cas, cat, flow, max)| Channel {
            id,
            ingredient: ing.to_string(),
            cas: cas.to_string(),
            category: cat.to_string(),
            note_type: if cat == "carrier" {
                NoteType::Carrier
            } else {
                NoteType::Unknown
            },
            constraints: ChannelConstraints::Pump {
                flow_rate_ml_per_min: flow,
                max_volume_ml: max,
                calibration_factor: 1.0,
            },
        }))
    }

    /// The built-in 16-channel atomizer palette: pre-diluted materials in
    /// 10 ml reservoirs, tagged by note type for layered execution.
    pub fn default_atomizer_palette() -> Self {
        let entries: &[(u8, &str, &str, &str, NoteType)] = &[
            (0, "Bergamot Oil", "8007-75-8", "citrus", NoteType::Top),
            (1, "Linalool", "78-70-6", "fresh-floral", NoteType::Top),
            (2, "Dihydromyrcenol", "18479-58-8", "fresh", NoteType::Top),
            (3, "Hedione", "24851-98-7", "fresh-floral", NoteType::Heart),
            (4, "Rose Absolute", "8007-01-0", "floral", NoteType::Heart),
            (5, "Jasmine Absolute", "8022-96-6", "floral", NoteType::Heart),
            (6, "Geranium Oil", "8000-46-2", "floral-green", NoteType::Heart),
            (7, "Lavender Oil", "8000-28-0", "aromatic", NoteType::Heart),
            (8, "Iso E Super", "54464-57-2", "woody", NoteType::Base),
            (9, "Cedarwood Oil (Atlas)", "8000-27-9", "woody", NoteType::Base),
            (10, "Sandalwood Oil", "8006-87-9", "woody", NoteType::Base),
            (11, "Patchouli Oil", "8014-09-3", "earthy", NoteType::Base),
            (12, "Vanillin", "121-33-5", "gourmand", NoteType::Base),
            (13, "Ambroxan", "6790-58-5", "amber", NoteType::Base),
            (14, "Galaxolide", "1222-05-5", "musk", NoteType::Base),
            (15, "Frankincense Oil", "8016-36-2", "balsamic", NoteType::Base),
        ];
        Self::new(entries.iter().map(|&(id, ing, cas, cat, note)| Channel {
            id,
            ingredient: ing.to_string(),
            cas: cas.to_string(),
            category: cat.to_string(),
            note_type: note,
            constraints: ChannelConstraints::Atomizer {
                min_activation_s: MIN_ACTIVATION_TIME_S,
                max_activation_s: MAX_ACTIVATION_TIME_S,
            },
        }))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: u8) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Ingredient names in the registry, sorted.
    pub fn ingredient_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.values().map(|c| c.ingredient.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve an ingredient name to a channel.
    ///
    /// Exact case-insensitive match first; failing that, a case-insensitive
    /// substring match in either direction ("Bergamot" finds "Bergamot Oil"
    /// and vice versa). First match in channel-id order wins. `None` means
    /// the caller records a skip; resolution itself never fails.
    pub fn resolve(&self, name: &str) -> Option<&Channel> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(ch) = self
            .channels
            .values()
            .find(|c| c.ingredient.to_lowercase() == needle)
        {
            return Some(ch);
        }
        self.channels.values().find(|c| {
            let bound = c.ingredient.to_lowercase();
            bound.contains(&needle) || needle.contains(&bound)
        })
    }

    /// Apply loaded calibration factors to pump channels.
    ///
    /// This is the registry's only mutation path. Factors outside
    /// [[`CALIBRATION_FACTOR_MIN`], [`CALIBRATION_FACTOR_MAX`]] are handled
    /// per the supplied policy. Entries naming unknown channels are logged
    /// and skipped; atomizer channels have no flow rate to correct.
    pub fn apply_calibration(
        &mut self,
        cal: &CalibrationFile,
        policy: CalibrationPolicy,
    ) -> Result<()> {
        for entry in &cal.channels {
            let factor = entry.calibration_factor;
            let out_of_range =
                !(CALIBRATION_FACTOR_MIN..=CALIBRATION_FACTOR_MAX).contains(&factor);
            if out_of_range {
                match policy {
                    CalibrationPolicy::Ignore => {}
                    CalibrationPolicy::Warn => warn!(
                        channel = entry.channel,
                        factor, "calibration factor outside expected range"
                    ),
                    CalibrationPolicy::Reject => {
                        return Err(Error::Calibration(format!(
                            "channel {} factor {:.3} outside [{:.1}, {:.1}]",
                            entry.channel, factor, CALIBRATION_FACTOR_MIN, CALIBRATION_FACTOR_MAX
                        )));
                    }
                }
            }
            match self.channels.get_mut(&entry.channel) {
                Some(Channel {
                    constraints: ChannelConstraints::Pump { calibration_factor, .. },
                    ..
                }) => {
                    *calibration_factor = factor;
                    info!(channel = entry.channel, factor, "applied calibration factor");
                }
                Some(_) => {
                    warn!(channel = entry.channel, "calibration entry for non-pump channel, ignored");
                }
                None => {
                    warn!(channel = entry.channel, "calibration entry for unknown channel, ignored");
                }
            }
        }
        Ok(())
    }
}

fn pump_channel(e: &ChannelMapEntry) -> Channel {
    Channel {
        id: e.channel,
        ingredient: e.ingredient.clone(),
        cas: e.cas.clone(),
        category: e.category.clone(),
        note_type: e.note_type,
        constraints: ChannelConstraints::Pump {
            flow_rate_ml_per_min: e.flow_rate_ml_per_min.unwrap_or(DEFAULT_FLOW_RATE_ML_PER_MIN),
            max_volume_ml: e.max_volume_ml.unwrap_or(MAX_DISPENSE_VOLUME_ML),
            calibration_factor: e.calibration_factor.unwrap_or(1.0),
        },
    }
}

fn atomizer_channel(e: &ChannelMapEntry) -> Channel {
    Channel {
        id: e.channel,
        ingredient: e.ingredient.clone(),
        cas: e.cas.clone(),
        category: e.category.clone(),
        note_type: e.note_type,
        constraints: ChannelConstraints::Atomizer {
            min_activation_s: e.min_activation_s.unwrap_or(MIN_ACTIVATION_TIME_S),
            max_activation_s: e.max_activation_s.unwrap_or(MAX_ACTIVATION_TIME_S),
        },
    }
}
