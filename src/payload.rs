//! Accord-channel command payload
//!
//! The portable six-cartridge device does not take per-ingredient plans;
//! it takes a blend of six pre-mixed accords (Floral, Woody, Fresh, Warm,
//! Sweet, Clean). This module folds a formula's ingredient categories into
//! those six channels and serializes the JSON command the device firmware
//! accepts over BLE or HTTP. Transport internals live outside this crate;
//! only the payload shape is owned here.

use serde::{Deserialize, Serialize};

use crate::formula::Formula;

/// Normalized intensity of the dominant accord.
pub const MAX_INTENSITY: u8 = 100;
/// Default diffusion duration per accord.
pub const DEFAULT_BLEND_DURATION_S: u32 = 30;

/// Static definition of one accord channel.
#[derive(Debug, Clone)]
pub struct AccordDefinition {
    pub id: u8,
    pub name: &'static str,
    /// Ingredient categories folded into this accord.
    pub categories: &'static [&'static str],
}

/// The six accord channels, in device channel order.
pub const ACCORD_DEFINITIONS: [AccordDefinition; 6] = [
    AccordDefinition {
        id: 0,
        name: "Floral",
        categories: &["floral", "powdery"],
    },
    AccordDefinition {
        id: 1,
        name: "Woody",
        categories: &["woody", "earthy", "smoky"],
    },
    AccordDefinition {
        id: 2,
        name: "Fresh",
        categories: &["citrus", "green", "aquatic", "aromatic"],
    },
    AccordDefinition {
        id: 3,
        name: "Warm",
        categories: &["oriental", "amber", "balsamic", "spicy"],
    },
    AccordDefinition {
        id: 4,
        name: "Sweet",
        categories: &["gourmand", "fruity"],
    },
    AccordDefinition {
        id: 5,
        name: "Clean",
        categories: &["musk", "fresh", "herbal"],
    },
];

/// Map an ingredient category to its accord channel.
///
/// Leather and animalic notes fold into Woody; anything unrecognized
/// defaults to Clean.
pub fn accord_for_category(category: &str) -> u8 {
    let cat = category.trim().to_lowercase();
    for def in &ACCORD_DEFINITIONS {
        if def.categories.contains(&cat.as_str()) {
            return def.id;
        }
    }
    match cat.as_str() {
        "leather" | "animalic" => 1,
        _ => 5,
    }
}

/// One accord channel with its computed intensity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccordChannel {
    pub id: u8,
    pub name: String,
    pub raw_percentage: f64,
    /// 0-100, normalized so the dominant accord reads 100.
    pub intensity: u8,
    pub contributing_ingredients: Vec<String>,
}

/// Complete six-channel blend derived from a formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccordBlend {
    pub formula_name: String,
    pub accords: Vec<AccordChannel>,
    pub total_ingredient_percentage: f64,
    pub dominant_accord: String,
}

impl AccordBlend {
    /// Fold a formula onto the six accord channels.
    ///
    /// Percentages sum per accord; carriers and solvents contribute
    /// nothing. Intensities normalize so the dominant accord is 100 and
    /// the rest scale proportionally.
    pub fn from_formula(formula: &Formula) -> AccordBlend {
        let mut percentages = [0.0f64; 6];
        let mut contributors: [Vec<String>; 6] = Default::default();
        let mut total_pct = 0.0;

        for ingredient in formula.aroma_ingredients() {
            if ingredient.percentage <= 0.0 {
                continue;
            }
            let id = accord_for_category(&ingredient.category) as usize;
            percentages[id] += ingredient.percentage;
            contributors[id].push(ingredient.name.clone());
            total_pct += ingredient.percentage;
        }

        let mut max_pct = percentages.iter().cloned().fold(0.0, f64::max);
        if max_pct <= 0.0 {
            max_pct = 1.0;
        }

        let mut dominant = String::new();
        let mut accords = Vec::with_capacity(6);
        for (def, (raw_pct, names)) in ACCORD_DEFINITIONS
            .iter()
            .zip(percentages.iter().zip(contributors.iter()))
        {
            let intensity = ((raw_pct / max_pct) * MAX_INTENSITY as f64).round() as u8;
            if *raw_pct == max_pct && *raw_pct > 0.0 {
                dominant = def.name.to_string();
            }
            accords.push(AccordChannel {
                id: def.id,
                name: def.name.to_string(),
                raw_percentage: *raw_pct,
                intensity,
                contributing_ingredients: names.clone(),
            });
        }

        AccordBlend {
            formula_name: formula.name.clone(),
            accords,
            total_ingredient_percentage: total_pct,
            dominant_accord: dominant,
        }
    }

    /// The device command for this blend.
    ///
    /// Only accords with intensity > 0 are included; the firmware leaves
    /// unlisted channels untouched.
    pub fn to_command(&self, duration_s: u32) -> ScentCommand {
        let duration_ms = duration_s * 1000;
        ScentCommand {
            accords: self
                .accords
                .iter()
                .filter(|a| a.intensity > 0)
                .map(|a| AccordEntry {
                    id: a.id,
                    intensity: a.intensity,
                    duration_ms,
                })
                .collect(),
        }
    }
}

/// One entry of the wire command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccordEntry {
    pub id: u8,
    pub intensity: u8,
    pub duration_ms: u32,
}

/// The JSON body written to the BLE scent-command characteristic or
/// POSTed to the device's blend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScentCommand {
    pub accords: Vec<AccordEntry>,
}

impl ScentCommand {
    /// Compact JSON, as the firmware parser expects.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"accords":[]}"#.to_string())
    }

    /// The stop command: every channel listed at zero intensity and zero
    /// duration.
    pub fn stop() -> ScentCommand {
        ScentCommand {
            accords: ACCORD_DEFINITIONS
                .iter()
                .map(|def| AccordEntry {
                    id: def.id,
                    intensity: 0,
                    duration_ms: 0,
                })
                .collect(),
        }
    }
}
