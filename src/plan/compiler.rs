//! Formula compilation
//!
//! Turns a declarative formula into an ordered [`Plan`] for one of the two
//! actuation modalities. Every per-ingredient problem becomes a
//! [`SkipRecord`]; compilation itself only fails for structurally invalid
//! input, which the formula ingestion layer already rejects. An empty
//! resulting plan is a valid outcome and the caller's problem.

use tracing::{debug, warn};

use crate::config::{
    IntensityPreset, INTER_PUMP_DELAY_MS, MAX_ACTIVATION_TIME_S, MAX_PUMP_DURATION_MS,
    MAX_TOTAL_ACTIVATION_S, MIN_ACTIVATION_TIME_S, MIN_DISPENSE_VOLUME_ML, MIN_PUMP_DURATION_MS,
};
use crate::formula::{Formula, Ingredient, NoteType};
use crate::plan::{Plan, PlanParams, SkipRecord, Step};
use crate::registry::{ChannelConstraints, ChannelRegistry};

/// Compiles formulas into actuation plans against a channel registry.
///
/// Holds the registry by reference; resolution never mutates it.
pub struct FormulaCompiler<'a> {
    registry: &'a ChannelRegistry,
}

impl<'a> FormulaCompiler<'a> {
    pub fn new(registry: &'a ChannelRegistry) -> Self {
        FormulaCompiler { registry }
    }

    /// Compile a liquid dispensing plan targeting `total_volume_ml` of
    /// finished product.
    ///
    /// The carrier, if present, joins the ingredient list as a synthetic
    /// carrier-note entry so it dispenses through the same path. Steps are
    /// ordered carriers first, then base, heart, top, longest runs leading
    /// within each rank.
    pub fn compile_liquid(&self, formula: &Formula, total_volume_ml: f64) -> Plan {
        let mut plan = Plan {
            formula_name: formula.name.clone(),
            description: formula.description.clone(),
            steps: Vec::new(),
            skipped: Vec::new(),
            estimated_ms: 0,
            params: PlanParams::Liquid { total_volume_ml },
        };

        let mut items: Vec<Ingredient> = formula.ingredients.clone();
        if let Some(carrier) = &formula.carrier {
            items.push(Ingredient {
                name: carrier.name.clone(),
                percentage: carrier.percentage,
                category: "carrier".to_string(),
                note_type: NoteType::Carrier,
                cas: carrier.cas.clone(),
            });
        }

        for item in &items {
            if item.percentage <= 0.0 {
                continue;
            }

            let volume_ml = (item.percentage / 100.0) * total_volume_ml;

            if volume_ml < MIN_DISPENSE_VOLUME_ML {
                plan.skipped.push(SkipRecord {
                    ingredient: item.name.clone(),
                    percentage: item.percentage,
                    reason: format!(
                        "Volume too small ({:.4} ml < {} ml minimum)",
                        volume_ml, MIN_DISPENSE_VOLUME_ML
                    ),
                });
                continue;
            }

            let channel = match self.registry.resolve(&item.name) {
                Some(ch) => ch,
                None => {
                    plan.skipped.push(SkipRecord {
                        ingredient: item.name.clone(),
                        percentage: item.percentage,
                        reason: "No pump channel assigned for this ingredient".to_string(),
                    });
                    continue;
                }
            };

            let max_volume_ml = match channel.constraints {
                ChannelConstraints::Pump { max_volume_ml, .. } => max_volume_ml,
                ChannelConstraints::Atomizer { .. } => {
                    plan.skipped.push(SkipRecord {
                        ingredient: item.name.clone(),
                        percentage: item.percentage,
                        reason: format!("Channel {} is not a pump channel", channel.id),
                    });
                    continue;
                }
            };

            if volume_ml > max_volume_ml {
                plan.skipped.push(SkipRecord {
                    ingredient: item.name.clone(),
                    percentage: item.percentage,
                    reason: format!(
                        "Requested volume ({:.2} ml) exceeds channel max ({} ml)",
                        volume_ml, max_volume_ml
                    ),
                });
                continue;
            }

            let flow_rate = channel.effective_flow_rate().unwrap_or(0.0);
            if flow_rate <= 0.0 {
                plan.skipped.push(SkipRecord {
                    ingredient: item.name.clone(),
                    percentage: item.percentage,
                    reason: "Channel has zero or negative flow rate".to_string(),
                });
                continue;
            }

            let raw_ms = (volume_ml / flow_rate * 60_000.0).round();
            let mut duration_ms = raw_ms as u64;
            if duration_ms < MIN_PUMP_DURATION_MS {
                duration_ms = MIN_PUMP_DURATION_MS;
            }
            if duration_ms > MAX_PUMP_DURATION_MS {
                warn!(
                    ingredient = %item.name,
                    from_ms = duration_ms,
                    to_ms = MAX_PUMP_DURATION_MS,
                    "pump duration clamped to ceiling"
                );
                duration_ms = MAX_PUMP_DURATION_MS;
            }

            plan.steps.push(Step {
                channel: channel.id,
                ingredient: item.name.clone(),
                percentage: item.percentage,
                volume_ml: Some(volume_ml),
                duration_ms,
                note_type: item.note_type,
                cas: item.cas.clone(),
            });
        }

        plan.steps.sort_by(|a, b| {
            a.note_type
                .liquid_rank()
                .cmp(&b.note_type.liquid_rank())
                .then(b.duration_ms.cmp(&a.duration_ms))
        });

        plan.estimated_ms = plan.total_duration_ms()
            + INTER_PUMP_DELAY_MS * plan.steps.len().saturating_sub(1) as u64;

        debug!(
            formula = %plan.formula_name,
            steps = plan.steps.len(),
            skipped = plan.skipped.len(),
            estimated_ms = plan.estimated_ms,
            "compiled liquid plan"
        );
        plan
    }

    /// Compile an atomization plan at the given intensity preset.
    ///
    /// Activation time is proportional to the ingredient's share of the
    /// formula: the highest-percentage ingredient gets the full activation
    /// window scaled by intensity, the rest proportionally less. Carriers
    /// and solvents never atomize.
    pub fn compile_atomizer(&self, formula: &Formula, intensity: IntensityPreset) -> Plan {
        let mut plan = Plan {
            formula_name: formula.name.clone(),
            description: formula.description.clone(),
            steps: Vec::new(),
            skipped: Vec::new(),
            estimated_ms: 0,
            params: PlanParams::Atomizer { intensity },
        };

        let aroma: Vec<&Ingredient> = formula.aroma_ingredients().collect();
        if aroma.is_empty() {
            warn!(formula = %plan.formula_name, "no aroma ingredients in formula (only carrier)");
            return plan;
        }

        let mut max_pct = aroma
            .iter()
            .map(|i| i.percentage)
            .fold(f64::NEG_INFINITY, f64::max);
        if max_pct <= 0.0 {
            max_pct = 1.0;
        }

        for item in aroma {
            if item.percentage <= 0.0 {
                continue;
            }

            let channel = match self.registry.resolve(&item.name) {
                Some(ch) => ch,
                None => {
                    plan.skipped.push(SkipRecord {
                        ingredient: item.name.clone(),
                        percentage: item.percentage,
                        reason: "No atomizer channel assigned for this ingredient".to_string(),
                    });
                    continue;
                }
            };

            let (min_s, max_s) = match channel.constraints {
                ChannelConstraints::Atomizer {
                    min_activation_s,
                    max_activation_s,
                } => (min_activation_s, max_activation_s),
                ChannelConstraints::Pump { .. } => {
                    (MIN_ACTIVATION_TIME_S, MAX_ACTIVATION_TIME_S)
                }
            };

            let normalized = item.percentage / max_pct;
            let activation_s = (normalized * MAX_ACTIVATION_TIME_S * intensity.multiplier())
                .clamp(min_s, max_s);

            plan.steps.push(Step {
                channel: channel.id,
                ingredient: item.name.clone(),
                percentage: item.percentage,
                volume_ml: None,
                duration_ms: (activation_s * 1000.0).round() as u64,
                note_type: item.note_type,
                cas: item.cas.clone(),
            });
        }

        plan.steps.sort_by(|a, b| {
            a.note_type
                .atomizer_rank()
                .cmp(&b.note_type.atomizer_rank())
                .then(b.duration_ms.cmp(&a.duration_ms))
        });

        // Total-activation ceiling: rescale uniformly, never drop steps.
        let ceiling_ms = (MAX_TOTAL_ACTIVATION_S * 1000.0) as u64;
        let total_ms = plan.total_duration_ms();
        if total_ms > ceiling_ms {
            let scale = ceiling_ms as f64 / total_ms as f64;
            for step in &mut plan.steps {
                step.duration_ms = (step.duration_ms as f64 * scale).floor() as u64;
            }
            warn!(
                formula = %plan.formula_name,
                scale,
                "total activation time exceeded limit, rescaled all durations"
            );
        }

        plan.estimated_ms = plan.total_duration_ms();

        debug!(
            formula = %plan.formula_name,
            steps = plan.steps.len(),
            skipped = plan.skipped.len(),
            estimated_ms = plan.estimated_ms,
            "compiled atomizer plan"
        );
        plan
    }
}
