//! Crossfade transitions between two scent profiles
//!
//! A transition is a series of intermediate plans that ramp the old
//! formula's activation times down while ramping the new formula's up.
//! Channels shared by both formulas merge additively, so an ingredient
//! common to old and new never flickers off mid-transition.

use tracing::info;

use crate::config::{IntensityPreset, MIN_ACTIVATION_TIME_S, MIN_BLEND_CONTRIBUTION};
use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::plan::{FormulaCompiler, Plan, PlanParams, Step};
use crate::registry::ChannelRegistry;

/// Composes two compiled plans into a linear crossfade series.
pub struct TransitionBlender<'a> {
    compiler: FormulaCompiler<'a>,
}

impl<'a> TransitionBlender<'a> {
    pub fn new(registry: &'a ChannelRegistry) -> Self {
        TransitionBlender {
            compiler: FormulaCompiler::new(registry),
        }
    }

    /// Build the `steps + 1` plans of a crossfade from `from` to `to`.
    ///
    /// Plan 0 is 100% old / 0% new and plan `steps` is 0% old / 100% new;
    /// both formulas are compiled exactly once. `steps` must be at least 1.
    pub fn crossfade(
        &self,
        from: &Formula,
        to: &Formula,
        steps: usize,
        intensity: IntensityPreset,
    ) -> Result<Vec<Plan>> {
        if steps == 0 {
            return Err(Error::Transition(
                "transition requires at least one step".to_string(),
            ));
        }

        let plan_from = self.compiler.compile_atomizer(from, intensity);
        let plan_to = self.compiler.compile_atomizer(to, intensity);

        info!(
            from = %plan_from.formula_name,
            to = %plan_to.formula_name,
            steps,
            "building transition"
        );

        let mut plans = Vec::with_capacity(steps + 1);
        for i in 0..=steps {
            let blend_to = i as f64 / steps as f64;
            let blend_from = 1.0 - blend_to;
            plans.push(Self::blend(&plan_from, &plan_to, blend_from, blend_to, i, steps, intensity));
        }
        Ok(plans)
    }

    fn blend(
        plan_from: &Plan,
        plan_to: &Plan,
        blend_from: f64,
        blend_to: f64,
        index: usize,
        steps: usize,
        intensity: IntensityPreset,
    ) -> Plan {
        let mut merged: Vec<Step> = Vec::new();

        if blend_from > MIN_BLEND_CONTRIBUTION {
            for step in &plan_from.steps {
                merged.push(scaled(step, blend_from));
            }
        }

        if blend_to > MIN_BLEND_CONTRIBUTION {
            for step in &plan_to.steps {
                match merged.iter_mut().find(|s| s.channel == step.channel) {
                    // Shared channel: activation times combine.
                    Some(existing) => {
                        existing.duration_ms +=
                            (step.duration_ms as f64 * blend_to).round() as u64;
                    }
                    None => merged.push(scaled(step, blend_to)),
                }
            }
        }

        let min_ms = (MIN_ACTIVATION_TIME_S * 1000.0) as u64;
        merged.retain(|s| s.duration_ms >= min_ms);

        let mut plan = Plan {
            formula_name: format!(
                "Transition {}/{}: {} -> {}",
                index, steps, plan_from.formula_name, plan_to.formula_name
            ),
            description: format!(
                "Crossfade step {}/{} ({:.0}% old, {:.0}% new)",
                index,
                steps,
                blend_from * 100.0,
                blend_to * 100.0
            ),
            steps: merged,
            skipped: Vec::new(),
            estimated_ms: 0,
            params: PlanParams::Atomizer { intensity },
        };
        plan.estimated_ms = plan.total_duration_ms();
        plan
    }
}

fn scaled(step: &Step, factor: f64) -> Step {
    Step {
        channel: step.channel,
        ingredient: step.ingredient.clone(),
        percentage: step.percentage * factor,
        volume_ml: None,
        duration_ms: (step.duration_ms as f64 * factor).round() as u64,
        note_type: step.note_type,
        cas: step.cas.clone(),
    }
}
