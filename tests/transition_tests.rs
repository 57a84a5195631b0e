//! Integration tests for scent-to-scent transitions
//!
//! Builds crossfade series from real formulas and checks the ramp shape,
//! then runs a full series through the scheduler to prove every
//! intermediate plan is executable under the normal safety budgets.

use std::sync::Arc;

use scentctl::config::{BlendMode, IntensityPreset, TRANSITION_STEPS};
use scentctl::exec::{
    simulated_bank, ActiveCounter, ActuationScheduler, Fan, RunOutcome, SchedulerConfig,
    SimulatedFan,
};
use scentctl::plan::TransitionBlender;
use scentctl::{ChannelRegistry, Formula};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn formula(json: &str) -> Formula {
    init_tracing();
    Formula::from_json(json).unwrap()
}

fn citrus() -> Formula {
    formula(
        r#"{"name": "Morning Citrus", "ingredients": [
            {"name": "Bergamot Oil", "percentage": 55.0, "noteType": "top"},
            {"name": "Linalool", "percentage": 30.0, "noteType": "top"},
            {"name": "Hedione", "percentage": 15.0, "noteType": "heart"}
        ]}"#,
    )
}

fn evening_woods() -> Formula {
    formula(
        r#"{"name": "Evening Woods", "ingredients": [
            {"name": "Sandalwood Oil", "percentage": 45.0, "noteType": "base"},
            {"name": "Cedarwood Oil (Atlas)", "percentage": 35.0, "noteType": "base"},
            {"name": "Hedione", "percentage": 20.0, "noteType": "heart"}
        ]}"#,
    )
}

#[test]
fn default_step_count_yields_eleven_plans() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plans = TransitionBlender::new(&registry)
        .crossfade(&citrus(), &evening_woods(), TRANSITION_STEPS, IntensityPreset::Medium)
        .unwrap();
    assert_eq!(plans.len(), TRANSITION_STEPS + 1);
    assert!(plans[0].formula_name.contains("Morning Citrus"));
    assert!(plans[0].formula_name.contains("Evening Woods"));
}

#[test]
fn old_ramp_falls_and_new_ramp_rises() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plans = TransitionBlender::new(&registry)
        .crossfade(&citrus(), &evening_woods(), 10, IntensityPreset::Max)
        .unwrap();

    // Bergamot (channel 0) belongs only to the outgoing formula and
    // Sandalwood (channel 10) only to the incoming one.
    let duration_of = |plan: &scentctl::Plan, channel: u8| {
        plan.steps
            .iter()
            .find(|s| s.channel == channel)
            .map(|s| s.duration_ms)
            .unwrap_or(0)
    };

    let mut prev_old = u64::MAX;
    let mut prev_new = 0u64;
    for plan in &plans {
        let old = duration_of(plan, 0);
        let new = duration_of(plan, 10);
        assert!(old <= prev_old, "outgoing channel must never get louder");
        assert!(new >= prev_new, "incoming channel must never get quieter");
        prev_old = old;
        prev_new = new;
    }
    assert_eq!(duration_of(&plans[10], 0), 0);
    assert!(duration_of(&plans[10], 10) > 0);
}

#[test]
fn shared_ingredient_never_drops_out() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plans = TransitionBlender::new(&registry)
        .crossfade(&citrus(), &evening_woods(), 10, IntensityPreset::Max)
        .unwrap();

    // Hedione (channel 3) appears in both formulas; its merged duration
    // must stay above the activation floor in every intermediate plan.
    for plan in &plans {
        let hedione = plan.steps.iter().find(|s| s.channel == 3);
        assert!(
            hedione.is_some(),
            "shared channel missing in {}",
            plan.formula_name
        );
        assert!(hedione.unwrap().duration_ms >= 500);
    }
}

#[tokio::test(start_paused = true)]
async fn full_transition_series_is_executable() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plans = TransitionBlender::new(&registry)
        .crossfade(&citrus(), &evening_woods(), 4, IntensityPreset::Low)
        .unwrap();

    let counter = ActiveCounter::new();
    let fan = Arc::new(SimulatedFan::new());
    let scheduler = ActuationScheduler::new(
        simulated_bank(0..16, Arc::clone(&counter)),
        fan.clone() as Arc<dyn Fan>,
        SchedulerConfig::default(),
    );

    for plan in &plans {
        let outcome = scheduler.execute(plan, BlendMode::Simultaneous).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed, "failed at {}", plan.formula_name);
        assert_eq!(counter.current(), 0);
    }
    assert!(!fan.is_on());
}
