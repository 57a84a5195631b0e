//! Integration tests for plan execution on the atomizer bank
//!
//! The scheduler's unit tests drive hand-built plans; these run plans
//! produced by the compiler from real formulas, so compilation ordering,
//! clamping, and the scheduler's batching are tested together.

use std::sync::Arc;
use std::time::Duration;

use scentctl::config::{BlendMode, IntensityPreset};
use scentctl::exec::{
    simulated_bank, ActiveCounter, ActuationScheduler, Fan, RunOutcome, SchedulerConfig,
    SimulatedFan,
};
use scentctl::plan::FormulaCompiler;
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

fn atomizer_scheduler() -> (ActuationScheduler, Arc<ActiveCounter>, Arc<SimulatedFan>) {
    init_tracing();
    let counter = ActiveCounter::new();
    let fan = Arc::new(SimulatedFan::new());
    let scheduler = ActuationScheduler::new(
        simulated_bank(0..16, Arc::clone(&counter)),
        fan.clone() as Arc<dyn Fan>,
        SchedulerConfig::default(),
    );
    (scheduler, counter, fan)
}

fn formula(json: &str) -> Formula {
    Formula::from_json(json).unwrap()
}

#[tokio::test(start_paused = true)]
async fn compiled_plan_runs_to_completion() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let compiler = FormulaCompiler::new(&registry);
    let plan = compiler.compile_atomizer(
        &formula(
            r#"{"name": "Garden", "ingredients": [
                {"name": "Rose Absolute", "percentage": 50.0, "noteType": "heart"},
                {"name": "Bergamot Oil", "percentage": 30.0, "noteType": "top"},
                {"name": "Sandalwood Oil", "percentage": 20.0, "noteType": "base"}
            ]}"#,
        ),
        IntensityPreset::Medium,
    );
    assert_eq!(plan.steps.len(), 3);

    let (scheduler, counter, fan) = atomizer_scheduler();
    let outcome = scheduler.execute(&plan, BlendMode::Simultaneous).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(counter.current(), 0);
    assert_eq!(counter.high_water(), 3);
    assert!(!fan.is_on());
}

#[tokio::test(start_paused = true)]
async fn sixteen_channel_formula_stays_under_power_budget() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let names: Vec<String> = registry
        .channels()
        .map(|c| format!(r#"{{"name": "{}", "percentage": 6.25}}"#, c.ingredient))
        .collect();
    let json = format!(
        r#"{{"name": "Everything", "ingredients": [{}]}}"#,
        names.join(",")
    );
    let plan = FormulaCompiler::new(&registry).compile_atomizer(&formula(&json), IntensityPreset::High);
    assert_eq!(plan.steps.len(), 16);

    let (scheduler, counter, _) = atomizer_scheduler();
    let outcome = scheduler.execute(&plan, BlendMode::Simultaneous).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(counter.high_water(), 8);
    assert_eq!(counter.current(), 0);
}

#[tokio::test(start_paused = true)]
async fn sequential_mode_runs_one_channel_at_a_time() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plan = FormulaCompiler::new(&registry).compile_atomizer(
        &formula(
            r#"{"name": "Duo", "ingredients": [
                {"name": "Linalool", "percentage": 60.0, "noteType": "top"},
                {"name": "Vanillin", "percentage": 40.0, "noteType": "base"}
            ]}"#,
        ),
        IntensityPreset::Low,
    );

    let (scheduler, counter, _) = atomizer_scheduler();
    let outcome = scheduler.execute(&plan, BlendMode::Sequential).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(counter.high_water(), 1);
}

#[tokio::test(start_paused = true)]
async fn layered_mode_handles_all_three_ranks() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plan = FormulaCompiler::new(&registry).compile_atomizer(
        &formula(
            r#"{"name": "Pyramid", "ingredients": [
                {"name": "Bergamot Oil", "percentage": 30.0, "noteType": "top"},
                {"name": "Dihydromyrcenol", "percentage": 10.0, "noteType": "top"},
                {"name": "Rose Absolute", "percentage": 25.0, "noteType": "heart"},
                {"name": "Jasmine Absolute", "percentage": 15.0, "noteType": "heart"},
                {"name": "Sandalwood Oil", "percentage": 12.0, "noteType": "base"},
                {"name": "Ambroxan", "percentage": 8.0, "noteType": "base"}
            ]}"#,
        ),
        IntensityPreset::Medium,
    );
    assert_eq!(plan.steps.len(), 6);

    let (scheduler, counter, _) = atomizer_scheduler();
    let outcome = scheduler.execute(&plan, BlendMode::Layered).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    // Within any layer at most two channels run together here.
    assert!(counter.high_water() <= 2);
    assert_eq!(counter.current(), 0);
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_cuts_a_compiled_run_short() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plan = FormulaCompiler::new(&registry).compile_atomizer(
        &formula(
            r#"{"name": "Long", "ingredients": [
                {"name": "Rose Absolute", "percentage": 50.0, "noteType": "heart"},
                {"name": "Sandalwood Oil", "percentage": 50.0, "noteType": "base"}
            ]}"#,
        ),
        IntensityPreset::Max,
    );
    // Both steps run the full 10 s window.
    assert!(plan.steps.iter().all(|s| s.duration_ms == 10_000));

    let (scheduler, counter, _) = atomizer_scheduler();
    let scheduler = Arc::new(scheduler);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.execute(&plan, BlendMode::Simultaneous).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.current(), 2);
    scheduler.emergency_stop();

    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Aborted);
    assert_eq!(counter.current(), 0);
}

#[tokio::test(start_paused = true)]
async fn carrier_only_formula_does_nothing() {
    let registry = ChannelRegistry::default_atomizer_palette();
    let plan = FormulaCompiler::new(&registry).compile_atomizer(
        &formula(
            r#"{"name": "Blank", "ingredients": [
                {"name": "Ethanol", "percentage": 100.0, "noteType": "carrier"}
            ]}"#,
        ),
        IntensityPreset::Medium,
    );

    let (scheduler, counter, fan) = atomizer_scheduler();
    let outcome = scheduler.execute(&plan, BlendMode::Layered).await.unwrap();
    assert_eq!(outcome, RunOutcome::NothingToDo);
    assert_eq!(counter.high_water(), 0);
    assert!(!fan.is_on());
}
