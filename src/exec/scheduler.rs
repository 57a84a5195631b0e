//! Actuation scheduling
//!
//! Executes an atomization plan against the channel actuators and the fan.
//! Each channel activation runs as its own tokio task that races its
//! duration sleep against the shared stop signal, so an emergency stop
//! cuts every in-flight activation immediately instead of waiting out its
//! sleep. The scheduler is the only component that starts activations;
//! callers never drive channels directly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{
    BlendMode, COOLDOWN_BETWEEN_RUNS_S, FAN_CLEAR_DURATION_S, FAN_SPIN_UP_DELAY_S,
    INTER_CHANNEL_DELAY_S, MAX_SIMULTANEOUS_CHANNELS,
};
use crate::error::Result;
use crate::exec::actuator::{ChannelActuator, Fan};
use crate::formula::NoteType;
use crate::plan::{Plan, Step};

/// How far beyond a step's own duration a join will wait before declaring
/// the activation stuck.
const JOIN_MARGIN: Duration = Duration::from_secs(5);

/// Outcome of one execute() call. Execution failures are outcomes, not
/// errors; `Err` is reserved for invalid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step ran its full duration.
    Completed,
    /// The plan had no steps.
    NothingToDo,
    /// Emergency stop or an actuation failure cut the run short.
    Aborted,
    /// Another run was already in flight on this scheduler.
    Busy,
}

/// Timing and safety knobs, defaulted from the hardware constants.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum time between full dispensing cycles.
    pub cooldown: Duration,
    /// Fan duty cycle during a run.
    pub fan_speed: f32,
    pub fan_spin_up: Duration,
    /// How long the fan keeps pushing after the last activation.
    pub fan_linger: Duration,
    pub inter_channel_delay: Duration,
    /// Channels active at any instant (power budget).
    pub max_simultaneous: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            cooldown: Duration::from_secs_f64(COOLDOWN_BETWEEN_RUNS_S),
            fan_speed: 0.7,
            fan_spin_up: Duration::from_secs_f64(FAN_SPIN_UP_DELAY_S),
            fan_linger: Duration::from_secs(1),
            inter_channel_delay: Duration::from_secs_f64(INTER_CHANNEL_DELAY_S),
            max_simultaneous: MAX_SIMULTANEOUS_CHANNELS,
        }
    }
}

/// Executes plans against a bank of channel actuators and a fan.
pub struct ActuationScheduler {
    actuators: BTreeMap<u8, Arc<dyn ChannelActuator>>,
    fan: Arc<dyn Fan>,
    cfg: SchedulerConfig,
    stop_tx: watch::Sender<bool>,
    running: AtomicBool,
    last_run: Mutex<Option<Instant>>,
}

impl ActuationScheduler {
    pub fn new(
        actuators: BTreeMap<u8, Arc<dyn ChannelActuator>>,
        fan: Arc<dyn Fan>,
        cfg: SchedulerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        ActuationScheduler {
            actuators,
            fan,
            cfg,
            stop_tx,
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute a plan with the given blend mode.
    ///
    /// Blocks through the cooldown window if the previous run finished
    /// recently. An empty plan is a no-op outcome, not an error. Only one
    /// run may be in flight per scheduler; a call during another run is
    /// `Busy`. Whatever happens, every channel and the fan are off when
    /// this returns.
    pub async fn execute(&self, plan: &Plan, mode: BlendMode) -> Result<RunOutcome> {
        if plan.is_empty() {
            warn!(formula = %plan.formula_name, "no steps in plan, nothing to do");
            return Ok(RunOutcome::NothingToDo);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(formula = %plan.formula_name, "a run is already in flight, refusing");
            return Ok(RunOutcome::Busy);
        }

        self.wait_cooldown().await;

        // Clear any stop left over from a previous abort.
        self.stop_tx.send_replace(false);

        info!(
            formula = %plan.formula_name,
            steps = plan.steps.len(),
            %mode,
            "starting run"
        );

        self.fan.set_speed(self.cfg.fan_speed);
        sleep(self.cfg.fan_spin_up).await;

        let completed = match mode {
            BlendMode::Simultaneous => self.run_simultaneous(plan).await,
            BlendMode::Sequential => self.run_sequential(plan).await,
            BlendMode::Layered => self.run_layered(plan).await,
        };

        if completed {
            sleep(self.cfg.fan_linger).await;
        }
        self.all_off();

        self.running.store(false, Ordering::SeqCst);
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        if completed {
            info!(formula = %plan.formula_name, "run completed");
            Ok(RunOutcome::Completed)
        } else {
            warn!(formula = %plan.formula_name, "run aborted");
            Ok(RunOutcome::Aborted)
        }
    }

    /// Immediately stop everything.
    ///
    /// Broadcasts the stop signal to in-flight activations and forces all
    /// actuators and the fan off out-of-band, so a stuck task cannot keep
    /// a channel powered. Safe to call from any thread while a run is in
    /// progress.
    pub fn emergency_stop(&self) {
        warn!("EMERGENCY STOP: turning off all channels and fan");
        self.stop_tx.send_replace(true);
        self.all_off();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the fan at full speed to clear residual scent from the air.
    pub async fn clear_air(&self) {
        info!(duration_s = FAN_CLEAR_DURATION_S, "clearing air");
        self.fan.set_speed(1.0);
        sleep(Duration::from_secs_f64(FAN_CLEAR_DURATION_S)).await;
        self.fan.off();
    }

    async fn wait_cooldown(&self) {
        let last = *self.last_run.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.cfg.cooldown {
                let wait = self.cfg.cooldown - elapsed;
                info!(wait_s = wait.as_secs_f64(), "cooldown before next run");
                sleep(wait).await;
            }
        }
    }

    fn all_off(&self) {
        for actuator in self.actuators.values() {
            actuator.set_active(false);
        }
        self.fan.off();
    }

    /// Spawn one channel activation. The task holds the channel on until
    /// its duration elapses or the stop signal fires, and always turns the
    /// channel off on the way out. Returns true if the full duration ran.
    fn spawn_activation(
        &self,
        actuator: Arc<dyn ChannelActuator>,
        channel: u8,
        duration: Duration,
    ) -> JoinHandle<bool> {
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            if *stop_rx.borrow() {
                return false;
            }
            actuator.set_active(true);
            debug!(channel, duration_ms = duration.as_millis() as u64, "channel on");
            let completed = tokio::select! {
                _ = sleep(duration) => true,
                _ = stop_rx.wait_for(|stopped| *stopped) => false,
            };
            actuator.set_active(false);
            debug!(channel, completed, "channel off");
            completed
        })
    }

    /// Start every step of a batch concurrently and join them all with a
    /// per-step timeout margin. False if any activation was stopped,
    /// failed, or timed out its join.
    async fn run_batch(&self, steps: &[&Step]) -> bool {
        let mut handles = Vec::with_capacity(steps.len());
        for step in steps {
            match self.actuators.get(&step.channel) {
                Some(actuator) => handles.push((
                    *step,
                    self.spawn_activation(
                        Arc::clone(actuator),
                        step.channel,
                        Duration::from_millis(step.duration_ms),
                    ),
                )),
                None => {
                    warn!(
                        channel = step.channel,
                        ingredient = %step.ingredient,
                        "channel not initialized, skipping"
                    );
                }
            }
        }

        let mut ok = true;
        for (step, handle) in handles {
            let margin = Duration::from_millis(step.duration_ms) + JOIN_MARGIN;
            match timeout(margin, handle).await {
                Ok(Ok(completed)) => ok &= completed,
                Ok(Err(join_err)) => {
                    error!(channel = step.channel, %join_err, "activation task failed");
                    ok = false;
                }
                Err(_) => {
                    error!(channel = step.channel, "activation join timed out");
                    ok = false;
                }
            }
        }
        ok
    }

    async fn run_simultaneous(&self, plan: &Plan) -> bool {
        info!(channels = plan.steps.len(), "blend mode: simultaneous");
        let batches: Vec<Vec<&Step>> = plan
            .steps
            .chunks(self.cfg.max_simultaneous)
            .map(|c| c.iter().collect())
            .collect();
        let total = batches.len();
        for (idx, batch) in batches.iter().enumerate() {
            if total > 1 {
                info!(batch = idx + 1, of = total, channels = batch.len(), "batch");
            }
            if !self.run_batch(batch).await {
                return false;
            }
            if idx + 1 < total {
                sleep(self.cfg.inter_channel_delay).await;
            }
        }
        true
    }

    async fn run_sequential(&self, plan: &Plan) -> bool {
        info!(channels = plan.steps.len(), "blend mode: sequential");
        for (idx, step) in plan.steps.iter().enumerate() {
            debug!(
                step = idx + 1,
                of = plan.steps.len(),
                ingredient = %step.ingredient,
                channel = step.channel,
                "sequential step"
            );
            if !self.run_batch(&[step]).await {
                return false;
            }
            sleep(self.cfg.inter_channel_delay).await;
        }
        true
    }

    async fn run_layered(&self, plan: &Plan) -> bool {
        info!("blend mode: layered (base -> heart -> top)");
        let mut layers: [Vec<&Step>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for step in &plan.steps {
            let idx = match step.note_type {
                NoteType::Base => 0,
                NoteType::Top => 2,
                // Heart, carrier, and untagged all diffuse mid-run.
                _ => 1,
            };
            layers[idx].push(step);
        }

        let mut first = true;
        for (layer, name) in layers.iter().zip(["base", "heart", "top"]) {
            if layer.is_empty() {
                continue;
            }
            if !first {
                sleep(self.cfg.inter_channel_delay * 3).await;
            }
            first = false;
            info!(layer = name, channels = layer.len(), "layer");
            // Layers respect the power budget too.
            for batch in layer.chunks(self.cfg.max_simultaneous) {
                if !self.run_batch(batch).await {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntensityPreset;
    use crate::exec::actuator::{simulated_bank, ActiveCounter, SimulatedFan};
    use crate::plan::PlanParams;

    fn step(channel: u8, duration_ms: u64, note_type: NoteType) -> Step {
        Step {
            channel,
            ingredient: format!("ch{}", channel),
            percentage: 10.0,
            volume_ml: None,
            duration_ms,
            note_type,
            cas: None,
        }
    }

    fn plan(steps: Vec<Step>) -> Plan {
        let mut p = Plan {
            formula_name: "test".to_string(),
            description: String::new(),
            steps,
            skipped: Vec::new(),
            estimated_ms: 0,
            params: PlanParams::Atomizer {
                intensity: IntensityPreset::Medium,
            },
        };
        p.estimated_ms = p.total_duration_ms();
        p
    }

    fn scheduler(ids: std::ops::Range<u8>) -> (ActuationScheduler, Arc<ActiveCounter>, Arc<SimulatedFan>) {
        let counter = ActiveCounter::new();
        let fan = Arc::new(SimulatedFan::new());
        let sched = ActuationScheduler::new(
            simulated_bank(ids, Arc::clone(&counter)),
            fan.clone() as Arc<dyn Fan>,
            SchedulerConfig::default(),
        );
        (sched, counter, fan)
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plan_is_nothing_to_do() {
        let (sched, _, fan) = scheduler(0..4);
        let outcome = sched
            .execute(&plan(vec![]), BlendMode::Simultaneous)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::NothingToDo);
        assert!(!fan.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_completes_and_cleans_up() {
        let (sched, counter, fan) = scheduler(0..4);
        let p = plan(vec![
            step(0, 1000, NoteType::Top),
            step(1, 2000, NoteType::Heart),
            step(2, 500, NoteType::Base),
        ]);
        let outcome = sched.execute(&p, BlendMode::Simultaneous).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.high_water(), 3);
        assert!(!fan.is_on());
        assert!(!sched.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_never_overlaps() {
        let (sched, counter, _) = scheduler(0..4);
        let p = plan(vec![
            step(0, 800, NoteType::Base),
            step(1, 800, NoteType::Heart),
            step(2, 800, NoteType::Top),
        ]);
        let outcome = sched.execute(&p, BlendMode::Sequential).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(counter.high_water(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_budget_respected() {
        let (sched, counter, _) = scheduler(0..16);
        let steps: Vec<Step> = (0..16).map(|i| step(i, 1000, NoteType::Heart)).collect();
        let outcome = sched
            .execute(&plan(steps), BlendMode::Simultaneous)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(counter.high_water() <= MAX_SIMULTANEOUS_CHANNELS);
        assert_eq!(counter.high_water(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_layered_budget_within_layer() {
        let (sched, counter, _) = scheduler(0..16);
        // 10 base steps force sub-batching inside the layer.
        let mut steps: Vec<Step> = (0..10).map(|i| step(i, 500, NoteType::Base)).collect();
        steps.push(step(10, 500, NoteType::Top));
        let outcome = sched.execute(&plan(steps), BlendMode::Layered).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(counter.high_water() <= MAX_SIMULTANEOUS_CHANNELS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_aborts_run() {
        let (sched, counter, fan) = scheduler(0..4);
        let sched = Arc::new(sched);
        let p = plan(vec![
            step(0, 60_000, NoteType::Heart),
            step(1, 60_000, NoteType::Heart),
        ]);

        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.execute(&p, BlendMode::Simultaneous).await })
        };

        // Let the run spin up and turn channels on.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sched.is_running());
        assert_eq!(counter.current(), 2);

        sched.emergency_stop();
        let outcome = runner.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Aborted);
        assert_eq!(counter.current(), 0);
        assert!(!fan.is_on());
        assert!(!sched.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_execute_is_busy() {
        let (sched, counter, _) = scheduler(0..16);
        let sched = Arc::new(sched);
        let first: Vec<Step> = (0..8).map(|i| step(i, 2000, NoteType::Heart)).collect();
        let second: Vec<Step> = (8..16).map(|i| step(i, 2000, NoteType::Heart)).collect();

        let runner = {
            let sched = Arc::clone(&sched);
            let p = plan(first);
            tokio::spawn(async move { sched.execute(&p, BlendMode::Simultaneous).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sched.is_running());

        // Second run must be refused while the first holds the bank.
        let outcome = sched
            .execute(&plan(second), BlendMode::Simultaneous)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Busy);

        assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Completed);
        assert!(counter.high_water() <= MAX_SIMULTANEOUS_CHANNELS);
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_delays_second_run() {
        let (sched, _, _) = scheduler(0..4);
        let p = plan(vec![step(0, 100, NoteType::Heart)]);

        sched.execute(&p, BlendMode::Sequential).await.unwrap();
        let before = Instant::now();
        sched.execute(&p, BlendMode::Sequential).await.unwrap();
        // Second run must have waited out the 5 s cooldown.
        assert!(before.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_channel_is_skipped_not_fatal() {
        let (sched, _, _) = scheduler(0..2);
        let p = plan(vec![
            step(0, 300, NoteType::Heart),
            step(9, 300, NoteType::Heart),
        ]);
        let outcome = sched.execute(&p, BlendMode::Simultaneous).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_air_cycles_fan() {
        let (sched, _, fan) = scheduler(0..1);
        let handle = {
            let fan = fan.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                fan.is_on()
            })
        };
        sched.clear_air().await;
        assert!(handle.await.unwrap());
        assert!(!fan.is_on());
    }
}
