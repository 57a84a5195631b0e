//! Actuator and fan capabilities
//!
//! The scheduler only ever sees these traits. Real GPIO or PWM backends
//! live outside this crate and implement the same two interfaces; the
//! simulated backends here carry atomic state so tests can observe what
//! the hardware would have done.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

/// One channel's on/off control.
///
/// `set_active(false)` must be safe to call at any time, including when
/// the channel is already off; the emergency-stop path relies on it.
pub trait ChannelActuator: Send + Sync {
    fn set_active(&self, active: bool);
    fn is_active(&self) -> bool;
}

/// The scent-projection fan.
pub trait Fan: Send + Sync {
    /// Set fan speed as a duty cycle in [0.0, 1.0]; 0 is off.
    fn set_speed(&self, speed: f32);
    fn off(&self);
    fn is_on(&self) -> bool;
}

/// Shared instantaneous-activity counter for simulated channels.
///
/// Tracks how many channels are on right now and the highest count ever
/// observed, so tests can check the concurrency budget.
#[derive(Debug, Default)]
pub struct ActiveCounter {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

impl ActiveCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(ActiveCounter::default())
    }

    fn increment(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn decrement(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active channels observed.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// In-memory actuator; state changes are logged, not wired.
pub struct SimulatedActuator {
    channel: u8,
    active: AtomicBool,
    counter: Option<Arc<ActiveCounter>>,
}

impl SimulatedActuator {
    pub fn new(channel: u8) -> Self {
        SimulatedActuator {
            channel,
            active: AtomicBool::new(false),
            counter: None,
        }
    }

    /// Attach a shared counter that tracks instantaneous activity.
    pub fn with_counter(channel: u8, counter: Arc<ActiveCounter>) -> Self {
        SimulatedActuator {
            channel,
            active: AtomicBool::new(false),
            counter: Some(counter),
        }
    }
}

impl ChannelActuator for SimulatedActuator {
    fn set_active(&self, active: bool) {
        let was = self.active.swap(active, Ordering::SeqCst);
        if was == active {
            return;
        }
        debug!(channel = self.channel, active, "simulated channel state");
        if let Some(counter) = &self.counter {
            if active {
                counter.increment();
            } else {
                counter.decrement();
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// In-memory fan; speed stored as f32 bits.
#[derive(Default)]
pub struct SimulatedFan {
    speed_bits: AtomicU32,
}

impl SimulatedFan {
    pub fn new() -> Self {
        SimulatedFan::default()
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::SeqCst))
    }
}

impl Fan for SimulatedFan {
    fn set_speed(&self, speed: f32) {
        let clamped = speed.clamp(0.0, 1.0);
        debug!(speed = clamped, "simulated fan speed");
        self.speed_bits.store(clamped.to_bits(), Ordering::SeqCst);
    }

    fn off(&self) {
        self.set_speed(0.0);
    }

    fn is_on(&self) -> bool {
        self.speed() > 0.0
    }
}

/// Build a bank of simulated actuators sharing one activity counter.
pub fn simulated_bank(
    channel_ids: impl IntoIterator<Item = u8>,
    counter: Arc<ActiveCounter>,
) -> BTreeMap<u8, Arc<dyn ChannelActuator>> {
    channel_ids
        .into_iter()
        .map(|id| {
            let actuator: Arc<dyn ChannelActuator> =
                Arc::new(SimulatedActuator::with_counter(id, Arc::clone(&counter)));
            (id, actuator)
        })
        .collect()
}
