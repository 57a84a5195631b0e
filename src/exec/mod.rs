//! Plan execution
//!
//! Two execution backends consume compiled plans: the
//! [`ActuationScheduler`] drives directly-attached atomizer channels
//! through capability traits, and the [`SerialDispenser`] drives a pump
//! controller board over a wire transport.

pub mod actuator;
pub mod dispenser;
pub mod scheduler;

pub use actuator::{
    simulated_bank, ActiveCounter, ChannelActuator, Fan, SimulatedActuator, SimulatedFan,
};
pub use dispenser::{SerialDispenser, SimulatedTransport, Transport};
pub use scheduler::{ActuationScheduler, RunOutcome, SchedulerConfig};
