#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The distributed dispatch loop: the Spawner and Prioritizer daemons, child
//! process supervision, and the cooperative shutdown signal shared between
//! them.

pub mod prioritizer;
pub mod sample;
pub mod shutdown;
pub mod spawner;
mod supervise;

#[cfg(test)]
pub mod testutil;

pub use prioritizer::{Prioritizer, PrioritizerOutcome};
pub use sample::DefaultWorkModule;
pub use shutdown::{Shutdown, ShutdownHandle};
pub use spawner::{MessageOutcome, Spawner, StepOutcome};
