//! Cloud agent library.
//!
//! Wires the reconciliation primitives to a VM provider and drives them on
//! a timer. The binary in `main.rs` is a thin shell around [`Scheduler`].

pub mod config;
pub mod provider;
pub mod scheduler;

pub use config::Config;
pub use provider::{MockProvider, VmProvider};
pub use scheduler::{Scheduler, SchedulerConfig, StatusReport};
