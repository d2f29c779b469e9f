//! # Stochastic Depth Gating
//!
//! Per-block gating state and the two policies that drive it.
//!
//! - [`GateTable`]: ordered registry of every block's death rate and live gate.
//! - [`DeathRateSchedule`]: assigns death rates after the network is built.
//! - [`GateSampler`]: re-draws the gates before every training step and
//!   reopens them at the end of every epoch.
//!
//! ```text
//! build:  block_0 .. block_k  --append-->  GateTable
//!         DeathRateSchedule   --rates--->  GateTable
//! train:  GateSampler         --gates--->  GateTable --feeds()--> graph
//! ```

pub mod sampler;
pub mod schedule;
pub mod table;

pub use sampler::GateSampler;
pub use schedule::{DeathMode, DeathRateSchedule};
pub use table::{GateEntry, GateHandle, GateTable};
