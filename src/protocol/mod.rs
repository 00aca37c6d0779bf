//! Transfer-cycle sequencing.
//!
//! - [`depth`]: open-loop reservoir level model
//! - [`tip`]: single-tip bookkeeping
//! - [`transfer`]: reservoir → destination dose
//! - [`purge`]: residue removal at the reservoir
//! - [`controller`]: samples × flow rates × replicates, tip epochs, phases

pub mod controller;
pub mod depth;
pub mod purge;
pub mod tip;
pub mod transfer;

pub use controller::{schedule, RunController, RunEvent, RunPhase};
pub use depth::{depth_increment_mm, ReservoirState};
pub use purge::PurgeCycle;
pub use tip::TipState;
pub use transfer::{TransferCycle, TransferOutcome, TransferRequest};
