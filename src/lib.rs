//! Core library for the proxy viscometer.
//!
//! Sequences a single-channel liquid handler through repeated
//! aspirate → settle → clean → dispense → purge cycles while tracking the
//! falling liquid level in each reservoir. The robot itself sits behind the
//! [`hardware::LiquidHandler`] trait; [`hardware::MockPipette`] simulates it.

pub mod config;
pub mod error;
pub mod hardware;
pub mod labware;
pub mod protocol;
pub mod report;

pub use config::Settings;
pub use error::{AppResult, ViscoError};
pub use protocol::RunController;
