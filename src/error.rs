//! Custom error types for the sequencer.
//!
//! This module defines the primary error type, `ViscoError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report the three
//! classes of failure a run can hit.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, i.e. a configuration file that cannot
//!   be read or does not deserialize.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but
//!   describes an impossible run (no flow rates, more samples than reservoirs, ...).
//!   Raised by validation before any physical action is issued.
//! - **`Driver`**: Any failure reported by the liquid handler. Drivers speak
//!   `anyhow`, so the context chain (sample, flow rate, step) is preserved.
//!   Driver errors are fatal: partially dispensed liquid cannot be undone.
//! - **`TipAlreadyHeld`** / **`NoTipHeld`** / **`InvalidTransition`**: state
//!   consistency violations inside the run controller. These indicate a sequencing
//!   bug, never a recoverable condition.
//! - **`Io`** / **`Serialization`**: writing run reports.
//!
//! By using `#[from]`, `ViscoError` can be created from the underlying error types
//! with the `?` operator.

use thiserror::Error;

use crate::labware::Well;
use crate::protocol::controller::{RunEvent, RunPhase};

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ViscoError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ViscoError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),

    #[error("Tip already held (picked up from {0}); release it before acquiring another")]
    TipAlreadyHeld(Well),

    #[error("No tip held")]
    NoTipHeld,

    #[error("Invalid run transition: {event:?} while {phase:?}")]
    InvalidTransition { phase: RunPhase, event: RunEvent },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for ViscoError {
    fn from(err: figment::Error) -> Self {
        ViscoError::Config(Box::new(err))
    }
}

impl ViscoError {
    /// True for errors raised before the robot was asked to do anything.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ViscoError::Config(_) | ViscoError::Configuration(_))
    }

    /// Wrap a driver error in another layer of context; other variants pass through.
    pub fn context(self, msg: impl std::fmt::Display + Send + Sync + 'static) -> Self {
        match self {
            ViscoError::Driver(inner) => ViscoError::Driver(inner.context(msg)),
            other => other,
        }
    }

    /// True for sequencing bugs (tip bookkeeping or phase ordering).
    pub fn is_state_consistency(&self) -> bool {
        matches!(
            self,
            ViscoError::TipAlreadyHeld(_)
                | ViscoError::NoTipHeld
                | ViscoError::InvalidTransition { .. }
        )
    }
}
