//! Liquid-handler capability trait
//!
//! Hardware-agnostic interface to a single-channel pipetting robot.
//! Implementations handle protocol-specific details (robot HTTP API, serial
//! firmware, simulation).
//!
//! ## Units
//! - Volumes in µL
//! - Rates are relative to the pipette's default flow rate (1.0 = default)
//! - Speeds in mm/s
//! - Vertical offsets in mm from the vessel top, negative going down
//!
//! ## Blocking Semantics
//! Every call returns only once the physical action has finished. The
//! sequencer never issues a new command while one is in flight.
//!
//! ## Errors
//! Any error is fatal for the run: volume over tip capacity, unreachable
//! position, tip already attached or missing, communication failure.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::labware::{LabwareRole, Location, Well};

/// Single-channel liquid handler
#[async_trait]
pub trait LiquidHandler: Send + Sync {
    /// Register a labware definition in a deck slot under `role`
    async fn load_labware(&self, role: LabwareRole, kind: &str, slot: u8) -> Result<()>;

    /// Register the pipette on a mount
    async fn load_instrument(&self, kind: &str, mount: &str) -> Result<()>;

    /// Pick up a tip from a tip-rack well
    ///
    /// # Errors
    /// - A tip is already attached
    /// - The rack well is empty
    async fn pick_up_tip(&self, well: Well) -> Result<()>;

    /// Drop the attached tip into the trash
    async fn drop_tip(&self) -> Result<()>;

    /// Draw `volume_ul` into the tip at `location`
    ///
    /// # Errors
    /// - No tip attached
    /// - Volume would exceed tip capacity
    /// - Location deeper than the vessel
    async fn aspirate(&self, volume_ul: f64, location: Location, rate: f64) -> Result<()>;

    /// Expel `volume_ul` at `location`
    ///
    /// Requests beyond what the tip holds expel whatever is left.
    async fn dispense(&self, volume_ul: f64, location: Location, rate: f64) -> Result<()>;

    /// Move to `location` at `speed_mm_s`
    async fn move_to(&self, location: Location, speed_mm_s: f64) -> Result<()>;

    /// Set the travel speed used for all subsequent moves without an explicit speed
    async fn set_default_speed(&self, speed_mm_s: f64) -> Result<()>;

    /// Touch the tip against the walls of the last visited well
    ///
    /// # Arguments
    /// * `radius` - Fraction of the well radius (1.0 = wall)
    /// * `v_offset_mm` - Height relative to the vessel top
    async fn touch_tip(&self, radius: f64, v_offset_mm: f64) -> Result<()>;

    /// Blow residual liquid and air out of the tip at `location`
    async fn blow_out(&self, location: Location) -> Result<()>;

    /// Hold still for `duration`
    async fn delay(&self, duration: Duration) -> Result<()>;
}
