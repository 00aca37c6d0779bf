//! Open-loop reservoir level tracking.
//!
//! The aspiration point follows the falling liquid surface. There is no level
//! sensor: the drop is computed from the volume withdrawn and the vessel
//! geometry alone.

use serde::Serialize;

use crate::config::VesselGeometry;
use crate::labware::Well;

/// Level drop in mm caused by withdrawing `volume_ul`.
///
/// `increment = (volume_ul / 1000) × (height_mm / reference_volume_ml)`
pub fn depth_increment_mm(volume_ul: f64, geometry: &VesselGeometry) -> f64 {
    (volume_ul / 1000.0) * geometry.mm_per_ml()
}

/// Aspiration depth of one reservoir during one sample's sweep.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReservoirState {
    well: Well,
    start_depth_mm: f64,
    depth_mm: f64,
    withdrawn_ul: f64,
}

impl ReservoirState {
    /// Fresh state at the configured starting depth.
    pub fn new(well: Well, start_depth_mm: f64) -> Self {
        Self {
            well,
            start_depth_mm,
            depth_mm: start_depth_mm,
            withdrawn_ul: 0.0,
        }
    }

    /// Reservoir well.
    pub fn well(&self) -> Well {
        self.well
    }

    /// Where the next aspiration happens (mm from the vessel top).
    pub fn depth_mm(&self) -> f64 {
        self.depth_mm
    }

    /// Total volume taken out since the last reset (µL).
    pub fn withdrawn_ul(&self) -> f64 {
        self.withdrawn_ul
    }

    /// Move the aspiration point down after `volume_ul` has left the reservoir.
    ///
    /// Returns the new depth.
    pub fn record_withdrawal(&mut self, volume_ul: f64, geometry: &VesselGeometry) -> f64 {
        self.withdrawn_ul += volume_ul;
        self.depth_mm -= depth_increment_mm(volume_ul, geometry);
        self.depth_mm
    }

    /// Back to the starting depth. Called at every sample boundary.
    pub fn reset(&mut self) {
        self.depth_mm = self.start_depth_mm;
        self.withdrawn_ul = 0.0;
    }
}
