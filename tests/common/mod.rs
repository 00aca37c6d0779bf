//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use proxy_viscometer::config::{RunConfig, Settings};
use proxy_viscometer::hardware::{Action, MockPipette, RecordedAction};
use proxy_viscometer::labware::{LabwareRole, Location, Well};
use proxy_viscometer::RunController;

/// Default settings with a different run section.
pub fn settings_with(run: RunConfig) -> Settings {
    Settings {
        run,
        ..Settings::default()
    }
}

/// A controller wired to a fresh simulated pipette; the clone inspects the trace.
pub fn controller(settings: Settings) -> (RunController, MockPipette) {
    controller_on(MockPipette::new(), settings)
}

/// A controller wired to a preconfigured simulated pipette.
pub fn controller_on(pipette: MockPipette, settings: Settings) -> (RunController, MockPipette) {
    let controller = RunController::new(Arc::new(pipette.clone()), settings);
    (controller, pipette)
}

/// Just the actions, without timestamps.
pub fn actions_of(recorded: &[RecordedAction]) -> Vec<Action> {
    recorded.iter().map(|r| r.action.clone()).collect()
}

/// Count the actions matching `pred`.
pub fn count(recorded: &[RecordedAction], pred: impl Fn(&Action) -> bool) -> usize {
    recorded.iter().filter(|r| pred(&r.action)).count()
}

/// Every aspirate issued inside the reservoir, with its depth.
pub fn reservoir_draws(recorded: &[RecordedAction]) -> Vec<(Well, f64)> {
    recorded
        .iter()
        .filter_map(|r| match r.action {
            Action::Aspirate { location, .. }
                if location.labware == LabwareRole::Reservoir && location.z_offset_mm < 0.0 =>
            {
                Some((location.well, location.z_offset_mm))
            }
            _ => None,
        })
        .collect()
}

/// Reservoir mouth for `well`.
pub fn reservoir_top(well: Well, z: f64) -> Location {
    Location::top(LabwareRole::Reservoir, well, z)
}

/// Float comparison for derived depths.
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
