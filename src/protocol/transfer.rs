//! One dose from reservoir to destination.
//!
//! Sequence:
//!
//! ```text
//! aspirate @ reservoir top(depth), viscous rate
//! dwell (aspirate settle)
//! slow default speed, park at reservoir top(-2) at 5 mm/s
//! touch tip ×4 (deepest first)
//! dispense @ destination top(+10), flow_rate / default_flow_rate
//! dwell (dispense settle)
//! ```
//!
//! The full aspirated volume is dispensed. Residue left in the tip is the
//! purge cycle's job.

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use crate::config::{RunConfig, Technique};
use crate::error::AppResult;
use crate::hardware::LiquidHandler;
use crate::labware::{LabwareRole, Location, Well};
use crate::protocol::tip::TipState;

/// One aspirate/dispense dose.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransferRequest {
    /// Reservoir well
    pub source: Well,
    /// Destination well
    pub destination: Well,
    /// Dose (µL), `flow_rate × aspiration_duration`
    pub volume_ul: f64,
    /// Flow rate under test (µL/s)
    pub flow_rate: f64,
    /// Dispense rate relative to the instrument default
    pub dispense_rate: f64,
    /// Aspiration depth (mm from the reservoir top)
    pub depth_mm: f64,
}

impl TransferRequest {
    /// Build the dose for `sample_index` at `flow_rate`, drawn at `depth_mm`.
    pub fn new(
        run: &RunConfig,
        sample_index: usize,
        flow_rate: f64,
        depth_mm: f64,
    ) -> AppResult<Self> {
        Ok(Self {
            source: run.reservoir_well(sample_index)?,
            destination: run.destination_well(sample_index)?,
            volume_ul: run.transfer_volume(flow_rate),
            flow_rate,
            dispense_rate: run.relative_rate(flow_rate),
            depth_mm,
        })
    }
}

/// Volumes that actually went through the tip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TransferOutcome {
    /// Drawn from the reservoir (µL)
    pub aspirated_ul: f64,
    /// Delivered to the destination (µL)
    pub dispensed_ul: f64,
}

/// Executes transfers against a liquid handler.
pub struct TransferCycle<'a> {
    handler: &'a dyn LiquidHandler,
    run: &'a RunConfig,
    technique: &'a Technique,
}

impl<'a> TransferCycle<'a> {
    /// Bind the cycle to a handler and the run's settings.
    pub fn new(handler: &'a dyn LiquidHandler, run: &'a RunConfig, technique: &'a Technique) -> Self {
        Self {
            handler,
            run,
            technique,
        }
    }

    /// Move one dose. Requires a tip.
    pub async fn execute(
        &self,
        tip: &TipState,
        request: &TransferRequest,
    ) -> AppResult<TransferOutcome> {
        tip.require()?;
        let technique = self.technique;
        let viscous_rate = self.run.relative_rate(technique.viscous_rate);

        let draw_point = Location::top(LabwareRole::Reservoir, request.source, request.depth_mm);
        debug!(volume_ul = request.volume_ul, %draw_point, "Aspirating");
        self.handler
            .aspirate(request.volume_ul, draw_point, viscous_rate)
            .await
            .with_context(|| format!("aspirate {:.1} µL at {}", request.volume_ul, draw_point))?;
        self.handler
            .delay(self.run.aspirate_settle)
            .await
            .context("aspirate settle")?;

        self.handler
            .set_default_speed(technique.slow_travel_speed)
            .await
            .context("set slow travel speed")?;
        let park = Location::top(
            LabwareRole::Reservoir,
            request.source,
            technique.reposition_offset_mm,
        );
        self.handler
            .move_to(park, technique.reposition_speed)
            .await
            .with_context(|| format!("reposition to {park}"))?;

        for touch in &technique.cleanup_touches {
            self.handler
                .touch_tip(touch.radius, touch.v_offset_mm)
                .await
                .with_context(|| {
                    format!(
                        "cleanup touch r={} at {:+} mm",
                        touch.radius, touch.v_offset_mm
                    )
                })?;
        }

        let outlet = Location::top(
            LabwareRole::Plate,
            request.destination,
            technique.dispense_height_mm,
        );
        debug!(
            volume_ul = request.volume_ul,
            rate = request.dispense_rate,
            %outlet,
            "Dispensing"
        );
        self.handler
            .dispense(request.volume_ul, outlet, request.dispense_rate)
            .await
            .with_context(|| format!("dispense {:.1} µL at {}", request.volume_ul, outlet))?;
        self.handler
            .delay(self.run.dispense_settle)
            .await
            .context("dispense settle")?;

        Ok(TransferOutcome {
            aspirated_ul: request.volume_ul,
            dispensed_ul: request.volume_ul,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Action, MockPipette};
    use crate::error::ViscoError;
    use std::time::Duration;

    async fn ready_pipette() -> (MockPipette, TipState) {
        let pipette = MockPipette::new();
        pipette.load_instrument("p1000_single_gen2", "left").await.unwrap();
        for (role, slot) in [
            (LabwareRole::Reservoir, 1),
            (LabwareRole::Plate, 2),
            (LabwareRole::TipRack, 3),
        ] {
            pipette.load_labware(role, "test", slot).await.unwrap();
        }
        pipette.pick_up_tip(Well::new('A', 1)).await.unwrap();
        let mut tip = TipState::default();
        tip.acquire(Well::new('A', 1)).unwrap();
        (pipette, tip)
    }

    #[test]
    fn test_request_volume() {
        let run = RunConfig::default();
        let request = TransferRequest::new(&run, 0, 80.0, -80.0).unwrap();
        assert_eq!(request.volume_ul, 800.0);
        assert_eq!(request.source, Well::new('A', 1));
        assert_eq!(request.destination, Well::new('A', 1));
        assert!((request.dispense_rate - 80.0 / 274.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_transfer_sequence() {
        let (pipette, tip) = ready_pipette().await;
        let run = RunConfig::default();
        let technique = Technique::default();
        let request = TransferRequest::new(&run, 0, 80.0, -80.0).unwrap();
        let skip = pipette.actions().await.len();

        let outcome = TransferCycle::new(&pipette, &run, &technique)
            .execute(&tip, &request)
            .await
            .unwrap();
        assert_eq!(outcome.aspirated_ul, outcome.dispensed_ul);

        let actions: Vec<Action> = pipette
            .actions()
            .await
            .into_iter()
            .skip(skip)
            .map(|r| r.action)
            .collect();
        let reservoir = |z| Location::top(LabwareRole::Reservoir, Well::new('A', 1), z);
        let expected = vec![
            Action::Aspirate {
                volume_ul: 800.0,
                location: reservoir(-80.0),
                rate: 100.0 / 274.7,
            },
            Action::Delay {
                duration: Duration::from_secs(30),
            },
            Action::SetDefaultSpeed { speed_mm_s: 100.0 },
            Action::MoveTo {
                location: reservoir(-2.0),
                speed_mm_s: 5.0,
            },
            Action::TouchTip {
                radius: 1.0,
                v_offset_mm: -10.0,
            },
            Action::TouchTip {
                radius: 1.0,
                v_offset_mm: -10.0,
            },
            Action::TouchTip {
                radius: 1.0,
                v_offset_mm: -6.0,
            },
            Action::TouchTip {
                radius: 1.2,
                v_offset_mm: -3.0,
            },
            Action::Dispense {
                volume_ul: 800.0,
                location: Location::top(LabwareRole::Plate, Well::new('A', 1), 10.0),
                rate: 80.0 / 274.7,
            },
            Action::Delay {
                duration: Duration::from_secs(30),
            },
        ];
        assert_eq!(actions, expected);
        assert_eq!(pipette.tip_volume().await, 0.0);
    }

    #[tokio::test]
    async fn test_transfer_without_tip() {
        let pipette = MockPipette::new();
        let run = RunConfig::default();
        let technique = Technique::default();
        let request = TransferRequest::new(&run, 0, 80.0, -80.0).unwrap();

        let err = TransferCycle::new(&pipette, &run, &technique)
            .execute(&TipState::default(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ViscoError::NoTipHeld));
        assert!(pipette.actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_over_capacity_is_driver_error() {
        let (pipette, tip) = ready_pipette().await;
        let run = RunConfig {
            flow_rates: vec![150.0],
            ..RunConfig::default()
        };
        let technique = Technique::default();
        let request = TransferRequest::new(&run, 0, 150.0, -80.0).unwrap();

        let err = TransferCycle::new(&pipette, &run, &technique)
            .execute(&tip, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ViscoError::Driver(_)));
        assert!(err.to_string().contains("aspirate 1500.0 µL"));
    }
}
