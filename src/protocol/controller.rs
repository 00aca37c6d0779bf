//! Run controller
//!
//! Drives the whole run: one tip per sample, held across that sample's whole
//! flow-rate sweep.
//!
//! ```text
//! Idle ──AcquireTip──▶ TipAcquired ──BeginTransfer──▶ Transferring
//!                                                        │ ▲
//!                                            BeginPurge  ▼ │ BeginTransfer
//!                                                      Purging
//!                                                        │ ReleaseTip
//!                                                        ▼
//! Idle ◀──NextSample── TipReleased ──Finish──▶ Complete
//! ```
//!
//! Any driver failure moves the controller to `Aborted` and is returned as-is.
//! Nothing is retried and nothing is rolled back: tip state and phase stay at
//! what the robot last completed so an operator can inspect the deck.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{RunConfig, Settings};
use crate::error::{AppResult, ViscoError};
use crate::hardware::LiquidHandler;
use crate::labware::{LabwareRole, Well};
use crate::protocol::depth::ReservoirState;
use crate::protocol::purge::PurgeCycle;
use crate::protocol::tip::TipState;
use crate::protocol::transfer::{TransferCycle, TransferRequest};
use crate::report::{CycleRecord, RunOutcome, RunReport, SampleRecord};

/// Run lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    /// No tip held, waiting for the next sample
    Idle,
    /// Tip picked up, nothing pipetted yet
    TipAcquired,
    /// Inside a transfer cycle
    Transferring,
    /// Inside a purge cycle
    Purging,
    /// Sample finished and tip dropped
    TipReleased,
    /// All samples processed
    Complete,
    /// Stopped by an error
    Aborted,
}

/// Events that move the run between phases
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunEvent {
    AcquireTip,
    BeginTransfer,
    BeginPurge,
    ReleaseTip,
    NextSample,
    Finish,
    Abort,
}

impl RunPhase {
    /// Check if the run has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Aborted)
    }

    /// Next phase, or `None` if `event` is not legal here
    pub fn transition(self, event: RunEvent) -> Option<Self> {
        use RunEvent::*;
        use RunPhase::*;

        match (self, event) {
            (Idle, AcquireTip) => Some(TipAcquired),
            (TipAcquired, BeginTransfer) => Some(Transferring),
            (Transferring, BeginPurge) => Some(Purging),
            // Next flow rate or replicate with the same tip
            (Purging, BeginTransfer) => Some(Transferring),
            (Purging, ReleaseTip) => Some(TipReleased),
            (TipReleased, NextSample) => Some(Idle),
            (TipReleased, Finish) => Some(Complete),
            (phase, Abort) if !phase.is_terminal() => Some(Aborted),
            _ => None,
        }
    }

    /// Apply `event` in place
    pub fn apply(&mut self, event: RunEvent) -> AppResult<()> {
        let next = self
            .transition(event)
            .ok_or(ViscoError::InvalidTransition { phase: *self, event })?;
        *self = next;
        Ok(())
    }
}

/// Depth and dose of every cycle, computed without touching hardware.
///
/// Uses the same depth model as [`RunController::run`], so the plan matches
/// what a successful run records.
pub fn schedule(run: &RunConfig) -> AppResult<Vec<SampleRecord>> {
    run.validate()?;
    (0..run.sample_count)
        .map(|sample_index| {
            let mut record = sample_record(run, sample_index)?;
            let mut reservoir = ReservoirState::new(record.reservoir, run.start_depth_mm);
            for &flow_rate in &run.flow_rates {
                for replicate in 0..run.replicates {
                    let request =
                        TransferRequest::new(run, sample_index, flow_rate, reservoir.depth_mm())?;
                    let depth_after = reservoir.record_withdrawal(request.volume_ul, &run.geometry);
                    record.cycles.push(cycle_record(&request, replicate, depth_after));
                }
            }
            Ok(record)
        })
        .collect()
}

fn sample_record(run: &RunConfig, sample_index: usize) -> AppResult<SampleRecord> {
    let tip = Well::tip_for_sample(sample_index).ok_or_else(|| {
        ViscoError::Configuration(format!("no tip rack column for sample {sample_index}"))
    })?;
    Ok(SampleRecord {
        sample_index,
        reservoir: run.reservoir_well(sample_index)?,
        destination: run.destination_well(sample_index)?,
        tip,
        cycles: Vec::new(),
    })
}

fn cycle_record(request: &TransferRequest, replicate: usize, depth_after_mm: f64) -> CycleRecord {
    CycleRecord {
        flow_rate: request.flow_rate,
        replicate,
        aspirated_ul: request.volume_ul,
        dispensed_ul: request.volume_ul,
        dispense_rate: request.dispense_rate,
        aspirate_depth_mm: request.depth_mm,
        depth_after_mm,
    }
}

/// Sequences a full run against one liquid handler.
pub struct RunController {
    handler: Arc<dyn LiquidHandler>,
    settings: Settings,
    phase: RunPhase,
    tip: TipState,
    reservoirs: Vec<ReservoirState>,
    report: RunReport,
}

impl RunController {
    /// Create a controller. Nothing is sent to the handler until [`run`](Self::run).
    pub fn new(handler: Arc<dyn LiquidHandler>, settings: Settings) -> Self {
        let report = RunReport::new(settings.run.flow_rates.clone());
        Self {
            handler,
            settings,
            phase: RunPhase::Idle,
            tip: TipState::default(),
            reservoirs: Vec::new(),
            report,
        }
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Current tip state
    pub fn tip(&self) -> TipState {
        self.tip
    }

    /// Depth state of the reservoir owned by `sample_index`
    pub fn reservoir(&self, sample_index: usize) -> Option<&ReservoirState> {
        self.reservoirs.get(sample_index)
    }

    /// Progress so far; complete once `run` has returned
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Execute every sample.
    ///
    /// Configuration is validated before anything is sent to the handler.
    pub async fn run(&mut self) -> AppResult<RunReport> {
        if self.phase != RunPhase::Idle || !self.report.samples.is_empty() {
            return Err(ViscoError::InvalidTransition {
                phase: self.phase,
                event: RunEvent::AcquireTip,
            });
        }
        self.settings.validate()?;
        let run = &self.settings.run;
        self.reservoirs = (0..run.sample_count)
            .map(|s| Ok(ReservoirState::new(run.reservoir_well(s)?, run.start_depth_mm)))
            .collect::<AppResult<_>>()?;
        self.report.start();

        info!(
            run_uid = %self.report.uid,
            samples = self.settings.run.sample_count,
            flow_rates = ?self.settings.run.flow_rates,
            replicates = self.settings.run.replicates,
            "Starting run"
        );

        match self.execute().await {
            Ok(()) => {
                self.report.finish(RunOutcome::Completed);
                info!(
                    run_uid = %self.report.uid,
                    cycles = self.report.cycle_count(),
                    "Run complete"
                );
                Ok(self.report.clone())
            }
            Err(err) => {
                if !self.phase.is_terminal() {
                    self.phase = RunPhase::Aborted;
                }
                if let Some(well) = self.tip.held() {
                    warn!(tip = %well, "Run aborted with a tip attached");
                }
                error!(run_uid = %self.report.uid, error = %format!("{err:#}"), "Run aborted");
                self.report.finish(RunOutcome::Aborted {
                    error: format!("{err:#}"),
                });
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> AppResult<()> {
        self.prepare_deck().await?;
        for sample_index in 0..self.settings.run.sample_count {
            if sample_index > 0 {
                self.phase.apply(RunEvent::NextSample)?;
            }
            self.run_sample(sample_index)
                .await
                .map_err(|e| e.context(format!("sample {sample_index}")))?;
        }
        self.phase.apply(RunEvent::Finish)
    }

    async fn prepare_deck(&self) -> AppResult<()> {
        let deck = &self.settings.deck;
        for (role, labware) in [
            (LabwareRole::Reservoir, &deck.reservoir),
            (LabwareRole::Plate, &deck.plate),
            (LabwareRole::TipRack, &deck.tip_rack),
        ] {
            self.handler
                .load_labware(role, &labware.kind, labware.slot)
                .await
                .map_err(|e| e.context(format!("load {role} '{}'", labware.kind)))?;
        }
        self.handler
            .load_instrument(&deck.instrument.kind, &deck.instrument.mount)
            .await
            .map_err(|e| e.context(format!("load instrument '{}'", deck.instrument.kind)))?;
        Ok(())
    }

    async fn run_sample(&mut self, sample_index: usize) -> AppResult<()> {
        let run = &self.settings.run;
        let technique = &self.settings.technique;
        let handler = self.handler.as_ref();

        let mut record = sample_record(run, sample_index)?;
        info!(
            sample = sample_index,
            reservoir = %record.reservoir,
            destination = %record.destination,
            tip = %record.tip,
            "Processing sample"
        );

        self.tip.ensure_empty()?;
        handler
            .pick_up_tip(record.tip)
            .await
            .map_err(|e| ViscoError::from(e).context(format!("pick up tip {}", record.tip)))?;
        self.tip.acquire(record.tip)?;
        self.phase.apply(RunEvent::AcquireTip)?;

        let reservoir = self
            .reservoirs
            .get_mut(sample_index)
            .ok_or_else(|| {
                ViscoError::Configuration(format!("no reservoir state for sample {sample_index}"))
            })?;
        reservoir.reset();

        let transfer = TransferCycle::new(handler, run, technique);
        let purge = PurgeCycle::new(handler, run, technique);

        for &flow_rate in &run.flow_rates {
            info!(sample = sample_index, flow_rate, "Flow rate");
            for replicate in 0..run.replicates {
                let request =
                    TransferRequest::new(run, sample_index, flow_rate, reservoir.depth_mm())?;
                let step = format!("flow rate {flow_rate} µL/s, replicate {replicate}");

                self.phase.apply(RunEvent::BeginTransfer)?;
                let outcome = transfer
                    .execute(&self.tip, &request)
                    .await
                    .map_err(|e| e.context(format!("transfer at {step}")))?;

                self.phase.apply(RunEvent::BeginPurge)?;
                purge
                    .execute(&self.tip, record.reservoir)
                    .await
                    .map_err(|e| e.context(format!("purge at {step}")))?;

                let depth_after = reservoir.record_withdrawal(outcome.dispensed_ul, &run.geometry);
                info!(
                    sample = sample_index,
                    flow_rate,
                    replicate,
                    volume_ul = outcome.dispensed_ul,
                    aspirate_depth_mm = request.depth_mm,
                    next_depth_mm = depth_after,
                    "Cycle complete"
                );
                record.cycles.push(cycle_record(&request, replicate, depth_after));
                // Keep the report current in case a later step aborts
                self.report.samples.truncate(sample_index);
                self.report.samples.push(record.clone());
            }
        }

        purge
            .final_burst(&self.tip, record.reservoir)
            .await
            .map_err(|e| e.context("final blow-out burst"))?;
        handler
            .drop_tip()
            .await
            .map_err(|e| ViscoError::from(e).context("drop tip"))?;
        self.tip.release()?;
        self.phase.apply(RunEvent::ReleaseTip)?;

        info!(sample = sample_index, withdrawn_ul = reservoir.withdrawn_ul(), "Sample done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Action, MockPipette};

    #[test]
    fn test_happy_path_transitions() {
        let mut phase = RunPhase::Idle;
        for event in [
            RunEvent::AcquireTip,
            RunEvent::BeginTransfer,
            RunEvent::BeginPurge,
            RunEvent::BeginTransfer,
            RunEvent::BeginPurge,
            RunEvent::ReleaseTip,
            RunEvent::NextSample,
        ] {
            phase.apply(event).unwrap();
        }
        assert_eq!(phase, RunPhase::Idle);
    }

    #[test]
    fn test_illegal_transitions() {
        assert_eq!(RunPhase::Idle.transition(RunEvent::BeginTransfer), None);
        assert_eq!(RunPhase::Transferring.transition(RunEvent::ReleaseTip), None);
        assert_eq!(RunPhase::TipAcquired.transition(RunEvent::AcquireTip), None);
        assert_eq!(RunPhase::Complete.transition(RunEvent::Abort), None);

        let mut phase = RunPhase::Idle;
        let err = phase.apply(RunEvent::ReleaseTip).unwrap_err();
        assert!(err.is_state_consistency());
        assert_eq!(phase, RunPhase::Idle);
    }

    #[test]
    fn test_abort_from_active_phases() {
        for phase in [
            RunPhase::Idle,
            RunPhase::TipAcquired,
            RunPhase::Transferring,
            RunPhase::Purging,
            RunPhase::TipReleased,
        ] {
            assert_eq!(phase.transition(RunEvent::Abort), Some(RunPhase::Aborted));
        }
    }

    #[test]
    fn test_schedule_depths() {
        let run = RunConfig {
            flow_rates: vec![80.0, 40.0],
            sample_count: 2,
            ..RunConfig::default()
        };
        let plan = schedule(&run).unwrap();
        assert_eq!(plan.len(), 2);

        for sample in &plan {
            assert_eq!(sample.cycles[0].aspirate_depth_mm, -80.0);
            assert!((sample.cycles[0].depth_after_mm - (-81.44)).abs() < 1e-9);
            assert_eq!(sample.cycles[1].aspirate_depth_mm, sample.cycles[0].depth_after_mm);
            assert_eq!(sample.cycles[1].aspirated_ul, 400.0);
        }
        assert_eq!(plan[1].reservoir, Well::new('C', 1));
        assert_eq!(plan[1].tip, Well::new('A', 2));
    }

    #[tokio::test]
    async fn test_run_matches_schedule() {
        let settings = Settings {
            run: RunConfig {
                flow_rates: vec![80.0, 60.0],
                sample_count: 2,
                replicates: 2,
                ..RunConfig::default()
            },
            ..Settings::default()
        };
        let plan = schedule(&settings.run).unwrap();

        let pipette = MockPipette::new();
        let mut controller = RunController::new(Arc::new(pipette.clone()), settings);
        let report = controller.run().await.unwrap();

        assert_eq!(report.samples, plan);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(controller.phase(), RunPhase::Complete);
        assert!(!controller.tip().is_held());
        assert!(!pipette.tip_attached().await);
    }

    #[tokio::test]
    async fn test_invalid_config_touches_nothing() {
        let settings = Settings {
            run: RunConfig {
                flow_rates: vec![],
                ..RunConfig::default()
            },
            ..Settings::default()
        };
        let pipette = MockPipette::new();
        let mut controller = RunController::new(Arc::new(pipette.clone()), settings);

        let err = controller.run().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(pipette.actions().await.is_empty());
        assert_eq!(controller.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_run_twice_rejected() {
        let pipette = MockPipette::new();
        let mut controller = RunController::new(Arc::new(pipette.clone()), Settings::default());
        controller.run().await.unwrap();
        let before = pipette.actions().await.len();

        assert!(controller.run().await.unwrap_err().is_state_consistency());
        assert_eq!(pipette.actions().await.len(), before);
        assert!(matches!(
            pipette.actions().await.last().map(|r| &r.action),
            Some(Action::DropTip)
        ));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_abort_is_logged() {
        let pipette = MockPipette::new();
        // First aspirate: 3 labware + instrument + tip pick-up precede it
        pipette.fail_at_action(5).await;
        let mut controller = RunController::new(Arc::new(pipette.clone()), Settings::default());

        controller.run().await.unwrap_err();

        assert!(logs_contain("Processing sample"));
        assert!(logs_contain("Run aborted with a tip attached"));
        assert!(logs_contain("injected fault"));
        assert!(!logs_contain("Run complete"));
    }

    #[tokio::test]
    async fn test_started_at_stamped_when_run_begins() {
        let pipette = MockPipette::new();
        let mut controller = RunController::new(Arc::new(pipette), Settings::default());
        let built_at = controller.report().started_at;
        std::thread::sleep(std::time::Duration::from_millis(20));
        let before_run = chrono::Utc::now();

        let report = controller.run().await.unwrap();

        assert!(report.started_at >= before_run);
        assert!(report.started_at > built_at);
        assert!(report.finished_at.is_some_and(|end| end >= report.started_at));
    }
}
