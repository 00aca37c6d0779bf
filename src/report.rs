//! Run report
//!
//! A structured record of what a run did, written next to the measurement
//! data so each destination well can be traced back to its flow rate and
//! draw depth.
//!
//! ```text
//! RunReport (1)
//!    │
//!    └── SampleRecord (1 per sample)
//!            │
//!            └── CycleRecord (flow rates × replicates)
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use crate::error::AppResult;
use crate::labware::Well;

/// Generate a new unique run ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// One transfer + purge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    /// Flow rate under test (µL/s)
    pub flow_rate: f64,
    /// 0-based replicate index at this flow rate
    pub replicate: usize,
    /// Drawn from the reservoir (µL)
    pub aspirated_ul: f64,
    /// Delivered to the destination (µL)
    pub dispensed_ul: f64,
    /// Dispense rate relative to the instrument default
    pub dispense_rate: f64,
    /// Where the dose was drawn (mm from reservoir top)
    pub aspirate_depth_mm: f64,
    /// Aspiration depth for the next cycle
    pub depth_after_mm: f64,
}

/// One sample's sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    /// 0-based sample index
    pub sample_index: usize,
    /// Source well
    pub reservoir: Well,
    /// Destination well
    pub destination: Well,
    /// Tip rack well used for the whole sweep
    pub tip: Well,
    /// Cycles in execution order
    pub cycles: Vec<CycleRecord>,
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still executing
    Running,
    /// Every sample processed
    Completed,
    /// Stopped at a failing step; hardware left as-is
    Aborted {
        /// Full error chain
        error: String,
    },
}

/// The whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Unique run identifier
    pub uid: String,
    /// Flow rates swept, in order
    pub flow_rates: Vec<f64>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, once finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-sample detail
    pub samples: Vec<SampleRecord>,
    /// Final status
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Empty report stamped now.
    pub fn new(flow_rates: Vec<f64>) -> Self {
        Self {
            uid: new_uid(),
            flow_rates,
            started_at: Utc::now(),
            finished_at: None,
            samples: Vec::new(),
            outcome: RunOutcome::Running,
        }
    }

    /// Restamp the start time once the run actually begins.
    pub fn start(&mut self) {
        self.started_at = Utc::now();
    }

    /// Stamp the end time and outcome.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = outcome;
    }

    /// Number of transfers that completed.
    pub fn cycle_count(&self) -> usize {
        self.samples.iter().map(|s| s.cycles.len()).sum()
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write as pretty JSON to `path`.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
