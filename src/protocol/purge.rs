//! Contamination control after each transfer, always at the reservoir.
//!
//! ```text
//! dispense purge volume @ reservoir top, viscous rate   dwell 20 s
//! aspirate rinse volume @ reservoir top, viscous rate   dwell 10 s
//! dispense rinse volume @ reservoir top, viscous rate   (no dwell)
//! touch tip
//! fast default speed
//! blow out ×10
//! ```
//!
//! The rinse-return dispense deliberately has no settle time.

use anyhow::Context;
use tracing::debug;

use crate::config::{RunConfig, Technique};
use crate::error::AppResult;
use crate::hardware::LiquidHandler;
use crate::labware::{LabwareRole, Location, Well};
use crate::protocol::tip::TipState;

/// Executes purges against a liquid handler.
pub struct PurgeCycle<'a> {
    handler: &'a dyn LiquidHandler,
    run: &'a RunConfig,
    technique: &'a Technique,
}

impl<'a> PurgeCycle<'a> {
    /// Bind the cycle to a handler and the run's settings.
    pub fn new(handler: &'a dyn LiquidHandler, run: &'a RunConfig, technique: &'a Technique) -> Self {
        Self {
            handler,
            run,
            technique,
        }
    }

    /// Full purge at `reservoir`. Requires a tip.
    pub async fn execute(&self, tip: &TipState, reservoir: Well) -> AppResult<()> {
        tip.require()?;
        let technique = self.technique;
        let rate = self.run.relative_rate(technique.viscous_rate);
        let mouth = Location::top(LabwareRole::Reservoir, reservoir, 0.0);
        debug!(%reservoir, "Purging");

        self.handler
            .dispense(technique.purge_volume_ul, mouth, rate)
            .await
            .context("purge dispense")?;
        self.handler
            .delay(technique.purge_settle)
            .await
            .context("purge settle")?;

        self.handler
            .aspirate(technique.rinse_volume_ul, mouth, rate)
            .await
            .context("rinse aspirate")?;
        self.handler
            .delay(technique.rinse_settle)
            .await
            .context("rinse settle")?;
        self.handler
            .dispense(technique.rinse_volume_ul, mouth, rate)
            .await
            .context("rinse dispense")?;

        let touch = technique.purge_touch;
        self.handler
            .touch_tip(touch.radius, touch.v_offset_mm)
            .await
            .context("purge touch")?;
        self.handler
            .set_default_speed(technique.fast_travel_speed)
            .await
            .context("set fast travel speed")?;

        self.blow_out_burst(reservoir).await
    }

    /// The extra burst run once per sample right before the tip is dropped.
    pub async fn final_burst(&self, tip: &TipState, reservoir: Well) -> AppResult<()> {
        tip.require()?;
        debug!(%reservoir, "Final blow-out burst");
        self.blow_out_burst(reservoir).await
    }

    async fn blow_out_burst(&self, reservoir: Well) -> AppResult<()> {
        let mouth = Location::top(LabwareRole::Reservoir, reservoir, 0.0);
        for n in 0..self.technique.blowout_count {
            self.handler
                .blow_out(mouth)
                .await
                .with_context(|| format!("blow-out {} of {}", n + 1, self.technique.blowout_count))?;
        }
        Ok(())
    }
}
