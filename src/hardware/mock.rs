//! Mock Hardware Implementations
//!
//! Provides a simulated pipette for testing and dry runs without a robot.
//!
//! `MockPipette` keeps a virtual clock that only `delay` advances, so the time
//! between two recorded actions is exactly the dwell that separated them. With
//! [`Pacing::RealTime`] the delay also sleeps on the tokio timer
//! (tokio::time::sleep, not std::thread::sleep).
//!
//! # Enforced Physics
//!
//! - Tip must be attached for every liquid operation
//! - Tip capacity (default 1000 µL, P1000)
//! - Vessel depth per labware role: positions below the bottom are unreachable
//! - Tip-rack wells can only be used once
//!
//! # Example
//!
//! ```rust,ignore
//! let pipette = MockPipette::new();
//! pipette.load_instrument("p1000_single_gen2", "left").await?;
//! pipette.load_labware(LabwareRole::TipRack, "opentrons_96_filtertiprack_1000ul", 3).await?;
//! pipette.pick_up_tip(Well::new('A', 1)).await?;
//! assert!(pipette.tip_attached().await);
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::debug;

use crate::hardware::capabilities::LiquidHandler;
use crate::labware::{LabwareRole, Location, Well};

/// P1000 tip capacity (µL)
pub const DEFAULT_TIP_CAPACITY_UL: f64 = 1000.0;

/// Whether `delay` actually waits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Advance the virtual clock only
    #[default]
    Instant,
    /// Advance the virtual clock and sleep on the tokio timer
    RealTime,
}

/// One physical command as the driver received it
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    LoadLabware {
        role: LabwareRole,
        kind: String,
        slot: u8,
    },
    LoadInstrument {
        kind: String,
        mount: String,
    },
    PickUpTip {
        well: Well,
    },
    DropTip,
    Aspirate {
        volume_ul: f64,
        location: Location,
        rate: f64,
    },
    Dispense {
        volume_ul: f64,
        location: Location,
        rate: f64,
    },
    MoveTo {
        location: Location,
        speed_mm_s: f64,
    },
    SetDefaultSpeed {
        speed_mm_s: f64,
    },
    TouchTip {
        radius: f64,
        v_offset_mm: f64,
    },
    BlowOut {
        location: Location,
    },
    Delay {
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
}

/// An action stamped with the virtual time it was issued at
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedAction {
    /// Virtual time since the pipette was created
    #[serde(with = "humantime_serde")]
    pub at: Duration,
    /// What was done
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug)]
struct MockState {
    labware: HashMap<LabwareRole, (String, u8)>,
    instrument: Option<(String, String)>,
    tip: Option<Well>,
    used_tips: HashSet<Well>,
    tip_volume_ul: f64,
    last_well: Option<(LabwareRole, Well)>,
    default_speed_mm_s: f64,
    clock: Duration,
    actions: Vec<RecordedAction>,
    fail_at: Option<usize>,
}

impl MockState {
    fn new() -> Self {
        Self {
            labware: HashMap::new(),
            instrument: None,
            tip: None,
            used_tips: HashSet::new(),
            tip_volume_ul: 0.0,
            last_well: None,
            default_speed_mm_s: 400.0,
            clock: Duration::ZERO,
            actions: Vec::new(),
            fail_at: None,
        }
    }

    /// Fault injection happens before any state change.
    fn check_fault(&self, action: &Action) -> Result<()> {
        if self.fail_at == Some(self.actions.len()) {
            bail!("MockPipette: injected fault on {:?}", action);
        }
        Ok(())
    }

    fn record(&mut self, action: Action) {
        debug!(at = ?self.clock, ?action, "MockPipette");
        self.actions.push(RecordedAction {
            at: self.clock,
            action,
        });
    }

    fn require_instrument(&self) -> Result<()> {
        if self.instrument.is_none() {
            bail!("MockPipette: no instrument loaded");
        }
        Ok(())
    }

    fn require_tip(&self, operation: &str) -> Result<()> {
        self.require_instrument()?;
        if self.tip.is_none() {
            bail!("MockPipette: cannot {} without a tip", operation);
        }
        Ok(())
    }

    fn require_labware(&self, role: LabwareRole) -> Result<()> {
        if !self.labware.contains_key(&role) {
            bail!("MockPipette: no {} loaded", role);
        }
        Ok(())
    }
}

/// Simulated single-channel pipette
///
/// Cloning shares the same underlying state, so a test can hand one clone to
/// the run controller and inspect the trace through another.
#[derive(Clone)]
pub struct MockPipette {
    state: Arc<RwLock<MockState>>,
    pacing: Pacing,
    tip_capacity_ul: f64,
    well_depth_mm: HashMap<LabwareRole, f64>,
}

impl MockPipette {
    /// Create an empty deck with instant pacing
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::new())),
            pacing: Pacing::Instant,
            tip_capacity_ul: DEFAULT_TIP_CAPACITY_UL,
            well_depth_mm: HashMap::from([
                // 50 mL conical tube
                (LabwareRole::Reservoir, 113.0),
                (LabwareRole::Plate, 30.0),
                (LabwareRole::TipRack, 0.0),
            ]),
        }
    }

    /// Select pacing for `delay`
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Override tip capacity (µL)
    pub fn with_tip_capacity(mut self, capacity_ul: f64) -> Self {
        self.tip_capacity_ul = capacity_ul;
        self
    }

    /// Override the depth of wells on one labware (mm)
    pub fn with_well_depth(mut self, role: LabwareRole, depth_mm: f64) -> Self {
        self.well_depth_mm.insert(role, depth_mm);
        self
    }

    /// Fail the `index`-th recorded action (0-based) instead of performing it
    pub async fn fail_at_action(&self, index: usize) {
        self.state.write().await.fail_at = Some(index);
    }

    /// Everything recorded so far
    pub async fn actions(&self) -> Vec<RecordedAction> {
        self.state.read().await.actions.clone()
    }

    /// Virtual time elapsed
    pub async fn elapsed(&self) -> Duration {
        self.state.read().await.clock
    }

    /// Check whether a tip is attached
    pub async fn tip_attached(&self) -> bool {
        self.state.read().await.tip.is_some()
    }

    /// Liquid currently in the tip (µL)
    pub async fn tip_volume(&self) -> f64 {
        self.state.read().await.tip_volume_ul
    }

    /// Current default travel speed (mm/s)
    pub async fn default_speed(&self) -> f64 {
        self.state.read().await.default_speed_mm_s
    }

    fn check_reachable(&self, role: LabwareRole, z_offset_mm: f64) -> Result<()> {
        if !z_offset_mm.is_finite() {
            bail!("MockPipette: offset {} on the {} is not a position", z_offset_mm, role);
        }
        let depth = self.well_depth_mm.get(&role).copied().unwrap_or(0.0);
        if z_offset_mm < -depth {
            bail!(
                "MockPipette: {:.2} mm is below the bottom of the {} ({:.2} mm deep)",
                z_offset_mm,
                role,
                depth
            );
        }
        Ok(())
    }

    fn check_location(&self, state: &MockState, location: &Location) -> Result<()> {
        state.require_labware(location.labware)?;
        self.check_reachable(location.labware, location.z_offset_mm)
    }
}

impl Default for MockPipette {
    fn default() -> Self {
        Self::new()
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0) {
        return Err(anyhow!("MockPipette: {} must be positive, got {}", name, value));
    }
    Ok(())
}

#[async_trait]
impl LiquidHandler for MockPipette {
    async fn load_labware(&self, role: LabwareRole, kind: &str, slot: u8) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::LoadLabware {
            role,
            kind: kind.to_string(),
            slot,
        };
        state.check_fault(&action)?;
        if let Some(other) = state
            .labware
            .iter()
            .find_map(|(r, (_, s))| (*s == slot && *r != role).then_some(*r))
        {
            bail!("MockPipette: slot {} already holds the {}", slot, other);
        }
        state.labware.insert(role, (kind.to_string(), slot));
        state.record(action);
        Ok(())
    }

    async fn load_instrument(&self, kind: &str, mount: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::LoadInstrument {
            kind: kind.to_string(),
            mount: mount.to_string(),
        };
        state.check_fault(&action)?;
        state.instrument = Some((kind.to_string(), mount.to_string()));
        state.record(action);
        Ok(())
    }

    async fn pick_up_tip(&self, well: Well) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::PickUpTip { well };
        state.check_fault(&action)?;
        state.require_instrument()?;
        state.require_labware(LabwareRole::TipRack)?;
        if let Some(held) = state.tip {
            bail!("MockPipette: tip from {} already attached", held);
        }
        if !state.used_tips.insert(well) {
            bail!("MockPipette: tip rack well {} is empty", well);
        }
        state.tip = Some(well);
        state.tip_volume_ul = 0.0;
        state.last_well = Some((LabwareRole::TipRack, well));
        state.record(action);
        Ok(())
    }

    async fn drop_tip(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::DropTip;
        state.check_fault(&action)?;
        state.require_tip("drop tip")?;
        state.tip = None;
        state.tip_volume_ul = 0.0;
        state.last_well = None;
        state.record(action);
        Ok(())
    }

    async fn aspirate(&self, volume_ul: f64, location: Location, rate: f64) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::Aspirate {
            volume_ul,
            location,
            rate,
        };
        state.check_fault(&action)?;
        state.require_tip("aspirate")?;
        require_positive("aspirate volume", volume_ul)?;
        require_positive("aspirate rate", rate)?;
        self.check_location(&state, &location)?;
        let total = state.tip_volume_ul + volume_ul;
        if total > self.tip_capacity_ul {
            bail!(
                "MockPipette: aspirating {:.1} µL would put {:.1} µL in a {:.1} µL tip",
                volume_ul,
                total,
                self.tip_capacity_ul
            );
        }
        state.tip_volume_ul = total;
        state.last_well = Some((location.labware, location.well));
        state.record(action);
        Ok(())
    }

    async fn dispense(&self, volume_ul: f64, location: Location, rate: f64) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::Dispense {
            volume_ul,
            location,
            rate,
        };
        state.check_fault(&action)?;
        state.require_tip("dispense")?;
        require_positive("dispense volume", volume_ul)?;
        require_positive("dispense rate", rate)?;
        self.check_location(&state, &location)?;
        state.tip_volume_ul = (state.tip_volume_ul - volume_ul).max(0.0);
        state.last_well = Some((location.labware, location.well));
        state.record(action);
        Ok(())
    }

    async fn move_to(&self, location: Location, speed_mm_s: f64) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::MoveTo {
            location,
            speed_mm_s,
        };
        state.check_fault(&action)?;
        state.require_instrument()?;
        require_positive("move speed", speed_mm_s)?;
        self.check_location(&state, &location)?;
        state.last_well = Some((location.labware, location.well));
        state.record(action);
        Ok(())
    }

    async fn set_default_speed(&self, speed_mm_s: f64) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::SetDefaultSpeed { speed_mm_s };
        state.check_fault(&action)?;
        require_positive("default speed", speed_mm_s)?;
        state.default_speed_mm_s = speed_mm_s;
        state.record(action);
        Ok(())
    }

    async fn touch_tip(&self, radius: f64, v_offset_mm: f64) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::TouchTip {
            radius,
            v_offset_mm,
        };
        state.check_fault(&action)?;
        state.require_tip("touch tip")?;
        let Some((role, _)) = state.last_well else {
            bail!("MockPipette: touch tip with no current well");
        };
        if !(radius > 0.0 && radius <= 1.5) {
            bail!("MockPipette: touch radius {} out of range", radius);
        }
        self.check_reachable(role, v_offset_mm)?;
        state.record(action);
        Ok(())
    }

    async fn blow_out(&self, location: Location) -> Result<()> {
        let mut state = self.state.write().await;
        let action = Action::BlowOut { location };
        state.check_fault(&action)?;
        state.require_tip("blow out")?;
        self.check_location(&state, &location)?;
        state.tip_volume_ul = 0.0;
        state.last_well = Some((location.labware, location.well));
        state.record(action);
        Ok(())
    }

    async fn delay(&self, duration: Duration) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let action = Action::Delay { duration };
            state.check_fault(&action)?;
            state.record(action);
            state.clock += duration;
        }
        if self.pacing == Pacing::RealTime {
            // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
            sleep(duration).await;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
