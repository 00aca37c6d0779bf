//! Run configuration using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (the values of the 80 µL/s proxy viscometer protocol)
//! 2. A TOML file (`config/viscometer.toml` by default)
//! 3. Environment variables prefixed with `VISCO_`, `__` separating nested keys
//!
//! # Environment Variable Overrides
//!
//! ```text
//! VISCO_APPLICATION__LOG_LEVEL=debug
//! VISCO_RUN__SAMPLE_COUNT=2
//! VISCO_RUN__START_DEPTH_MM=-75
//! VISCO_TECHNIQUE__BLOWOUT_COUNT=12
//! ```
//!
//! # Example
//!
//! ```no_run
//! use proxy_viscometer::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load_from("config/viscometer.toml")?;
//!     println!("Flow rates: {:?}", settings.run.flow_rates);
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, ViscoError};
use crate::labware::Well;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/viscometer.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "VISCO_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// What to run: flow rates, samples, durations, depth model
    pub run: RunConfig,
    /// How to handle the fluid: fixed rates, volumes, dwells, touches
    pub technique: Technique,
    /// Labware and instrument placement
    pub deck: DeckLayout,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Reservoir geometry: `height_mm` of liquid column per `reference_volume_ml`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselGeometry {
    /// Height of the liquid column for the reference volume (mm)
    pub height_mm: f64,
    /// Reference volume (mL)
    pub reference_volume_ml: f64,
}

impl VesselGeometry {
    /// Millimetres of level drop per millilitre withdrawn.
    pub fn mm_per_ml(&self) -> f64 {
        self.height_mm / self.reference_volume_ml
    }
}

impl Default for VesselGeometry {
    fn default() -> Self {
        // 50 mL conical tube: 5 mL spans 9 mm of height
        Self {
            height_mm: 9.0,
            reference_volume_ml: 5.0,
        }
    }
}

/// Immutable description of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Dispense flow rates to sweep, in order (µL/s)
    pub flow_rates: Vec<f64>,
    /// Number of samples (one reservoir + one destination each)
    pub sample_count: usize,
    /// Transfers per flow rate
    pub replicates: usize,
    /// Aspiration time; volume = flow rate × this
    #[serde(with = "humantime_serde")]
    pub aspiration_duration: Duration,
    /// Dispense time; must equal `aspiration_duration`
    #[serde(with = "humantime_serde")]
    pub dispense_duration: Duration,
    /// Settle time after aspirating, with the dose in the tip
    #[serde(with = "humantime_serde")]
    pub aspirate_settle: Duration,
    /// Settle time after dispensing into the destination
    #[serde(with = "humantime_serde")]
    pub dispense_settle: Duration,
    /// Aspiration depth at the start of each sample (mm from vessel top, ≤ 0)
    pub start_depth_mm: f64,
    /// Reservoir level model
    pub geometry: VesselGeometry,
    /// Reservoir row letter per sample index
    pub reservoir_letters: Vec<char>,
    /// Destination row letter per sample index
    pub destination_letters: Vec<char>,
    /// Instrument default flow rate, used to normalise rates (µL/s)
    pub default_flow_rate: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            flow_rates: vec![80.0],
            sample_count: 1,
            replicates: 1,
            aspiration_duration: Duration::from_secs(10),
            dispense_duration: Duration::from_secs(10),
            aspirate_settle: Duration::from_secs(30),
            dispense_settle: Duration::from_secs(30),
            // ~12.5 mL below the rim of a tube filled to ~20 mL
            start_depth_mm: -80.0,
            geometry: VesselGeometry::default(),
            reservoir_letters: vec!['A', 'C'],
            destination_letters: vec!['A', 'B'],
            // P1000 single-channel GEN2
            default_flow_rate: 274.7,
        }
    }
}

impl RunConfig {
    /// Volume moved by one transfer at `flow_rate` (µL).
    pub fn transfer_volume(&self, flow_rate: f64) -> f64 {
        flow_rate * self.aspiration_duration.as_secs_f64()
    }

    /// Rate expressed relative to the instrument default flow rate.
    pub fn relative_rate(&self, ul_per_s: f64) -> f64 {
        ul_per_s / self.default_flow_rate
    }

    /// Reservoir well owned by `sample_index`.
    pub fn reservoir_well(&self, sample_index: usize) -> AppResult<Well> {
        letter_well(&self.reservoir_letters, sample_index, "reservoir_letters")
    }

    /// Destination well owned by `sample_index`.
    pub fn destination_well(&self, sample_index: usize) -> AppResult<Well> {
        letter_well(&self.destination_letters, sample_index, "destination_letters")
    }

    /// Reject runs that cannot be executed, before touching hardware.
    pub fn validate(&self) -> AppResult<()> {
        if self.flow_rates.is_empty() {
            return Err(invalid("flow_rates must contain at least one entry"));
        }
        if let Some(rate) = self.flow_rates.iter().find(|r| !(**r > 0.0)) {
            return Err(invalid(format!("flow rate {rate} must be positive")));
        }
        if self.sample_count == 0 {
            return Err(invalid("sample_count must be at least 1"));
        }
        if self.replicates == 0 {
            return Err(invalid("replicates must be at least 1"));
        }
        if self.sample_count > self.reservoir_letters.len() {
            return Err(invalid(format!(
                "sample_count {} exceeds the {} configured reservoir letters",
                self.sample_count,
                self.reservoir_letters.len()
            )));
        }
        if self.sample_count > self.destination_letters.len() {
            return Err(invalid(format!(
                "sample_count {} exceeds the {} configured destination letters",
                self.sample_count,
                self.destination_letters.len()
            )));
        }
        if Well::tip_for_sample(self.sample_count - 1).is_none() {
            return Err(invalid(format!(
                "sample_count {} exceeds the tip rack columns",
                self.sample_count
            )));
        }
        for (name, duration) in [
            ("aspiration_duration", self.aspiration_duration),
            ("dispense_duration", self.dispense_duration),
            ("aspirate_settle", self.aspirate_settle),
            ("dispense_settle", self.dispense_settle),
        ] {
            if duration.is_zero() {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if self.aspiration_duration != self.dispense_duration {
            return Err(invalid(format!(
                "aspiration_duration ({:?}) and dispense_duration ({:?}) must match: \
                 every aspirated dose is dispensed in full",
                self.aspiration_duration, self.dispense_duration
            )));
        }
        if !self.start_depth_mm.is_finite() {
            return Err(invalid(format!(
                "start_depth_mm {} is not a finite depth",
                self.start_depth_mm
            )));
        }
        if self.start_depth_mm > 0.0 {
            return Err(invalid(format!(
                "start_depth_mm {} is above the vessel top",
                self.start_depth_mm
            )));
        }
        if !(self.geometry.height_mm > 0.0) || !(self.geometry.reference_volume_ml > 0.0) {
            return Err(invalid("vessel geometry values must be positive"));
        }
        if !(self.default_flow_rate > 0.0) {
            return Err(invalid("default_flow_rate must be positive"));
        }
        Ok(())
    }
}

fn letter_well(letters: &[char], sample_index: usize, field: &str) -> AppResult<Well> {
    letters
        .get(sample_index)
        .map(|row| Well::new(*row, 1))
        .ok_or_else(|| invalid(format!("{field} has no entry for sample {sample_index}")))
}

fn invalid(msg: impl Into<String>) -> ViscoError {
    ViscoError::Configuration(msg.into())
}

/// A single touch-tip stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TipTouch {
    /// Fraction of the well radius to touch at
    pub radius: f64,
    /// Offset from the vessel top (mm)
    pub v_offset_mm: f64,
}

impl TipTouch {
    /// Touch at `radius` and `v_offset_mm`.
    pub const fn new(radius: f64, v_offset_mm: f64) -> Self {
        Self {
            radius,
            v_offset_mm,
        }
    }
}

/// Fixed handling technique for viscous fluid.
///
/// None of these depend on the flow rate under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Technique {
    /// Aspirate/purge rate; slow enough for viscous fluid to follow (µL/s)
    pub viscous_rate: f64,
    /// Purge dispense volume; the P1000 working maximum (µL)
    pub purge_volume_ul: f64,
    /// Rinse aspirate/dispense volume (µL)
    pub rinse_volume_ul: f64,
    /// Dwell after the purge dispense
    #[serde(with = "humantime_serde")]
    pub purge_settle: Duration,
    /// Dwell after the rinse aspirate
    #[serde(with = "humantime_serde")]
    pub rinse_settle: Duration,
    /// Blow-outs per burst
    pub blowout_count: usize,
    /// Where to park after aspirating (mm from reservoir top)
    pub reposition_offset_mm: f64,
    /// Speed of the park move; slow so the tip does not drip (mm/s)
    pub reposition_speed: f64,
    /// Default travel speed while the tip carries fluid (mm/s)
    pub slow_travel_speed: f64,
    /// Default travel speed once the tip has been purged (mm/s)
    pub fast_travel_speed: f64,
    /// Wall touches after aspirating, deepest first
    pub cleanup_touches: Vec<TipTouch>,
    /// Wall touch after the rinse
    pub purge_touch: TipTouch,
    /// Dispense height above the destination mouth (mm)
    pub dispense_height_mm: f64,
}

impl Default for Technique {
    fn default() -> Self {
        Self {
            viscous_rate: 100.0,
            purge_volume_ul: 1000.0,
            rinse_volume_ul: 400.0,
            purge_settle: Duration::from_secs(20),
            rinse_settle: Duration::from_secs(10),
            blowout_count: 10,
            reposition_offset_mm: -2.0,
            reposition_speed: 5.0,
            slow_travel_speed: 100.0,
            fast_travel_speed: 400.0,
            cleanup_touches: vec![
                TipTouch::new(1.0, -10.0),
                TipTouch::new(1.0, -10.0),
                TipTouch::new(1.0, -6.0),
                TipTouch::new(1.2, -3.0),
            ],
            purge_touch: TipTouch::new(1.0, -10.0),
            dispense_height_mm: 10.0,
        }
    }
}

impl Technique {
    /// Reject non-physical technique values.
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("viscous_rate", self.viscous_rate),
            ("purge_volume_ul", self.purge_volume_ul),
            ("rinse_volume_ul", self.rinse_volume_ul),
            ("reposition_speed", self.reposition_speed),
            ("slow_travel_speed", self.slow_travel_speed),
            ("fast_travel_speed", self.fast_travel_speed),
        ] {
            if !(value > 0.0) {
                return Err(invalid(format!("technique.{name} must be positive")));
            }
        }
        if self.purge_settle.is_zero() || self.rinse_settle.is_zero() {
            return Err(invalid("technique purge/rinse settle times must be positive"));
        }
        // Both the purge and the end-of-sample burst rely on at least one blow-out
        if self.blowout_count == 0 {
            return Err(invalid("technique.blowout_count must be at least 1"));
        }
        for (name, value) in [
            ("reposition_offset_mm", self.reposition_offset_mm),
            ("dispense_height_mm", self.dispense_height_mm),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("technique.{name} must be finite, got {value}")));
            }
        }
        if let Some(touch) = self
            .cleanup_touches
            .iter()
            .chain(std::iter::once(&self.purge_touch))
            .find(|t| !t.v_offset_mm.is_finite())
        {
            return Err(invalid(format!(
                "touch offset {} must be finite",
                touch.v_offset_mm
            )));
        }
        if let Some(touch) = self
            .cleanup_touches
            .iter()
            .chain(std::iter::once(&self.purge_touch))
            .find(|t| !(t.radius > 0.0 && t.radius <= 1.5))
        {
            return Err(invalid(format!(
                "touch radius {} must be within (0, 1.5]",
                touch.radius
            )));
        }
        Ok(())
    }
}

/// A labware definition and the deck slot it sits in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabwareSlot {
    /// Labware definition name
    pub kind: String,
    /// Deck slot (1-11)
    pub slot: u8,
}

/// Pipette definition and mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMount {
    /// Pipette model
    pub kind: String,
    /// `left` or `right`
    pub mount: String,
}

/// Where everything sits on the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckLayout {
    /// Source tube holder
    pub reservoir: LabwareSlot,
    /// Destination plate
    pub plate: LabwareSlot,
    /// Tip rack
    pub tip_rack: LabwareSlot,
    /// Pipette
    pub instrument: InstrumentMount,
}

impl Default for DeckLayout {
    fn default() -> Self {
        Self {
            reservoir: LabwareSlot {
                kind: "amdm_12_50ml_falcon_tube".to_string(),
                slot: 1,
            },
            plate: LabwareSlot {
                kind: "amdm_6_15g_plasticjars".to_string(),
                slot: 2,
            },
            tip_rack: LabwareSlot {
                kind: "opentrons_96_filtertiprack_1000ul".to_string(),
                slot: 3,
            },
            instrument: InstrumentMount {
                kind: "p1000_single_gen2".to_string(),
                mount: "left".to_string(),
            },
        }
    }
}

impl DeckLayout {
    /// Slots must be distinct and on the deck.
    pub fn validate(&self) -> AppResult<()> {
        let slots = [self.reservoir.slot, self.plate.slot, self.tip_rack.slot];
        if let Some(slot) = slots.iter().find(|s| !(1..=11).contains(*s)) {
            return Err(invalid(format!("deck slot {slot} is not in 1-11")));
        }
        if slots[0] == slots[1] || slots[0] == slots[2] || slots[1] == slots[2] {
            return Err(invalid(format!("deck slots must be distinct, got {slots:?}")));
        }
        if !matches!(self.instrument.mount.as_str(), "left" | "right") {
            return Err(invalid(format!(
                "instrument mount '{}' must be 'left' or 'right'",
                self.instrument.mount
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file, then apply `VISCO_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed, or if the result
    /// fails [`Settings::validate`].
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(invalid(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        Self::extract(Self::defaults().merge(Toml::file(path)))
    }

    /// Load from TOML text, then apply `VISCO_` environment overrides.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Self::extract(Self::defaults().merge(Toml::string(toml)))
    }

    /// Built-in values as the lowest layer, so partial nested tables
    /// (`[deck.plate]` with only `slot`) keep the remaining defaults.
    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.run.validate()?;
        self.technique.validate()?;
        self.deck.validate()
    }

    /// Render as TOML (used by `viscometer default-config`).
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| invalid(format!("cannot render TOML: {e}")))
    }
}
