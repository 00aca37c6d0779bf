//! Well and position addressing.
//!
//! Positions are always expressed the way the deck is calibrated: a labware
//! role, a well on that labware, and a vertical offset in millimetres from the
//! top of the vessel. Negative offsets go down into the vessel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three pieces of labware a run touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabwareRole {
    /// Source tubes holding the viscous fluid
    Reservoir,
    /// Destination wells the doses are measured in
    Plate,
    /// Disposable tip rack
    TipRack,
}

impl fmt::Display for LabwareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabwareRole::Reservoir => "reservoir",
            LabwareRole::Plate => "plate",
            LabwareRole::TipRack => "tip rack",
        };
        f.write_str(name)
    }
}

/// A well addressed by row letter and 1-based column, e.g. `A1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Well {
    /// Row letter (`A`, `B`, ...)
    pub row: char,
    /// 1-based column number
    pub column: u8,
}

impl Well {
    /// Build a well from a row letter and column.
    pub fn new(row: char, column: u8) -> Self {
        Self {
            row: row.to_ascii_uppercase(),
            column,
        }
    }

    /// Tip rack well for a sample: row `A`, column `sample_index + 1`.
    ///
    /// Returns `None` past the last column a `u8` can address.
    pub fn tip_for_sample(sample_index: usize) -> Option<Self> {
        let column = u8::try_from(sample_index + 1).ok()?;
        Some(Self::new('A', column))
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.column)
    }
}

/// A point the pipette can be sent to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Which labware the well belongs to
    pub labware: LabwareRole,
    /// Target well
    pub well: Well,
    /// Offset from the vessel top in mm (negative = inside the vessel)
    pub z_offset_mm: f64,
}

impl Location {
    /// Top of a well, offset vertically by `z_offset_mm`.
    pub fn top(labware: LabwareRole, well: Well, z_offset_mm: f64) -> Self {
        Self {
            labware,
            well,
            z_offset_mm,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} top({:+.2} mm)",
            self.labware, self.well, self.z_offset_mm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_display() {
        assert_eq!(Well::new('c', 1).to_string(), "C1");
        assert_eq!(Well::new('A', 12).to_string(), "A12");
    }

    #[test]
    fn test_tip_for_sample() {
        assert_eq!(Well::tip_for_sample(0), Some(Well::new('A', 1)));
        assert_eq!(Well::tip_for_sample(3), Some(Well::new('A', 4)));
        assert_eq!(Well::tip_for_sample(255), None);
    }

    #[test]
    fn test_location_display() {
        let loc = Location::top(LabwareRole::Reservoir, Well::new('A', 1), -80.0);
        assert_eq!(loc.to_string(), "reservoir A1 top(-80.00 mm)");
    }
}
