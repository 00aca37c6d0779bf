//! Tip bookkeeping.
//!
//! Exactly one tip may be held at a time. The state only changes after the
//! driver has confirmed the pick-up or drop, so after a failure it reflects
//! what the robot last did successfully.

use serde::Serialize;

use crate::error::{AppResult, ViscoError};
use crate::labware::Well;

/// Whether the pipette holds a disposable tip, and where it came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TipState {
    held: Option<Well>,
}

impl TipState {
    /// True while a tip is attached.
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Rack well of the attached tip.
    pub fn held(&self) -> Option<Well> {
        self.held
    }

    /// Fail unless the pipette is bare.
    pub fn ensure_empty(&self) -> AppResult<()> {
        match self.held {
            Some(well) => Err(ViscoError::TipAlreadyHeld(well)),
            None => Ok(()),
        }
    }

    /// Fail unless a tip is attached.
    pub fn require(&self) -> AppResult<Well> {
        self.held.ok_or(ViscoError::NoTipHeld)
    }

    /// Mark a tip from `well` as attached.
    pub fn acquire(&mut self, well: Well) -> AppResult<()> {
        self.ensure_empty()?;
        self.held = Some(well);
        Ok(())
    }

    /// Mark the tip as dropped, returning the rack well it came from.
    pub fn release(&mut self) -> AppResult<Well> {
        self.held.take().ok_or(ViscoError::NoTipHeld)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_pair() {
        let mut tip = TipState::default();
        assert!(!tip.is_held());

        tip.acquire(Well::new('A', 1)).unwrap();
        assert_eq!(tip.require().unwrap(), Well::new('A', 1));

        assert_eq!(tip.release().unwrap(), Well::new('A', 1));
        assert!(!tip.is_held());
    }

    #[test]
    fn test_acquire_while_held() {
        let mut tip = TipState::default();
        tip.acquire(Well::new('A', 1)).unwrap();
        let err = tip.acquire(Well::new('A', 2)).unwrap_err();
        assert!(matches!(err, ViscoError::TipAlreadyHeld(w) if w == Well::new('A', 1)));
        assert_eq!(tip.held(), Some(Well::new('A', 1)));
    }

    #[test]
    fn test_release_while_empty() {
        let mut tip = TipState::default();
        assert!(matches!(tip.release(), Err(ViscoError::NoTipHeld)));
        assert!(matches!(tip.require(), Err(ViscoError::NoTipHeld)));
    }
}
