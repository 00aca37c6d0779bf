//! Hardware abstraction: the driver seam the sequencer talks through.
//!
//! - [`capabilities::LiquidHandler`]: the trait every pipetting backend implements
//! - [`mock::MockPipette`]: in-process simulation used by tests and dry runs

pub mod capabilities;
pub mod mock;

pub use capabilities::LiquidHandler;
pub use mock::{Action, MockPipette, Pacing, RecordedAction};
