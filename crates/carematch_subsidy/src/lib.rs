// --- File: crates/carematch_subsidy/src/lib.rs ---
// Subsidy waterfall: sponsored-group credit, direct grants, employer percentage.
pub mod calculator;
pub mod error;
pub mod waterfall;
#[cfg(test)]
mod waterfall_proptest;

pub use calculator::SubsidyCalculator;
pub use error::SubsidyError;
pub use waterfall::{compute_waterfall, WaterfallInputs};
