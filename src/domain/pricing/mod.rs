// ============================================================================
// Pricing - local formula and total recalculation
// ============================================================================

pub mod formula;
pub mod recalculation;

pub use recalculation::*;
