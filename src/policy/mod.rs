//! Policy applicability and the gate decision engine.

pub mod applicability;
pub mod gate;

pub use applicability::ApplicabilityResolver;
pub use gate::{Decision, GateDecisionEngine, GateSnapshot};
