// Canonical data model shared by every pipeline stage
pub mod decision;
pub mod failure;
pub mod position;
pub mod signal;

pub use decision::{
    Decision, DecisionCalculations, DecisionResult, ValidationChecks, ValidationResult,
};
pub use failure::{PipelineFailure, PipelineResult, PipelineStage};
pub use position::{ExitReason, Position, PositionStatus};
pub use signal::{Direction, Signal, SignalSource};
