// Entry and exit decision engine
pub mod orchestrator;
pub mod sizing;

pub use orchestrator::{clamp_confidence, DecisionConfig, DecisionOrchestrator, ExitSnapshot};
pub use sizing::{confluence_multiplier, kelly_multiplier, regime_multiplier, KellyParams};
