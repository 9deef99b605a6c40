use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{ExitReason, Signal};

/// Outcome of a decision. Entry path produces Enter/Reject, exit path
/// produces Exit/Hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Enter,
    Reject,
    Exit,
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Enter => "ENTER",
            Decision::Reject => "REJECT",
            Decision::Exit => "EXIT",
            Decision::Hold => "HOLD",
        }
    }
}

/// Per-check outcomes, in validation evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChecks {
    pub cooldown: bool,
    pub market_hours: bool,
    pub mtf: bool,
    pub confluence: bool,
    pub time_filters: bool,
}

impl ValidationChecks {
    pub fn all_passed(&self) -> bool {
        self.cooldown && self.market_hours && self.mtf && self.confluence && self.time_filters
    }
}

/// Result of running the validation battery against a signal.
///
/// `rejection_reason` always describes the first failing check in evaluation
/// order (cooldown, market hours, MTF, confluence, time filters), so the same
/// input yields the same reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub checks: ValidationChecks,
    pub rejection_reason: Option<String>,
    pub details: HashMap<String, String>,
}

/// Every intermediate term of the confidence and sizing math, kept for audit.
///
/// `final_confidence` is the sum of the four confidence terms clamped once to
/// [0, 100]; `final_size` is the product of the four sizing terms clamped to
/// the configured ceiling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecisionCalculations {
    pub base_confidence: f64,
    pub context_adjustment: f64,
    pub positioning_adjustment: f64,
    pub gex_adjustment: f64,
    pub final_confidence: f64,
    pub base_sizing: f64,
    pub kelly_multiplier: f64,
    pub regime_multiplier: f64,
    pub confluence_multiplier: f64,
    pub final_size: f64,
}

/// Immutable audit record of one orchestrated decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub id: Uuid,
    pub decision: Decision,
    /// Entry decisions carry the signal they judged; exit decisions do not
    pub signal: Option<Signal>,
    /// Exit decisions carry the position they judged; entry decisions do not
    pub position_id: Option<Uuid>,
    pub confidence: f64,
    pub position_size: f64,
    /// Ordered explanation, disqualifying factors first on rejection
    pub reasoning: Vec<String>,
    pub calculations: DecisionCalculations,
    /// True when an optional input was unavailable and its term defaulted to 0
    pub degraded: bool,
    /// Winning exit rule, set only on the exit path
    pub exit_reason: Option<ExitReason>,
    pub created_at: DateTime<Utc>,
}

impl DecisionResult {
    pub fn signal_id(&self) -> Option<Uuid> {
        self.signal.as_ref().map(|s| s.id)
    }
}
