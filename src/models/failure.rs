use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::{DecisionResult, Signal};

/// Pipeline stage at which processing terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineStage {
    Reception,
    Normalization,
    Validation,
    Deduplication,
    Decision,
    Execution,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Reception => "RECEPTION",
            PipelineStage::Normalization => "NORMALIZATION",
            PipelineStage::Validation => "VALIDATION",
            PipelineStage::Deduplication => "DEDUPLICATION",
            PipelineStage::Decision => "DECISION",
            PipelineStage::Execution => "EXECUTION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RECEPTION" => Some(PipelineStage::Reception),
            "NORMALIZATION" => Some(PipelineStage::Normalization),
            "VALIDATION" => Some(PipelineStage::Validation),
            "DEDUPLICATION" => Some(PipelineStage::Deduplication),
            "DECISION" => Some(PipelineStage::Decision),
            "EXECUTION" => Some(PipelineStage::Execution),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one signal failing at one stage.
///
/// Written exactly once per failing signal and never mutated. `signal_id` is
/// None when the failure happened before a Signal object existed (reception
/// or normalization); `tracking_id` is synthetic in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub tracking_id: Uuid,
    pub signal_id: Option<Uuid>,
    pub stage: PipelineStage,
    pub reason: String,
    /// Snapshot of the raw payload as received
    pub signal_data: Value,
    pub timestamp: DateTime<Utc>,
}

/// What `SignalPipeline::process_signal` hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub tracking_id: Uuid,
    pub signal: Option<Signal>,
    pub decision: Option<DecisionResult>,
    pub failure_reason: Option<String>,
    pub stage: PipelineStage,
}
