// Signal processing pipeline: normalize -> validate -> dedup -> decide -> open
pub mod dedup;
pub mod normalizer;
pub mod validator;

pub use dedup::DeduplicationCache;
pub use normalizer::{NormalizationError, SignalNormalizer};
pub use validator::{SignalValidator, ValidatorConfig};

use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::decision::DecisionOrchestrator;
use crate::execution::{ExecutionAdapter, PositionManager};
use crate::models::{
    Decision, DecisionResult, PipelineFailure, PipelineResult, PipelineStage, Signal,
};
use crate::risk::RiskLimits;
use crate::store::Store;

/// Sequences one raw payload through every stage and records the outcome.
///
/// Any stage failure short-circuits, writes exactly one `PipelineFailure`
/// tagged with the tracking ID and failing stage, and comes back as a
/// non-throwing `PipelineResult`. The only errors that escape are
/// store-level ones (the audit trail itself is unreachable) - those abort a
/// batch, per-signal problems never do.
///
/// The pipeline is stateless per signal; shared state lives in the injected
/// dedup cache, validator cooldowns and position manager, all of which are
/// safe for concurrent invocations.
pub struct SignalPipeline {
    normalizer: SignalNormalizer,
    dedup: Arc<DeduplicationCache>,
    validator: Arc<SignalValidator>,
    orchestrator: Arc<DecisionOrchestrator>,
    position_manager: Arc<Mutex<PositionManager>>,
    execution: Arc<dyn ExecutionAdapter>,
    store: Arc<dyn Store>,
    risk_limits: RiskLimits,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dedup: Arc<DeduplicationCache>,
        validator: Arc<SignalValidator>,
        orchestrator: Arc<DecisionOrchestrator>,
        position_manager: Arc<Mutex<PositionManager>>,
        execution: Arc<dyn ExecutionAdapter>,
        store: Arc<dyn Store>,
        risk_limits: RiskLimits,
    ) -> Self {
        Self {
            normalizer: SignalNormalizer::new(),
            dedup,
            validator,
            orchestrator,
            position_manager,
            execution,
            store,
            risk_limits,
        }
    }

    /// Process one raw payload end to end.
    ///
    /// Returns Err only when the store itself fails; every per-signal problem
    /// is reported through the result.
    pub async fn process_signal(&self, raw: &Value) -> crate::Result<PipelineResult> {
        if raw.is_null() {
            return self
                .fail(
                    Uuid::new_v4(),
                    None,
                    PipelineStage::Reception,
                    "empty payload".to_string(),
                    raw,
                    None,
                    None,
                )
                .await;
        }

        // Normalization: failures get a synthetic tracking ID since no
        // Signal (and therefore no signal-owned ID) ever existed
        let signal = match self.normalizer.normalize(raw) {
            Ok(signal) => signal,
            Err(e) => {
                return self
                    .fail(
                        Uuid::new_v4(),
                        None,
                        PipelineStage::Normalization,
                        e.to_string(),
                        raw,
                        None,
                        None,
                    )
                    .await;
            }
        };
        let tracking_id = signal.id;
        self.store.save_signal(&signal).await?;
        tracing::debug!(tracking_id = %tracking_id, symbol = %signal.symbol, "signal normalized");

        // Validation
        let validation = self.validator.validate(&signal);
        if !validation.valid {
            let reason = validation
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "validation failed".to_string());
            return self
                .fail(
                    tracking_id,
                    Some(tracking_id),
                    PipelineStage::Validation,
                    reason,
                    raw,
                    Some(signal),
                    None,
                )
                .await;
        }

        // Deduplication: first sighting registers the fingerprint
        if self.dedup.is_duplicate(&signal, raw) {
            return self
                .fail(
                    tracking_id,
                    Some(tracking_id),
                    PipelineStage::Deduplication,
                    format!(
                        "duplicate signal within {}s window",
                        self.dedup.window_secs()
                    ),
                    raw,
                    Some(signal),
                    None,
                )
                .await;
        }

        // Decision
        let decision = self
            .orchestrator
            .orchestrate_entry_decision(&signal, &validation)
            .await;
        self.store.save_decision(&decision).await?;

        if decision.decision != Decision::Enter {
            let reason = decision.reasoning.join("; ");
            return self
                .fail(
                    tracking_id,
                    Some(tracking_id),
                    PipelineStage::Decision,
                    reason,
                    raw,
                    Some(signal),
                    Some(decision),
                )
                .await;
        }

        // Risk limits gate the act of opening, not the decision math
        let (open_count, entries_today) = {
            let mut pm = self
                .position_manager
                .lock()
                .map_err(|_| "position manager lock poisoned")?;
            (pm.open_count(), pm.entries_today())
        };
        if let Err(trip) = self.risk_limits.check(open_count, entries_today) {
            return self
                .fail(
                    tracking_id,
                    Some(tracking_id),
                    PipelineStage::Decision,
                    format!("risk limit: {trip}"),
                    raw,
                    Some(signal),
                    Some(decision),
                )
                .await;
        }

        // Execution: the signal and decision stay behind as audit records
        // even when the order is rejected
        let fill_price = match self
            .execution
            .submit_order(&signal.symbol, signal.direction, decision.position_size)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                return self
                    .fail(
                        tracking_id,
                        Some(tracking_id),
                        PipelineStage::Execution,
                        e.to_string(),
                        raw,
                        Some(signal),
                        Some(decision),
                    )
                    .await;
            }
        };

        let position = {
            let mut pm = self
                .position_manager
                .lock()
                .map_err(|_| "position manager lock poisoned")?;
            pm.open_position(&decision, fill_price)
        };
        let position = match position {
            Ok(position) => position,
            Err(e) => {
                return self
                    .fail(
                        tracking_id,
                        Some(tracking_id),
                        PipelineStage::Execution,
                        e.to_string(),
                        raw,
                        Some(signal),
                        Some(decision),
                    )
                    .await;
            }
        };
        self.store.insert_position(&position).await?;

        // The entry starts the trading-throttle clock for this symbol+direction
        self.validator.record_entry(&signal.symbol, signal.direction);

        tracing::info!(
            tracking_id = %tracking_id,
            symbol = %signal.symbol,
            "✅ signal entered: position {} x{:.2} @ {:.4}",
            position.id,
            position.quantity,
            position.entry_price
        );

        Ok(PipelineResult {
            success: true,
            tracking_id,
            signal: Some(signal),
            decision: Some(decision),
            failure_reason: None,
            stage: PipelineStage::Execution,
        })
    }

    /// Process a whole batch with per-signal error isolation: one signal's
    /// failure never prevents the rest from being attempted. Only a store
    /// failure aborts the remainder (already-produced results stay valid).
    pub async fn process_signal_batch(&self, raws: &[Value]) -> Vec<PipelineResult> {
        self.process_signal_batch_until(raws, None).await
    }

    /// Batch processing with a deadline. Items not started by the deadline
    /// are abandoned; committed results are untouched (partial completion is
    /// a terminal state, not an error).
    pub async fn process_signal_batch_until(
        &self,
        raws: &[Value],
        deadline: Option<Instant>,
    ) -> Vec<PipelineResult> {
        let mut results = Vec::with_capacity(raws.len());

        for (index, raw) in raws.iter().enumerate() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        "batch deadline reached, abandoning {} remaining signal(s)",
                        raws.len() - index
                    );
                    break;
                }
            }

            match self.process_signal(raw).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("store failure, aborting batch after {index} item(s): {e}");
                    break;
                }
            }
        }

        results
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        tracking_id: Uuid,
        signal_id: Option<Uuid>,
        stage: PipelineStage,
        reason: String,
        raw: &Value,
        signal: Option<Signal>,
        decision: Option<DecisionResult>,
    ) -> crate::Result<PipelineResult> {
        let failure = PipelineFailure {
            tracking_id,
            signal_id,
            stage,
            reason: reason.clone(),
            signal_data: raw.clone(),
            timestamp: Utc::now(),
        };
        self.store.save_failure(&failure).await?;

        tracing::debug!(
            tracking_id = %tracking_id,
            stage = %stage,
            "signal failed: {reason}"
        );

        Ok(PipelineResult {
            success: false,
            tracking_id,
            signal,
            decision,
            failure_reason: Some(reason),
            stage,
        })
    }
}
