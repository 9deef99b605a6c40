use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{DecisionResult, PipelineFailure, Position, PositionStatus, Signal};
use crate::Result;

/// A raw payload queued for processing
#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub id: Uuid,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Narrow persistence interface the core writes through.
///
/// Signals, decisions and failures are append-only; positions are inserted on
/// open and updated on refresh/close. `claim_position_close` is the atomic
/// guard that keeps concurrent workers from double-closing a position: only
/// the caller that wins the claim may proceed to close.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_signal(&self, signal: &Signal) -> Result<()>;

    async fn save_decision(&self, decision: &DecisionResult) -> Result<()>;

    async fn save_failure(&self, failure: &PipelineFailure) -> Result<()>;

    async fn insert_position(&self, position: &Position) -> Result<()>;

    async fn update_position(&self, position: &Position) -> Result<()>;

    /// Atomically claim an open position for closing. Returns false when the
    /// position is already closed or another worker holds the claim.
    async fn claim_position_close(&self, position_id: Uuid) -> Result<bool>;

    /// Release a claim after a failed close attempt so a later sweep retries.
    async fn release_position_claim(&self, position_id: Uuid) -> Result<()>;

    async fn fetch_open_positions(&self) -> Result<Vec<Position>>;

    async fn fetch_pending_signals(&self, limit: usize) -> Result<Vec<PendingSignal>>;

    async fn mark_signal_processed(&self, pending_id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    signals: Vec<Signal>,
    decisions: Vec<DecisionResult>,
    failures: Vec<PipelineFailure>,
    positions: HashMap<Uuid, Position>,
    pending: Vec<PendingSignal>,
    processed: HashSet<Uuid>,
    close_claims: HashSet<Uuid>,
}

/// In-memory store.
///
/// Backs the bot when no DATABASE_URL is configured (audit records vanish on
/// restart) and stands in for Postgres in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload for the pipeline's driving loop
    pub fn push_pending(&self, payload: Value) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending.push(PendingSignal {
                id,
                payload,
                received_at: Utc::now(),
            });
        }
        id
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.inner.lock().map(|i| i.signals.clone()).unwrap_or_default()
    }

    pub fn decisions(&self) -> Vec<DecisionResult> {
        self.inner.lock().map(|i| i.decisions.clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<PipelineFailure> {
        self.inner.lock().map(|i| i.failures.clone()).unwrap_or_default()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.inner
            .lock()
            .map(|i| i.positions.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_signal(&self, signal: &Signal) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.signals.push(signal.clone());
        Ok(())
    }

    async fn save_decision(&self, decision: &DecisionResult) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.decisions.push(decision.clone());
        Ok(())
    }

    async fn save_failure(&self, failure: &PipelineFailure) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        // One failure record per tracking id
        if inner.failures.iter().any(|f| f.tracking_id == failure.tracking_id) {
            return Ok(());
        }
        inner.failures.push(failure.clone());
        Ok(())
    }

    async fn insert_position(&self, position: &Position) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn claim_position_close(&self, position_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        let is_open = inner
            .positions
            .get(&position_id)
            .map(|p| p.status == PositionStatus::Open)
            .unwrap_or(false);
        if !is_open {
            return Ok(false);
        }
        Ok(inner.close_claims.insert(position_id))
    }

    async fn release_position_claim(&self, position_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.close_claims.remove(&position_id);
        Ok(())
    }

    async fn fetch_open_positions(&self) -> Result<Vec<Position>> {
        let inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        Ok(inner
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn fetch_pending_signals(&self, limit: usize) -> Result<Vec<PendingSignal>> {
        let inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        Ok(inner
            .pending
            .iter()
            .filter(|p| !inner.processed.contains(&p.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_signal_processed(&self, pending_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| "store lock poisoned")?;
        inner.processed.insert(pending_id);
        Ok(())
    }
}
