use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Decision, DecisionResult, ExitReason, Position, PositionStatus,
};

#[derive(Debug, Error)]
pub enum InvalidCloseError {
    #[error("position {0} not found")]
    NotFound(Uuid),
    #[error("position {0} is already closed")]
    AlreadyClosed(Uuid),
    #[error("exit quantity {requested} exceeds open quantity {available} on position {id}")]
    OverClose {
        id: Uuid,
        requested: f64,
        available: f64,
    },
}

/// Owns the position state machine: Open -> Closed, with Closed terminal.
///
/// Partial closes spawn an independent closed lot carrying its own realized
/// P&L while the remainder stays open at the original entry price. Closed
/// positions are never deleted; they are the audit trail.
///
/// The manager is synchronous and single-threaded by itself; callers share it
/// behind `Arc<Mutex<...>>` and persist through the store. The store's
/// conditional claim guards the close path against racing workers.
pub struct PositionManager {
    positions: Vec<Position>,
    entries_day: NaiveDate,
    entries_today: u32,
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            entries_day: Utc::now().date_naive(),
            entries_today: 0,
        }
    }

    /// Restore from persisted positions at startup so the exit monitor
    /// resumes supervision across restarts.
    pub fn with_positions(positions: Vec<Position>) -> Self {
        let open = positions.iter().filter(|p| p.is_open()).count();
        let total_pnl: f64 = positions.iter().filter_map(|p| p.realized_pnl).sum();

        tracing::info!(
            "Restored {} positions ({} open, realized P&L ${:.2})",
            positions.len(),
            open,
            total_pnl
        );

        Self {
            positions,
            entries_day: Utc::now().date_naive(),
            entries_today: 0,
        }
    }

    /// Create a new open position from an ENTER decision.
    ///
    /// `fill_price` comes from the execution adapter; quantity is the
    /// decision's final size.
    pub fn open_position(
        &mut self,
        decision: &DecisionResult,
        fill_price: f64,
    ) -> anyhow::Result<Position> {
        self.open_position_at(decision, fill_price, Utc::now())
    }

    pub fn open_position_at(
        &mut self,
        decision: &DecisionResult,
        fill_price: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Position> {
        if decision.decision != Decision::Enter {
            anyhow::bail!("cannot open a position from a {} decision", decision.decision.as_str());
        }
        let signal = decision
            .signal
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ENTER decision carries no signal"))?;
        if decision.position_size <= 0.0 {
            anyhow::bail!("cannot open a zero-size position");
        }

        let position = Position {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            quantity: decision.position_size,
            entry_price: fill_price,
            entry_time: now,
            current_price: Some(fill_price),
            unrealized_pnl: Some(0.0),
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            exit_reason: None,
            expires_at: signal.metadata_datetime("expiration"),
            status: PositionStatus::Open,
        };

        self.bump_daily_entries(now);
        self.positions.push(position.clone());

        tracing::info!(
            "Opened {} {} x{:.2} @ {:.4} (signal {})",
            position.symbol,
            position.direction,
            position.quantity,
            position.entry_price,
            position.signal_id
        );

        Ok(position)
    }

    /// Update the mark and recompute unrealized P&L. No state transition.
    pub fn refresh_price(&mut self, position_id: Uuid, current_price: f64) -> anyhow::Result<Position> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or_else(|| anyhow::anyhow!("position {position_id} not found"))?;

        if position.status == PositionStatus::Closed {
            anyhow::bail!("cannot refresh closed position {position_id}");
        }

        position.current_price = Some(current_price);
        position.unrealized_pnl = Some((current_price - position.entry_price) * position.quantity);
        Ok(position.clone())
    }

    /// Close all or part of a position.
    ///
    /// A full close transitions the position to Closed. A partial close
    /// spawns a closed lot for the exited quantity (its own realized P&L at
    /// the original entry basis) and leaves the remainder open unchanged.
    /// Returns the closed lot.
    pub fn close_position(
        &mut self,
        position_id: Uuid,
        exit_price: f64,
        exit_quantity: f64,
        reason: ExitReason,
    ) -> Result<Position, InvalidCloseError> {
        self.close_position_at(position_id, exit_price, exit_quantity, reason, Utc::now())
    }

    pub fn close_position_at(
        &mut self,
        position_id: Uuid,
        exit_price: f64,
        exit_quantity: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Position, InvalidCloseError> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(InvalidCloseError::NotFound(position_id))?;

        if position.status == PositionStatus::Closed {
            return Err(InvalidCloseError::AlreadyClosed(position_id));
        }
        if exit_quantity > position.quantity {
            return Err(InvalidCloseError::OverClose {
                id: position_id,
                requested: exit_quantity,
                available: position.quantity,
            });
        }

        if exit_quantity == position.quantity {
            // Full close: terminal transition
            position.status = PositionStatus::Closed;
            position.exit_price = Some(exit_price);
            position.exit_time = Some(now);
            position.exit_reason = Some(reason);
            position.realized_pnl = Some((exit_price - position.entry_price) * position.quantity);
            position.current_price = Some(exit_price);
            position.unrealized_pnl = None;

            let closed = position.clone();
            tracing::info!(
                "Closed {} x{:.2} @ {:.4} -> P&L ${:.2} ({:?})",
                closed.symbol,
                closed.quantity,
                exit_price,
                closed.realized_pnl.unwrap_or(0.0),
                reason
            );
            return Ok(closed);
        }

        // Partial close: lot out the exited quantity, keep the rest open at
        // the original entry basis
        position.quantity -= exit_quantity;
        if let Some(price) = position.current_price {
            position.unrealized_pnl = Some((price - position.entry_price) * position.quantity);
        }

        let lot = Position {
            id: Uuid::new_v4(),
            signal_id: position.signal_id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            quantity: exit_quantity,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            current_price: Some(exit_price),
            unrealized_pnl: None,
            exit_price: Some(exit_price),
            exit_time: Some(now),
            realized_pnl: Some((exit_price - position.entry_price) * exit_quantity),
            exit_reason: Some(reason),
            expires_at: position.expires_at,
            status: PositionStatus::Closed,
        };

        tracing::info!(
            "Partially closed {} x{:.2} @ {:.4} -> P&L ${:.2}, {:.2} still open",
            lot.symbol,
            exit_quantity,
            exit_price,
            lot.realized_pnl.unwrap_or(0.0),
            self.positions
                .iter()
                .find(|p| p.id == position_id)
                .map(|p| p.quantity)
                .unwrap_or(0.0)
        );

        self.positions.push(lot.clone());
        Ok(lot)
    }

    pub fn position(&self, position_id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    /// Clones of all open positions (safe to hand to async sweeps)
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.iter().filter_map(|p| p.realized_pnl).sum()
    }

    /// Entries opened today (UTC day, rolls over automatically)
    pub fn entries_today(&mut self) -> u32 {
        self.entries_today_at(Utc::now())
    }

    pub fn entries_today_at(&mut self, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        if today != self.entries_day {
            self.entries_day = today;
            self.entries_today = 0;
        }
        self.entries_today
    }

    fn bump_daily_entries(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.entries_day {
            self.entries_day = today;
            self.entries_today = 0;
        }
        self.entries_today += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DecisionCalculations, Direction, Signal, SignalSource,
    };

    fn enter_decision(symbol: &str, direction: Direction, size: f64) -> DecisionResult {
        let signal = Signal {
            id: Uuid::new_v4(),
            source: SignalSource::Tradingview,
            symbol: symbol.to_string(),
            direction,
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        };
        DecisionResult {
            id: Uuid::new_v4(),
            decision: Decision::Enter,
            signal: Some(signal),
            position_id: None,
            confidence: 75.0,
            position_size: size,
            reasoning: vec!["test entry".to_string()],
            calculations: DecisionCalculations::default(),
            degraded: false,
            exit_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_position_from_enter_decision() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);

        let position = pm.open_position(&decision, 4.0).unwrap();

        assert_eq!(position.symbol, "SPY");
        assert_eq!(position.quantity, 10.0);
        assert_eq!(position.entry_price, 4.0);
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.signal_id, decision.signal_id().unwrap());
        assert_eq!(pm.open_count(), 1);
        assert_eq!(pm.entries_today(), 1);
    }

    #[test]
    fn test_cannot_open_from_reject_decision() {
        let mut pm = PositionManager::new();
        let mut decision = enter_decision("SPY", Direction::Call, 10.0);
        decision.decision = Decision::Reject;

        assert!(pm.open_position(&decision, 4.0).is_err());
    }

    #[test]
    fn test_refresh_price_updates_unrealized_pnl() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        let refreshed = pm.refresh_price(position.id, 4.5).unwrap();
        assert_eq!(refreshed.current_price, Some(4.5));
        assert_eq!(refreshed.unrealized_pnl, Some(5.0)); // (4.5 - 4.0) * 10
        assert_eq!(refreshed.status, PositionStatus::Open);
    }

    #[test]
    fn test_full_close() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        let closed = pm
            .close_position(position.id, 6.0, 10.0, ExitReason::ProfitTarget)
            .unwrap();

        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, Some(20.0)); // (6 - 4) * 10
        assert_eq!(closed.exit_price, Some(6.0));
        assert_eq!(closed.exit_reason, Some(ExitReason::ProfitTarget));
        assert_eq!(pm.open_count(), 0);
    }

    #[test]
    fn test_partial_close_spawns_lot_and_keeps_remainder_open() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        let lot = pm
            .close_position(position.id, 5.0, 4.0, ExitReason::ProfitTarget)
            .unwrap();

        // The lot: own id, exited quantity, P&L at the original basis
        assert_ne!(lot.id, position.id);
        assert_eq!(lot.quantity, 4.0);
        assert_eq!(lot.realized_pnl, Some(4.0)); // (5 - 4) * 4
        assert_eq!(lot.entry_price, 4.0);
        assert_eq!(lot.status, PositionStatus::Closed);

        // The remainder: same id, reduced quantity, unchanged entry
        let remainder = pm.position(position.id).unwrap();
        assert_eq!(remainder.quantity, 6.0);
        assert_eq!(remainder.entry_price, 4.0);
        assert_eq!(remainder.status, PositionStatus::Open);
        assert_eq!(remainder.realized_pnl, None);
        assert_eq!(pm.open_count(), 1);
    }

    #[test]
    fn test_partial_then_full_close_matches_single_close_pnl() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        // Close 4 then 6, both at 5.0: total must equal closing 10 at 5.0
        pm.close_position(position.id, 5.0, 4.0, ExitReason::ProfitTarget)
            .unwrap();
        pm.close_position(position.id, 5.0, 6.0, ExitReason::ProfitTarget)
            .unwrap();

        assert_eq!(pm.total_realized_pnl(), 10.0); // (5 - 4) * 10
        assert_eq!(pm.open_count(), 0);
    }

    #[test]
    fn test_over_close_fails() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        let result = pm.close_position(position.id, 5.0, 11.0, ExitReason::Manual);
        assert!(matches!(result, Err(InvalidCloseError::OverClose { .. })));

        // Still fully open
        assert_eq!(pm.position(position.id).unwrap().quantity, 10.0);
    }

    #[test]
    fn test_double_close_fails() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        let position = pm.open_position(&decision, 4.0).unwrap();

        pm.close_position(position.id, 5.0, 10.0, ExitReason::ProfitTarget)
            .unwrap();
        let result = pm.close_position(position.id, 5.5, 10.0, ExitReason::Manual);

        assert!(matches!(result, Err(InvalidCloseError::AlreadyClosed(_))));
    }

    #[test]
    fn test_close_unknown_position_fails() {
        let mut pm = PositionManager::new();
        let result = pm.close_position(Uuid::new_v4(), 5.0, 1.0, ExitReason::Manual);
        assert!(matches!(result, Err(InvalidCloseError::NotFound(_))));
    }

    #[test]
    fn test_restore_from_persistence() {
        let mut pm = PositionManager::new();
        let decision_a = enter_decision("SPY", Direction::Call, 10.0);
        let decision_b = enter_decision("QQQ", Direction::Put, 5.0);
        pm.open_position(&decision_a, 4.0).unwrap();
        let b = pm.open_position(&decision_b, 2.0).unwrap();
        pm.close_position(b.id, 2.5, 5.0, ExitReason::ProfitTarget)
            .unwrap();

        let restored = PositionManager::with_positions(pm.all_positions().to_vec());
        assert_eq!(restored.open_count(), 1);
        assert_eq!(restored.total_realized_pnl(), 2.5); // (2.5 - 2.0) * 5
    }

    #[test]
    fn test_daily_entry_counter_rolls_over() {
        let mut pm = PositionManager::new();
        let decision = enter_decision("SPY", Direction::Call, 10.0);
        pm.open_position(&decision, 4.0).unwrap();
        assert_eq!(pm.entries_today(), 1);

        // Tomorrow the counter resets
        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(pm.entries_today_at(tomorrow), 0);
    }

    #[test]
    fn test_expiration_carried_from_signal_metadata() {
        let mut pm = PositionManager::new();
        let mut decision = enter_decision("SPY", Direction::Call, 10.0);
        if let Some(signal) = decision.signal.as_mut() {
            signal.metadata.insert(
                "expiration".to_string(),
                serde_json::Value::from("2026-08-07T20:00:00Z"),
            );
        }

        let position = pm.open_position(&decision, 4.0).unwrap();
        assert!(position.expires_at.is_some());
    }
}
