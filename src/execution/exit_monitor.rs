use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::decision::{DecisionOrchestrator, ExitSnapshot};
use crate::execution::{ExecutionAdapter, PositionManager};
use crate::market::MarketData;
use crate::models::{Decision, ExitReason, Position};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
}

/// One exit-rule match (or expiration advisory) for an open position
#[derive(Debug, Clone)]
pub struct ExitAlert {
    pub position_id: Uuid,
    pub symbol: String,
    pub priority: AlertPriority,
    pub reason: ExitReason,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ExitMonitorConfig {
    pub poll_interval_secs: u64,
    /// At or under this many minutes to expiration: CRITICAL, auto-close
    pub expiry_critical_minutes: i64,
    /// At or under this many minutes: HIGH advisory
    pub expiry_warn_minutes: i64,
}

impl Default for ExitMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            expiry_critical_minutes: 15,
            expiry_warn_minutes: 60,
        }
    }
}

/// Periodically re-evaluates every open position against the exit rules.
///
/// CRITICAL alerts (stop loss, imminent expiration) close the position
/// automatically; HIGH and MEDIUM alerts are surfaced for follow-up. Closes
/// go through the store's conditional claim first so concurrent monitor
/// instances never double-close. One position's trouble (missing quote,
/// failed fill) never stops the sweep.
pub struct ExitMonitor {
    orchestrator: Arc<DecisionOrchestrator>,
    market: Arc<dyn MarketData>,
    position_manager: Arc<Mutex<PositionManager>>,
    execution: Arc<dyn ExecutionAdapter>,
    store: Arc<dyn Store>,
    config: ExitMonitorConfig,
}

impl ExitMonitor {
    pub fn new(
        orchestrator: Arc<DecisionOrchestrator>,
        market: Arc<dyn MarketData>,
        position_manager: Arc<Mutex<PositionManager>>,
        execution: Arc<dyn ExecutionAdapter>,
        store: Arc<dyn Store>,
        config: ExitMonitorConfig,
    ) -> Self {
        Self {
            orchestrator,
            market,
            position_manager,
            execution,
            store,
            config,
        }
    }

    /// Run the monitor loop until the task is aborted
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs));
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(alerts) if !alerts.is_empty() => {
                    tracing::info!("Exit sweep produced {} alert(s)", alerts.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Exit sweep failed: {e:#}"),
            }
        }
    }

    /// One pass over all open positions. Returns every alert raised.
    pub async fn sweep(&self) -> anyhow::Result<Vec<ExitAlert>> {
        let open_positions = {
            let pm = self
                .position_manager
                .lock()
                .map_err(|_| anyhow::anyhow!("position manager lock poisoned"))?;
            pm.open_positions()
        };

        let mut alerts = Vec::new();

        for position in open_positions {
            match self.evaluate_position(&position).await {
                Ok(mut position_alerts) => alerts.append(&mut position_alerts),
                Err(e) => {
                    tracing::warn!(
                        position = %position.id,
                        symbol = %position.symbol,
                        "skipping position this sweep: {e:#}"
                    );
                }
            }
        }

        Ok(alerts)
    }

    async fn evaluate_position(&self, position: &Position) -> anyhow::Result<Vec<ExitAlert>> {
        let price = self
            .market
            .current_price(&position.symbol)
            .await
            .map_err(|e| anyhow::anyhow!("no quote: {e}"))?;

        // Refresh the mark and persist it
        let refreshed = {
            let mut pm = self
                .position_manager
                .lock()
                .map_err(|_| anyhow::anyhow!("position manager lock poisoned"))?;
            pm.refresh_price(position.id, price)?
        };
        self.store
            .update_position(&refreshed)
            .await
            .map_err(|e| anyhow::anyhow!("persist refresh: {e}"))?;

        // Positioning is optional here as well; a missing flip point just
        // disables the GEX-flip rule for this pass
        let flip_point = match self.market.positioning(&position.symbol).await {
            Ok(positioning) => positioning.flip_point,
            Err(e) => {
                tracing::debug!(symbol = %position.symbol, "positioning unavailable in sweep: {e}");
                None
            }
        };

        let now = Utc::now();
        let minutes_to_expiry = position.expires_at.map(|at| (at - now).num_minutes());

        let mut alerts = Vec::new();

        // Imminent expiration outranks the rule battery
        if let Some(minutes) = minutes_to_expiry {
            if minutes <= self.config.expiry_critical_minutes {
                let alert = ExitAlert {
                    position_id: position.id,
                    symbol: position.symbol.clone(),
                    priority: AlertPriority::Critical,
                    reason: ExitReason::Expiration,
                    message: format!("expires in {minutes}min, closing"),
                };
                tracing::warn!("🚨 {} {}", position.symbol, alert.message);
                self.auto_close(position, ExitReason::Expiration).await;
                alerts.push(alert);
                return Ok(alerts);
            }
        }

        let snapshot = ExitSnapshot {
            current_price: price,
            flip_point,
            minutes_to_expiry,
            now,
        };
        let decision = self.orchestrator.orchestrate_exit_decision(position, &snapshot);
        self.store
            .save_decision(&decision)
            .await
            .map_err(|e| anyhow::anyhow!("persist exit decision: {e}"))?;

        if decision.decision == Decision::Exit {
            if let Some(reason) = decision.exit_reason {
                let priority = alert_priority(reason);
                let alert = ExitAlert {
                    position_id: position.id,
                    symbol: position.symbol.clone(),
                    priority,
                    reason,
                    message: decision.reasoning.join("; "),
                };

                match priority {
                    AlertPriority::Critical => {
                        tracing::warn!("🚨 {} {}", position.symbol, alert.message);
                        self.auto_close(position, reason).await;
                    }
                    AlertPriority::High => {
                        tracing::warn!("⚠️  {} {}", position.symbol, alert.message)
                    }
                    AlertPriority::Medium => {
                        tracing::info!("{} {}", position.symbol, alert.message)
                    }
                }
                alerts.push(alert);
                return Ok(alerts);
            }
        }

        // Holding, but flag positions drifting toward expiration
        if let Some(minutes) = minutes_to_expiry {
            if minutes <= self.config.expiry_warn_minutes {
                alerts.push(ExitAlert {
                    position_id: position.id,
                    symbol: position.symbol.clone(),
                    priority: AlertPriority::High,
                    reason: ExitReason::Expiration,
                    message: format!("expires in {minutes}min"),
                });
            }
        }

        Ok(alerts)
    }

    /// Close through the atomic claim. Losing the claim means another worker
    /// is already closing this position; that is success, not failure.
    async fn auto_close(&self, position: &Position, reason: ExitReason) {
        let claimed = match self.store.claim_position_close(position.id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(position = %position.id, "close claim failed: {e}");
                return;
            }
        };
        if !claimed {
            tracing::debug!(position = %position.id, "close already claimed elsewhere");
            return;
        }

        let fill = match self
            .execution
            .submit_order(&position.symbol, position.direction, position.quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!(position = %position.id, "close order failed: {e}");
                if let Err(release_err) = self.store.release_position_claim(position.id).await {
                    tracing::error!(position = %position.id, "claim release failed: {release_err}");
                }
                return;
            }
        };

        let closed = {
            let mut pm = match self.position_manager.lock() {
                Ok(pm) => pm,
                Err(_) => {
                    tracing::error!("position manager lock poisoned during close");
                    return;
                }
            };
            pm.close_position(position.id, fill, position.quantity, reason)
        };

        match closed {
            Ok(lot) => {
                if let Err(e) = self.store.update_position(&lot).await {
                    tracing::error!(position = %position.id, "persist close failed: {e}");
                }
            }
            Err(e) => tracing::error!(position = %position.id, "close rejected: {e}"),
        }
    }
}

fn alert_priority(reason: ExitReason) -> AlertPriority {
    match reason {
        ExitReason::StopLoss | ExitReason::Expiration => AlertPriority::Critical,
        ExitReason::ProfitTarget | ExitReason::GexFlip => AlertPriority::High,
        ExitReason::TimeExit | ExitReason::Manual => AlertPriority::Medium,
    }
}
