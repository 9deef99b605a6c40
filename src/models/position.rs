use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Which exit rule (or manual action) closed a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    GexFlip,
    TimeExit,
    Expiration,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ProfitTarget => "ProfitTarget",
            ExitReason::StopLoss => "StopLoss",
            ExitReason::GexFlip => "GexFlip",
            ExitReason::TimeExit => "TimeExit",
            ExitReason::Expiration => "Expiration",
            ExitReason::Manual => "Manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ProfitTarget" => Some(ExitReason::ProfitTarget),
            "StopLoss" => Some(ExitReason::StopLoss),
            "GexFlip" => Some(ExitReason::GexFlip),
            "TimeExit" => Some(ExitReason::TimeExit),
            "Expiration" => Some(ExitReason::Expiration),
            "Manual" => Some(ExitReason::Manual),
            _ => None,
        }
    }
}

/// An open or closed trade.
///
/// Entry fields are set once at open and never change. A partial close spawns
/// an independent closed lot (its own row) while the remainder keeps trading
/// under the original entry price. `realized_pnl` is set exactly when
/// `status == Closed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Tracking ID of the entry signal
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    /// Contract expiration, when the entry signal carried one
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Return on the entry premium at the given price, e.g. 0.5 = +50%
    pub fn return_pct(&self, current_price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (current_price - self.entry_price) / self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_pct() {
        let position = Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "SPY".to_string(),
            direction: Direction::Call,
            quantity: 2.0,
            entry_price: 4.0,
            entry_time: Utc::now(),
            current_price: None,
            unrealized_pnl: None,
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            exit_reason: None,
            expires_at: None,
            status: PositionStatus::Open,
        };

        assert_eq!(position.return_pct(6.0), 0.5);
        assert_eq!(position.return_pct(3.0), -0.25);
        assert!(position.is_open());
    }

    #[test]
    fn test_exit_reason_round_trip() {
        for reason in [
            ExitReason::ProfitTarget,
            ExitReason::StopLoss,
            ExitReason::GexFlip,
            ExitReason::TimeExit,
            ExitReason::Expiration,
            ExitReason::Manual,
        ] {
            assert_eq!(ExitReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(ExitReason::parse("TrailingStop"), None);
    }
}
