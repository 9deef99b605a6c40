use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard limits checked before any position is opened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_open_positions: usize,
    pub max_daily_entries: u32,
    /// Per-position notional ceiling, applied as the sizing clamp
    pub max_position_size: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_open_positions: 5,
            max_daily_entries: 20,
            max_position_size: 2_500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLimitTrip {
    OpenPositions,
    DailyEntries,
}

impl fmt::Display for RiskLimitTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLimitTrip::OpenPositions => write!(f, "max open positions reached"),
            RiskLimitTrip::DailyEntries => write!(f, "max daily entries reached"),
        }
    }
}

impl RiskLimits {
    pub fn check(&self, open_positions: usize, entries_today: u32) -> Result<(), RiskLimitTrip> {
        if open_positions >= self.max_open_positions {
            return Err(RiskLimitTrip::OpenPositions);
        }
        if entries_today >= self.max_daily_entries {
            return Err(RiskLimitTrip::DailyEntries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_position_limit() {
        let limits = RiskLimits::default();
        assert_eq!(limits.check(5, 0), Err(RiskLimitTrip::OpenPositions));
        assert!(limits.check(4, 0).is_ok());
    }

    #[test]
    fn test_daily_entry_limit() {
        let limits = RiskLimits::default();
        assert_eq!(limits.check(0, 20), Err(RiskLimitTrip::DailyEntries));
        assert!(limits.check(0, 19).is_ok());
    }

    #[test]
    fn test_open_limit_checked_first() {
        let limits = RiskLimits::default();
        assert_eq!(limits.check(5, 20), Err(RiskLimitTrip::OpenPositions));
    }
}
