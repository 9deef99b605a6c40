use serde::{Deserialize, Serialize};

use crate::market::MarketRegime;
use crate::models::Direction;

/// Inputs to the Kelly sizing multiplier.
///
/// f* = (p*b - q) / b, where p is the win rate, q = 1 - p, and b is the
/// payoff ratio. The applied fraction is a conservative fraction of full
/// Kelly, normalized against a reference allocation so that the multiplier
/// hovers around 1.0 for an ordinary edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KellyParams {
    pub win_rate: f64,
    pub payoff_ratio: f64,
    /// Fraction of full Kelly to apply (0.5 = half-Kelly)
    pub fraction: f64,
    /// Portfolio fraction that maps to a 1.0 multiplier
    pub reference_fraction: f64,
    pub floor: f64,
    pub cap: f64,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            win_rate: 0.55,
            payoff_ratio: 1.5,
            fraction: 0.5,            // half-Kelly
            reference_fraction: 0.10,
            floor: 0.25,
            cap: 1.5,
        }
    }
}

/// Kelly sizing multiplier. A non-positive edge sizes to zero: no edge, no
/// trade, regardless of the floor.
pub fn kelly_multiplier(params: &KellyParams) -> f64 {
    if params.payoff_ratio <= 0.0 || params.reference_fraction <= 0.0 {
        return 0.0;
    }

    let p = params.win_rate.clamp(0.0, 1.0);
    let q = 1.0 - p;
    let b = params.payoff_ratio;

    let full_kelly = (p * b - q) / b;
    if full_kelly <= 0.0 {
        return 0.0;
    }

    let applied = full_kelly * params.fraction;
    (applied / params.reference_fraction).clamp(params.floor, params.cap)
}

/// Regime scaling for position size. Directional option buying gets scaled
/// up with the regime it rides and down against it; chop and panic shrink
/// everything.
pub fn regime_multiplier(regime: MarketRegime, direction: Direction) -> f64 {
    match (regime, direction) {
        (MarketRegime::BullTrend, Direction::Call) => 1.25,
        (MarketRegime::BullTrend, Direction::Put) => 0.75,
        (MarketRegime::BearTrend, Direction::Call) => 0.75,
        (MarketRegime::BearTrend, Direction::Put) => 1.25,
        (MarketRegime::Choppy, _) => 0.8,
        (MarketRegime::Panic, Direction::Call) => 0.5,
        (MarketRegime::Panic, Direction::Put) => 1.0,
    }
}

/// Confluence scaling from the signal's confluence score, when present.
pub fn confluence_multiplier(score: Option<f64>) -> f64 {
    match score {
        None => 1.0,
        Some(s) if s < 40.0 => 0.75,
        Some(s) if s < 70.0 => 1.0,
        Some(_) => 1.25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kelly_default_params_positive_edge() {
        // p=0.55, b=1.5: full Kelly = (0.825 - 0.45) / 1.5 = 0.25
        // half-Kelly 0.125 against a 0.10 reference -> 1.25
        let m = kelly_multiplier(&KellyParams::default());
        assert!((m - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_kelly_negative_edge_sizes_to_zero() {
        let params = KellyParams {
            win_rate: 0.30,
            payoff_ratio: 1.0,
            ..Default::default()
        };
        assert_eq!(kelly_multiplier(&params), 0.0);
    }

    #[test]
    fn test_kelly_clamped_to_cap_and_floor() {
        let hot = KellyParams {
            win_rate: 0.80,
            payoff_ratio: 3.0,
            ..Default::default()
        };
        assert_eq!(kelly_multiplier(&hot), KellyParams::default().cap);

        let thin = KellyParams {
            win_rate: 0.52,
            payoff_ratio: 1.1,
            ..Default::default()
        };
        assert_eq!(kelly_multiplier(&thin), KellyParams::default().floor);
    }

    #[test]
    fn test_regime_multiplier_direction_aware() {
        assert!(
            regime_multiplier(MarketRegime::BullTrend, Direction::Call)
                > regime_multiplier(MarketRegime::BullTrend, Direction::Put)
        );
        assert!(
            regime_multiplier(MarketRegime::BearTrend, Direction::Put)
                > regime_multiplier(MarketRegime::BearTrend, Direction::Call)
        );
        assert_eq!(regime_multiplier(MarketRegime::Choppy, Direction::Call), 0.8);
    }

    #[test]
    fn test_confluence_multiplier_bands() {
        assert_eq!(confluence_multiplier(None), 1.0);
        assert_eq!(confluence_multiplier(Some(20.0)), 0.75);
        assert_eq!(confluence_multiplier(Some(55.0)), 1.0);
        assert_eq!(confluence_multiplier(Some(85.0)), 1.25);
    }
}
