use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::decision::sizing::{
    confluence_multiplier, kelly_multiplier, regime_multiplier, KellyParams,
};
use crate::market::{MarketContext, MarketData, OptionsPositioning, Trend};
use crate::models::{
    Decision, DecisionCalculations, DecisionResult, Direction, ExitReason, Position, Signal,
    SignalSource, ValidationResult,
};

/// Source-specific confidence priors
const BASE_CONFIDENCE_TRADINGVIEW: f64 = 50.0;
const BASE_CONFIDENCE_GEX: f64 = 70.0;
const BASE_CONFIDENCE_MTF: f64 = 55.0;
const BASE_CONFIDENCE_MANUAL: f64 = 40.0;

/// Entry within this fraction of a support/resistance level counts as "near"
const LEVEL_PROXIMITY: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Minimum final confidence for an ENTER
    pub confidence_threshold: f64,
    /// Notional dollars before multipliers
    pub base_position_size: f64,
    /// Risk ceiling: final size never exceeds this
    pub max_position_size: f64,
    /// Exit when the premium gained this fraction, e.g. 0.5 = +50%
    pub profit_target_pct: f64,
    /// Exit when the premium lost this fraction
    pub stop_loss_pct: f64,
    pub max_hold_minutes: i64,
    pub kelly: KellyParams,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 60.0,
            base_position_size: 1_000.0,
            max_position_size: 2_500.0,
            profit_target_pct: 0.50,
            stop_loss_pct: 0.25,
            max_hold_minutes: 240,
            kelly: KellyParams::default(),
        }
    }
}

/// Market snapshot for one exit evaluation, assembled by the caller so the
/// decision itself is pure
#[derive(Debug, Clone, Copy)]
pub struct ExitSnapshot {
    pub current_price: f64,
    pub flip_point: Option<f64>,
    pub minutes_to_expiry: Option<i64>,
    pub now: DateTime<Utc>,
}

/// Computes entry and exit decisions.
///
/// Entry confidence is strictly additive (base + context + positioning + gex)
/// and clamped to [0, 100] once at the end. Sizing is strictly multiplicative
/// (base x kelly x regime x confluence) and clamped to the risk ceiling.
/// Price and context are mandatory inputs; positioning is optional and
/// degrades to zeroed terms.
pub struct DecisionOrchestrator {
    config: DecisionConfig,
    market: Arc<dyn MarketData>,
}

impl DecisionOrchestrator {
    pub fn new(config: DecisionConfig, market: Arc<dyn MarketData>) -> Self {
        Self { config, market }
    }

    pub async fn orchestrate_entry_decision(
        &self,
        signal: &Signal,
        validation: &ValidationResult,
    ) -> DecisionResult {
        // Base price and context are mandatory: either failing is a rejection
        // (sizing cannot be computed without them), never a crash.
        let price = match self.market.current_price(&signal.symbol).await {
            Ok(price) => price,
            Err(e) => {
                tracing::error!(symbol = %signal.symbol, error = %e, "base market data failed, rejecting");
                return self.reject_fatal(signal, format!("market data unavailable: {e}"));
            }
        };
        let context = match self.market.context().await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(error = %e, "market context failed, rejecting");
                return self.reject_fatal(signal, format!("market context unavailable: {e}"));
            }
        };

        // Positioning is optional: a degraded source zeroes its terms and the
        // decision proceeds.
        let (positioning, degraded) = match self.market.positioning(&signal.symbol).await {
            Ok(positioning) => (Some(positioning), false),
            Err(e) => {
                tracing::warn!(
                    symbol = %signal.symbol,
                    error = %e,
                    "degraded mode: positioning unavailable, adjustment terms zeroed"
                );
                (None, true)
            }
        };

        let base_confidence = base_confidence(signal.source);
        let context_adjustment = context_adjustment(&context, signal.direction);
        let positioning_adjustment = positioning
            .map(|p| positioning_adjustment(&p, price, signal.direction))
            .unwrap_or(0.0);
        let gex_adjustment = positioning
            .map(|p| gex_adjustment(&p))
            .unwrap_or(0.0);

        // Clamp the running sum once, at the end
        let unclamped =
            base_confidence + context_adjustment + positioning_adjustment + gex_adjustment;
        let final_confidence = clamp_confidence(unclamped);

        let base_sizing = self.config.base_position_size;
        let kelly = kelly_multiplier(&self.config.kelly);
        let regime = regime_multiplier(context.regime, signal.direction);
        let confluence = confluence_multiplier(signal.metadata_f64("confluence_score"));
        let final_size =
            (base_sizing * kelly * regime * confluence).min(self.config.max_position_size);

        let calculations = DecisionCalculations {
            base_confidence,
            context_adjustment,
            positioning_adjustment,
            gex_adjustment,
            final_confidence,
            base_sizing,
            kelly_multiplier: kelly,
            regime_multiplier: regime,
            confluence_multiplier: confluence,
            final_size,
        };

        // Disqualifying factors, in evaluation order
        let mut disqualifiers = Vec::new();
        if !validation.valid {
            let why = validation
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "validation failed".to_string());
            disqualifiers.push(format!("validation failed: {why}"));
        }
        if final_confidence < self.config.confidence_threshold {
            disqualifiers.push(format!(
                "confidence {final_confidence:.1} below threshold {:.1}",
                self.config.confidence_threshold
            ));
        }
        if final_size <= 0.0 {
            disqualifiers.push("position size zero after clamping".to_string());
        }

        let (decision, reasoning) = if disqualifiers.is_empty() {
            let mut reasoning = vec![
                format!("base confidence {base_confidence:.1} ({})", signal.source),
                format!(
                    "context {context_adjustment:+.1} (vix {:.1}, trend {}, bias {})",
                    context.vix, context.trend, context.bias
                ),
            ];
            if degraded {
                reasoning.push("positioning unavailable, adjustment terms zeroed".to_string());
            } else {
                reasoning.push(format!(
                    "positioning {positioning_adjustment:+.1}, gex {gex_adjustment:+.1}"
                ));
            }
            reasoning.push(format!(
                "sizing {final_size:.2} = {base_sizing:.0} x kelly {kelly:.2} x regime {regime:.2} x confluence {confluence:.2}"
            ));
            (Decision::Enter, reasoning)
        } else {
            (Decision::Reject, disqualifiers)
        };

        DecisionResult {
            id: Uuid::new_v4(),
            decision,
            signal: Some(signal.clone()),
            position_id: None,
            confidence: final_confidence,
            position_size: if decision == Decision::Enter {
                final_size
            } else {
                0.0
            },
            reasoning,
            calculations,
            degraded,
            exit_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Evaluate exit rules for an open position.
    ///
    /// Priority order is a correctness contract: profit target, then stop
    /// loss, then GEX flip, then time-based exit. The first matching rule
    /// wins even when several conditions hold simultaneously.
    pub fn orchestrate_exit_decision(
        &self,
        position: &Position,
        snapshot: &ExitSnapshot,
    ) -> DecisionResult {
        let return_pct = position.return_pct(snapshot.current_price);

        let matched: Option<(ExitReason, String)> = if return_pct >= self.config.profit_target_pct {
            Some((
                ExitReason::ProfitTarget,
                format!(
                    "profit target hit: {:+.1}% >= {:.1}%",
                    return_pct * 100.0,
                    self.config.profit_target_pct * 100.0
                ),
            ))
        } else if return_pct <= -self.config.stop_loss_pct {
            Some((
                ExitReason::StopLoss,
                format!(
                    "stop loss hit: {:+.1}% <= -{:.1}%",
                    return_pct * 100.0,
                    self.config.stop_loss_pct * 100.0
                ),
            ))
        } else if let Some(flip) = snapshot.flip_point.filter(|&flip| {
            gex_flipped_against(position.direction, snapshot.current_price, flip)
        }) {
            Some((
                ExitReason::GexFlip,
                format!(
                    "gex flip: price {:.2} crossed flip point {flip:.2} against {}",
                    snapshot.current_price, position.direction
                ),
            ))
        } else {
            let held_minutes = (snapshot.now - position.entry_time).num_minutes();
            if held_minutes >= self.config.max_hold_minutes {
                Some((
                    ExitReason::TimeExit,
                    format!(
                        "max hold time reached: {held_minutes}min >= {}min",
                        self.config.max_hold_minutes
                    ),
                ))
            } else {
                None
            }
        };

        let (decision, exit_reason, reasoning) = match matched {
            Some((reason, text)) => (Decision::Exit, Some(reason), vec![text]),
            None => (
                Decision::Hold,
                None,
                vec![format!("no exit rule matched ({:+.1}%)", return_pct * 100.0)],
            ),
        };

        DecisionResult {
            id: Uuid::new_v4(),
            decision,
            signal: None,
            position_id: Some(position.id),
            confidence: 0.0,
            position_size: 0.0,
            reasoning,
            calculations: DecisionCalculations::default(),
            degraded: false,
            exit_reason,
            created_at: snapshot.now,
        }
    }

    fn reject_fatal(&self, signal: &Signal, reason: String) -> DecisionResult {
        DecisionResult {
            id: Uuid::new_v4(),
            decision: Decision::Reject,
            signal: Some(signal.clone()),
            position_id: None,
            confidence: 0.0,
            position_size: 0.0,
            reasoning: vec![reason],
            calculations: DecisionCalculations::default(),
            degraded: false,
            exit_reason: None,
            created_at: Utc::now(),
        }
    }
}

/// Final clamp applied exactly once to the summed confidence terms.
/// Idempotent: re-clamping a clamped value is a no-op.
pub fn clamp_confidence(raw: f64) -> f64 {
    raw.clamp(0.0, 100.0)
}

fn base_confidence(source: SignalSource) -> f64 {
    match source {
        SignalSource::Tradingview => BASE_CONFIDENCE_TRADINGVIEW,
        SignalSource::Gex => BASE_CONFIDENCE_GEX,
        SignalSource::Mtf => BASE_CONFIDENCE_MTF,
        SignalSource::Manual => BASE_CONFIDENCE_MANUAL,
    }
}

fn context_adjustment(context: &MarketContext, direction: Direction) -> f64 {
    let vix_term = if context.vix < 15.0 {
        5.0
    } else if context.vix < 25.0 {
        0.0
    } else if context.vix < 35.0 {
        -7.5
    } else {
        -15.0
    };

    vix_term + trend_term(context.trend, direction, 10.0) + trend_term(context.bias, direction, 5.0)
}

fn trend_term(trend: Trend, direction: Direction, weight: f64) -> f64 {
    match (trend, direction) {
        (Trend::Bullish, Direction::Call) | (Trend::Bearish, Direction::Put) => weight,
        (Trend::Neutral, _) => 0.0,
        _ => -weight,
    }
}

/// Entries near support favor calls and hurt puts; near resistance the
/// reverse.
fn positioning_adjustment(
    positioning: &OptionsPositioning,
    price: f64,
    direction: Direction,
) -> f64 {
    let mut adjustment = 0.0;

    if let Some(support) = positioning.support {
        if price > 0.0 && ((price - support) / price).abs() < LEVEL_PROXIMITY {
            adjustment += match direction {
                Direction::Call => 7.5,
                Direction::Put => -7.5,
            };
        }
    }
    if let Some(resistance) = positioning.resistance {
        if price > 0.0 && ((resistance - price) / price).abs() < LEVEL_PROXIMITY {
            adjustment += match direction {
                Direction::Call => -7.5,
                Direction::Put => 7.5,
            };
        }
    }

    adjustment
}

/// Negative net gamma amplifies moves, which favors directional option
/// buying; strongly positive gamma pins price.
fn gex_adjustment(positioning: &OptionsPositioning) -> f64 {
    if positioning.net_gex < 0.0 {
        7.5
    } else if positioning.net_gex > 0.0 {
        -5.0
    } else {
        0.0
    }
}

/// Price crossing the gamma flip point against the position direction
fn gex_flipped_against(direction: Direction, price: f64, flip_point: f64) -> bool {
    match direction {
        Direction::Call => price < flip_point,
        Direction::Put => price > flip_point,
    }
}
