// Market data collaborator: narrow interface the decision core consumes.
// The orchestrator treats price and context as mandatory inputs and
// positioning as optional (degrades to zeroed adjustment terms).
pub mod http;

pub use http::HttpMarketData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad market trend classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

/// Market regime classification supplied by the context provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    BullTrend,
    BearTrend,
    Choppy,
    Panic,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::BullTrend => write!(f, "bull_trend"),
            MarketRegime::BearTrend => write!(f, "bear_trend"),
            MarketRegime::Choppy => write!(f, "choppy"),
            MarketRegime::Panic => write!(f, "panic"),
        }
    }
}

/// Broad-market context snapshot (VIX, trend, regime, short-term bias)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub vix: f64,
    pub trend: Trend,
    pub regime: MarketRegime,
    pub bias: Trend,
}

/// Options positioning snapshot for one underlying
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionsPositioning {
    /// Net dealer gamma exposure; negative values amplify moves
    pub net_gex: f64,
    /// Price level where net gamma changes sign
    pub flip_point: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data unavailable: {0}")]
    Unavailable(String),
    #[error("malformed market data: {0}")]
    Malformed(String),
}

/// Price, context and positioning supplier.
///
/// Implementations may cache, rate-limit or fan out to vendors internally;
/// the core only sees these three calls.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<f64, MarketDataError>;

    async fn context(&self) -> Result<MarketContext, MarketDataError>;

    async fn positioning(&self, symbol: &str) -> Result<OptionsPositioning, MarketDataError>;
}
