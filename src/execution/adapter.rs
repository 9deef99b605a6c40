use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

use crate::market::MarketData;
use crate::models::Direction;

#[derive(Debug, Error)]
#[error("order rejected: {0}")]
pub struct ExecutionError(pub String);

/// Broker seam. The core does not care whether fills are simulated or real.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Submit an order and return the fill price.
    async fn submit_order(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: f64,
    ) -> Result<f64, ExecutionError>;
}

/// Paper-trading simulator: fills at the current market price plus a small
/// random slippage. Directional cost is asymmetric the way real fills are:
/// opening buys pay up, never down.
pub struct PaperExecutionAdapter {
    market: Arc<dyn MarketData>,
    max_slippage_bps: f64,
}

impl PaperExecutionAdapter {
    pub fn new(market: Arc<dyn MarketData>, max_slippage_bps: f64) -> Self {
        Self {
            market,
            max_slippage_bps,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutionAdapter {
    async fn submit_order(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: f64,
    ) -> Result<f64, ExecutionError> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(ExecutionError(format!("invalid quantity {quantity}")));
        }

        let price = self
            .market
            .current_price(symbol)
            .await
            .map_err(|e| ExecutionError(format!("no fill price for {symbol}: {e}")))?;

        let slippage_fraction = if self.max_slippage_bps > 0.0 {
            rand::thread_rng().gen_range(0.0..self.max_slippage_bps) / 10_000.0
        } else {
            0.0
        };
        let fill = price * (1.0 + slippage_fraction);

        tracing::info!(
            "📝 Paper fill: {} {} x{:.2} @ {:.4} (slippage {:.1}bps)",
            symbol,
            direction,
            quantity,
            fill,
            slippage_fraction * 10_000.0
        );

        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketContext, MarketDataError, OptionsPositioning};

    struct FixedPriceMarket(f64);

    #[async_trait]
    impl MarketData for FixedPriceMarket {
        async fn current_price(&self, _symbol: &str) -> Result<f64, MarketDataError> {
            Ok(self.0)
        }

        async fn context(&self) -> Result<MarketContext, MarketDataError> {
            Err(MarketDataError::Unavailable("not used".to_string()))
        }

        async fn positioning(&self, _symbol: &str) -> Result<OptionsPositioning, MarketDataError> {
            Err(MarketDataError::Unavailable("not used".to_string()))
        }
    }

    #[tokio::test]
    async fn test_paper_fill_near_market_price() {
        let adapter = PaperExecutionAdapter::new(Arc::new(FixedPriceMarket(100.0)), 20.0);

        let fill = adapter
            .submit_order("SPY", Direction::Call, 5.0)
            .await
            .unwrap();

        // At most 20bps above market, never below
        assert!(fill >= 100.0);
        assert!(fill <= 100.0 * 1.002);
    }

    #[tokio::test]
    async fn test_zero_slippage_fills_at_market() {
        let adapter = PaperExecutionAdapter::new(Arc::new(FixedPriceMarket(42.0)), 0.0);

        let fill = adapter
            .submit_order("SPY", Direction::Put, 1.0)
            .await
            .unwrap();
        assert_eq!(fill, 42.0);
    }

    #[tokio::test]
    async fn test_invalid_quantity_rejected() {
        let adapter = PaperExecutionAdapter::new(Arc::new(FixedPriceMarket(42.0)), 0.0);

        let result = adapter.submit_order("SPY", Direction::Call, 0.0).await;
        assert!(result.is_err());

        let result = adapter.submit_order("SPY", Direction::Call, -5.0).await;
        assert!(result.is_err());
    }
}
