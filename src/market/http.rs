use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::market::{MarketContext, MarketData, MarketDataError, OptionsPositioning};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Cached context is served for this long before re-fetching
const CONTEXT_STALE_SECS: i64 = 300;

// Type alias for the rate limiter to simplify signatures
type ProviderRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
struct CachedContext {
    context: MarketContext,
    fetched_at: DateTime<Utc>,
}

/// HTTP market data provider with caching and rate limiting.
///
/// Cloneable so it can be shared across async tasks; all clones share the
/// same rate limiter and context cache. Context can also be pushed in from
/// the ingestion side via `update_context`, which refreshes the cache without
/// an upstream round trip.
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    base_url: String,
    rate_limiter: Arc<ProviderRateLimiter>,
    cached_context: Arc<RwLock<Option<CachedContext>>>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct ContextResponse {
    vix: f64,
    trend: crate::market::Trend,
    regime: crate::market::MarketRegime,
    bias: crate::market::Trend,
}

#[derive(Debug, Deserialize)]
struct PositioningResponse {
    net_gex: f64,
    flip_point: Option<f64>,
    support: Option<f64>,
    resistance: Option<f64>,
}

impl HttpMarketData {
    pub fn new(base_url: &str, requests_per_minute: u32) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MarketDataError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
            cached_context: Arc::new(RwLock::new(None)),
        })
    }

    /// Push a context snapshot into the cache (ingestion-side updates).
    pub async fn update_context(&self, context: MarketContext) {
        let mut cache = self.cached_context.write().await;
        *cache = Some(CachedContext {
            context,
            fetched_at: Utc::now(),
        });
        tracing::debug!(vix = context.vix, regime = %context.regime, "market context updated");
    }

    /// Make a rate-limited GET with retry and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=MAX_RETRIES {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            MarketDataError::Malformed(format!("{path}: {e}"))
                        });
                    }

                    if status.as_u16() == 429 && attempt < MAX_RETRIES {
                        let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            "Rate limited on {} (attempt {}/{}), backing off {:?}",
                            path,
                            attempt,
                            MAX_RETRIES,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    return Err(MarketDataError::Unavailable(format!(
                        "{path}: upstream returned {status}"
                    )));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        path,
                        attempt,
                        MAX_RETRIES,
                        e
                    );
                }
                Err(e) => return Err(MarketDataError::Unavailable(format!("{path}: {e}"))),
            }
        }

        Err(MarketDataError::Unavailable(format!(
            "{path}: retries exhausted"
        )))
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn current_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        let quote: QuoteResponse = self.get_json(&format!("/quote/{symbol}")).await?;

        if !quote.price.is_finite() || quote.price <= 0.0 {
            return Err(MarketDataError::Malformed(format!(
                "non-positive price {} for {symbol}",
                quote.price
            )));
        }

        Ok(quote.price)
    }

    async fn context(&self) -> Result<MarketContext, MarketDataError> {
        {
            let cache = self.cached_context.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = (Utc::now() - cached.fetched_at).num_seconds();
                if age < CONTEXT_STALE_SECS {
                    return Ok(cached.context);
                }
            }
        }

        let response: ContextResponse = self.get_json("/context").await?;
        let context = MarketContext {
            vix: response.vix,
            trend: response.trend,
            regime: response.regime,
            bias: response.bias,
        };

        self.update_context(context).await;
        Ok(context)
    }

    async fn positioning(&self, symbol: &str) -> Result<OptionsPositioning, MarketDataError> {
        let response: PositioningResponse =
            self.get_json(&format!("/positioning/{symbol}")).await?;

        Ok(OptionsPositioning {
            net_gex: response.net_gex,
            flip_point: response.flip_point,
            support: response.support,
            resistance: response.resistance,
        })
    }
}
