//! Market data source boundary.
//!
//! The ledger core never talks to a price feed directly; it goes through
//! [`QuoteSource`], which the price/FX caches wrap. Fetch failures are plain
//! `anyhow` errors here and become explicit unavailable signals at the cache
//! layer.

use async_trait::async_trait;

use crate::models::Currency;

pub mod yahoo;

/// A latest-price observation from an external feed.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub price: f64,
    /// Quote currency as reported by the feed.
    pub currency: String,
}

/// External market data feed. Implementations must bound every call (the
/// default source applies an HTTP timeout) so a dead feed cannot hang a
/// whole valuation batch.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest (or previous close) price for a ticker.
    async fn latest_price(&self, ticker: &str) -> anyhow::Result<PriceQuote>;

    /// Latest exchange rate for a currency pair.
    async fn latest_fx_rate(&self, from: Currency, to: Currency) -> anyhow::Result<f64>;

    /// Source tag stored alongside cached values.
    fn name(&self) -> &'static str;
}
