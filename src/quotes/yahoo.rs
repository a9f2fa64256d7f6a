//! Yahoo Finance quote source.
//!
//! Uses the v8 chart endpoint for both security prices and FX rates (FX
//! pairs are quoted as synthetic tickers like "USDTWD=X").

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use super::{PriceQuote, QuoteSource};
use crate::models::Currency;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Yahoo Finance FX ticker, e.g. "USDTWD=X".
pub fn fx_ticker(from: Currency, to: Currency) -> String {
    format!("{}{}=X", from.as_str(), to.as_str())
}

#[derive(Debug, Default)]
pub struct YahooSource;

impl YahooSource {
    pub fn new() -> Self {
        Self
    }
}

fn create_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

/// Fetch the latest price for a chart symbol. Falls back from the regular
/// market price to the last close when the market is closed.
async fn fetch_chart_quote(symbol: &str) -> Result<PriceQuote> {
    let url = format!(
        "{}/{}?interval=1d&range=1d",
        BASE_URL,
        urlencoding::encode(symbol)
    );
    log::debug!("Fetching Yahoo quote for {} from {}", symbol, url);

    let client = create_client()?;
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Request failed for {}: {}", symbol, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::error!("Yahoo API error for {}: {} - {}", symbol, status, body);
        return Err(anyhow!("HTTP error for {}: {} - {}", symbol, status, body));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse JSON for {}: {}", symbol, e))?;

    if let Some(error) = data
        .get("chart")
        .and_then(|c| c.get("error"))
        .and_then(|e| e.as_object())
    {
        let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let desc = error
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("No description");
        log::error!("Yahoo API returned error for {}: {} - {}", symbol, code, desc);
        return Err(anyhow!("Yahoo API error for {}: {} - {}", symbol, code, desc));
    }

    let chart = data
        .get("chart")
        .and_then(|c| c.get("result"))
        .and_then(|r| r.get(0))
        .ok_or_else(|| anyhow!("Invalid response format for {}", symbol))?;

    let meta = chart
        .get("meta")
        .ok_or_else(|| anyhow!("Missing meta for {}", symbol))?;

    let price = meta
        .get("regularMarketPrice")
        .and_then(|p| p.as_f64())
        .or_else(|| meta.get("chartPreviousClose").and_then(|p| p.as_f64()))
        .or_else(|| {
            chart
                .get("indicators")
                .and_then(|i| i.get("quote"))
                .and_then(|q| q.get(0))
                .and_then(|q| q.get("close"))
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.iter().rev().find_map(|v| v.as_f64()))
        })
        .ok_or_else(|| anyhow!("Missing price for {}", symbol))?;

    let currency = meta
        .get("currency")
        .and_then(|c| c.as_str())
        .unwrap_or("USD")
        .to_string();

    Ok(PriceQuote { price, currency })
}

#[async_trait]
impl QuoteSource for YahooSource {
    async fn latest_price(&self, ticker: &str) -> Result<PriceQuote> {
        fetch_chart_quote(ticker).await
    }

    async fn latest_fx_rate(&self, from: Currency, to: Currency) -> Result<f64> {
        let symbol = fx_ticker(from, to);
        let quote = fetch_chart_quote(&symbol).await?;
        Ok(quote.price)
    }

    fn name(&self) -> &'static str {
        "yahoo"
    }
}
