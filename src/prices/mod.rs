//! Price cache: TTL-bound layer between the ledger and the quote source.
//!
//! One row per ticker, overwritten on refresh (last write wins). A fresh
//! cache hit is served as `cached = true`; a miss or expired entry triggers
//! a fetch. Expired entries are never served as a fallback when the fetch
//! fails — callers get `PriceUnavailable` instead of silently stale numbers.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::CachedPrice;
use crate::quotes::{PriceQuote, QuoteSource};
use crate::ticker::validate_ticker;

pub const PRICE_CACHE_TTL_MINUTES: i64 = 15;

/// A resolved price, with its provenance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    pub ticker: String,
    pub price: f64,
    pub currency: String,
    pub cached: bool,
}

/// Per-ticker outcome of a batch lookup. One bad ticker never voids the
/// batch; it just carries its error here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResult {
    pub ticker: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub cached: bool,
    pub error: Option<String>,
}

impl PriceResult {
    fn ok(info: PriceInfo) -> Self {
        Self {
            ticker: info.ticker,
            price: Some(info.price),
            currency: Some(info.currency),
            cached: info.cached,
            error: None,
        }
    }

    fn err(ticker: String, error: &Error) -> Self {
        Self {
            ticker,
            price: None,
            currency: None,
            cached: false,
            error: Some(error.to_string()),
        }
    }
}

/// Cached entry for `ticker` if present and younger than the TTL.
fn fresh_cached_price(conn: &Connection, ticker: &str) -> Result<Option<CachedPrice>> {
    let mut stmt = conn.prepare("SELECT * FROM price_cache WHERE ticker = ?1")?;
    let mut rows = stmt.query_map([ticker], CachedPrice::from_row)?;
    let row = match rows.next() {
        Some(row) => row?,
        None => return Ok(None),
    };

    let age = Utc::now().signed_duration_since(row.fetched_at);
    if age > Duration::minutes(PRICE_CACHE_TTL_MINUTES) {
        return Ok(None); // expired
    }
    Ok(Some(row))
}

fn store_price(conn: &Connection, ticker: &str, quote: &PriceQuote, source: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO price_cache (ticker, price, currency, source, fetched_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(ticker)
           DO UPDATE SET price = ?2, currency = ?3, source = ?4, fetched_at = ?5"#,
        params![ticker, quote.price, quote.currency, source, Utc::now()],
    )?;
    Ok(())
}

/// Fetch the latest price for a ticker, using the cache while fresh.
pub async fn fetch_price(
    db: &Database,
    source: &dyn QuoteSource,
    ticker: &str,
) -> Result<PriceInfo> {
    let ticker = validate_ticker(ticker)?;

    if let Some(cached) = db.read(|conn| fresh_cached_price(conn, &ticker))? {
        return Ok(PriceInfo {
            ticker,
            price: cached.price,
            currency: cached.currency,
            cached: true,
        });
    }

    let quote = source
        .latest_price(&ticker)
        .await
        .map_err(|e| Error::PriceUnavailable {
            ticker: ticker.clone(),
            reason: e.to_string(),
        })?;

    // Concurrent misses may each fetch and upsert; last write wins.
    db.write(|conn| store_price(conn, &ticker, &quote, source.name()))?;

    Ok(PriceInfo {
        ticker,
        price: quote.price,
        currency: quote.currency,
        cached: false,
    })
}

/// Fetch prices for several tickers. Each ticker resolves independently.
pub async fn fetch_prices(
    db: &Database,
    source: &dyn QuoteSource,
    tickers: &[String],
) -> HashMap<String, PriceResult> {
    let mut results = HashMap::new();
    for ticker in tickers {
        let key = crate::ticker::normalize_ticker(ticker);
        let result = match fetch_price(db, source, ticker).await {
            Ok(info) => PriceResult::ok(info),
            Err(e) => {
                log::warn!("price lookup failed for {}: {}", key, e);
                PriceResult::err(key.clone(), &e)
            }
        };
        results.insert(key, result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::stub::StubSource;
    use std::sync::atomic::Ordering;

    fn age_cache_entry(db: &Database, ticker: &str, minutes: i64) {
        db.write(|conn| {
            conn.execute(
                "UPDATE price_cache SET fetched_at = ?1 WHERE ticker = ?2",
                params![Utc::now() - Duration::minutes(minutes), ticker],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn miss_fetches_then_hit_serves_from_cache() {
        let db = Database::open_in_memory().unwrap();
        let source = StubSource::new().with_price("2330.TW", 580.5, "TWD");

        let first = fetch_price(&db, &source, "2330.tw").await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.price, 580.5);
        assert_eq!(first.currency, "TWD");

        let second = fetch_price(&db, &source, "2330.TW").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.price, 580.5);
        assert_eq!(source.price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_served_until_ttl_then_refetched() {
        let db = Database::open_in_memory().unwrap();
        let source = StubSource::new().with_price("AAPL", 178.5, "USD");

        fetch_price(&db, &source, "AAPL").await.unwrap();

        // One minute inside the TTL: still a cache hit.
        age_cache_entry(&db, "AAPL", PRICE_CACHE_TTL_MINUTES - 1);
        let inside = fetch_price(&db, &source, "AAPL").await.unwrap();
        assert!(inside.cached);
        assert_eq!(source.price_calls.load(Ordering::SeqCst), 1);

        // One minute past the TTL: refetch.
        age_cache_entry(&db, "AAPL", PRICE_CACHE_TTL_MINUTES + 1);
        let outside = fetch_price(&db, &source, "AAPL").await.unwrap();
        assert!(!outside.cached);
        assert_eq!(source.price_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_surfaced_not_papered_over() {
        let db = Database::open_in_memory().unwrap();
        let source = StubSource::new();

        let err = fetch_price(&db, &source, "MISSING").await.unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn expired_entry_is_not_served_when_the_fetch_fails() {
        let db = Database::open_in_memory().unwrap();
        let seeded = StubSource::new().with_price("AAPL", 178.5, "USD");
        fetch_price(&db, &seeded, "AAPL").await.unwrap();
        age_cache_entry(&db, "AAPL", PRICE_CACHE_TTL_MINUTES + 1);

        // Source now fails: the stale row must not come back.
        let dead = StubSource::new();
        let err = fetch_price(&db, &dead, "AAPL").await.unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn batch_isolates_per_ticker_failures() {
        let db = Database::open_in_memory().unwrap();
        let source = StubSource::new().with_price("2330.TW", 580.5, "TWD");

        let tickers = vec!["2330.TW".to_string(), "GONE.TW".to_string()];
        let results = fetch_prices(&db, &source, &tickers).await;
        assert_eq!(results.len(), 2);

        let hit = &results["2330.TW"];
        assert_eq!(hit.price, Some(580.5));
        assert!(hit.error.is_none());

        let miss = &results["GONE.TW"];
        assert!(miss.price.is_none());
        assert!(miss.error.is_some());
    }
}
