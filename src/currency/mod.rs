//! Exchange rate cache and currency conversion.
//!
//! Same pattern as the price cache, keyed by currency pair with a longer
//! TTL. Same-currency lookups short-circuit to 1.0 without touching the
//! cache or the network.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Currency, ExchangeRate};
use crate::quotes::QuoteSource;

pub const FX_CACHE_TTL_MINUTES: i64 = 60;

/// Cached rate for the pair if present and younger than the TTL.
fn fresh_cached_rate(conn: &Connection, from: Currency, to: Currency) -> Result<Option<f64>> {
    let mut stmt = conn
        .prepare("SELECT * FROM exchange_rates WHERE from_currency = ?1 AND to_currency = ?2")?;
    let mut rows = stmt.query_map(params![from, to], ExchangeRate::from_row)?;
    let row = match rows.next() {
        Some(row) => row?,
        None => return Ok(None),
    };

    let age = Utc::now().signed_duration_since(row.fetched_at);
    if age > Duration::minutes(FX_CACHE_TTL_MINUTES) {
        return Ok(None); // expired
    }
    Ok(Some(row.rate))
}

fn store_rate(
    conn: &Connection,
    from: Currency,
    to: Currency,
    rate: f64,
    source: &str,
) -> Result<()> {
    conn.execute(
        r#"INSERT INTO exchange_rates (from_currency, to_currency, rate, source, fetched_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(from_currency, to_currency)
           DO UPDATE SET rate = ?3, source = ?4, fetched_at = ?5"#,
        params![from, to, rate, source, Utc::now()],
    )?;
    Ok(())
}

/// Fetch the exchange rate for a currency pair, using the cache while fresh.
pub async fn fetch_rate(
    db: &Database,
    source: &dyn QuoteSource,
    from: Currency,
    to: Currency,
) -> Result<f64> {
    if from == to {
        return Ok(1.0);
    }

    if let Some(rate) = db.read(|conn| fresh_cached_rate(conn, from, to))? {
        return Ok(rate);
    }

    let rate = source
        .latest_fx_rate(from, to)
        .await
        .map_err(|e| Error::RateUnavailable {
            pair: format!("{}/{}", from.as_str(), to.as_str()),
            reason: e.to_string(),
        })?;

    db.write(|conn| store_rate(conn, from, to, rate, source.name()))?;
    Ok(rate)
}

/// Convert an amount from one currency to another at the latest rate.
pub async fn convert(
    db: &Database,
    source: &dyn QuoteSource,
    amount: f64,
    from: Currency,
    to: Currency,
) -> Result<f64> {
    let rate = fetch_rate(db, source, from, to).await?;
    Ok(amount * rate)
}

/// Rates from every supported currency into `base` (base itself maps to 1.0).
pub async fn all_rates(
    db: &Database,
    source: &dyn QuoteSource,
    base: Currency,
) -> Result<HashMap<Currency, f64>> {
    let mut rates = HashMap::new();
    for currency in Currency::ALL {
        let rate = fetch_rate(db, source, currency, base).await?;
        rates.insert(currency, rate);
    }
    Ok(rates)
}
