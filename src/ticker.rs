//! Ticker normalization, validation, and market detection.

use crate::error::{Error, Result};
use crate::models::Market;

/// Detect the market from the ticker suffix convention.
///
/// "2330.TW" -> TW, "D05.SI" -> SG, anything else -> US.
pub fn detect_market(ticker: &str) -> Market {
    let upper = ticker.to_uppercase();
    if upper.ends_with(".TW") {
        Market::Tw
    } else if upper.ends_with(".SI") {
        Market::Sg
    } else {
        Market::Us
    }
}

/// Normalize a ticker to its canonical uppercase form.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Validate and normalize a ticker: must be non-empty with no embedded
/// whitespace.
pub fn validate_ticker(ticker: &str) -> Result<String> {
    let normalized = normalize_ticker(ticker);
    if normalized.is_empty() || normalized.contains(' ') {
        return Err(Error::Validation(format!("invalid ticker '{}'", ticker)));
    }
    Ok(normalized)
}
