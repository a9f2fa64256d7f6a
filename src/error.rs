use thiserror::Error;

/// Errors surfaced by the ledger and valuation engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input: negative shares/price, unknown enum value, bad ticker.
    /// Detected before any mutation.
    #[error("{0}")]
    Validation(String),

    /// A sell exceeds the held share count. Aborts the whole trade unit.
    #[error("cannot sell {requested} shares of {ticker}, only {held} held")]
    InsufficientShares {
        ticker: String,
        requested: f64,
        held: f64,
    },

    /// Operation attempted against a terminal planned order or other
    /// state-machine violation.
    #[error("{0}")]
    InvalidState(String),

    /// Referenced user/account/order/transaction does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The market data source could not supply a price for this ticker.
    #[error("could not fetch price for {ticker}: {reason}")]
    PriceUnavailable { ticker: String, reason: String },

    /// The market data source could not supply an FX rate for this pair.
    #[error("could not fetch FX rate for {pair}: {reason}")]
    RateUnavailable { pair: String, reason: String },

    /// Underlying store failure; the attempted unit is rolled back in full.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
