//! Domain model types: row structs, closed enums, and market constants.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Row, ToSql};
use serde::{Deserialize, Serialize};

/// Taiwan stock sell tax: 0.3% of gross proceeds.
pub const TW_SELL_TAX_RATE: f64 = 0.003;

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::from_str(s).ok_or_else(|| {
                    FromSqlError::Other(
                        format!(concat!(stringify!($ty), ": unrecognized value '{}'"), s).into(),
                    )
                })
            }
        }
    };
}

/// Supported markets. Each market implies exactly one settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Market {
    Tw,
    Us,
    Sg,
}

impl Market {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TW" => Some(Self::Tw),
            "US" => Some(Self::Us),
            "SG" => Some(Self::Sg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tw => "TW",
            Self::Us => "US",
            Self::Sg => "SG",
        }
    }

    /// Settlement currency for this market. Total: every market maps to
    /// exactly one currency and an account never changes it.
    pub fn currency(&self) -> Currency {
        match self {
            Self::Tw => Currency::Twd,
            Self::Us => Currency::Usd,
            Self::Sg => Currency::Sgd,
        }
    }

    /// Ticker suffix convention for this market (e.g. "2330.TW", "D05.SI").
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Tw => ".TW",
            Self::Us => "",
            Self::Sg => ".SI",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Tw => "Taiwan",
            Self::Us => "United States",
            Self::Sg => "Singapore",
        }
    }
}

sql_text_enum!(Market);

/// Supported cash currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    Twd,
    Usd,
    Sgd,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Twd, Currency::Usd, Currency::Sgd];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TWD" => Some(Self::Twd),
            "USD" => Some(Self::Usd),
            "SGD" => Some(Self::Sgd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twd => "TWD",
            Self::Usd => "USD",
            Self::Sgd => "SGD",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Twd => "NT$",
            Self::Usd => "$",
            Self::Sgd => "S$",
        }
    }
}

sql_text_enum!(Currency);

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

sql_text_enum!(TradeAction);

/// Cash movement categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashCategory {
    Deposit,
    Withdrawal,
    Dividend,
    Interest,
    Fee,
    FxConversion,
}

impl CashCategory {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(Self::Deposit),
            "WITHDRAWAL" => Some(Self::Withdrawal),
            "DIVIDEND" => Some(Self::Dividend),
            "INTEREST" => Some(Self::Interest),
            "FEE" => Some(Self::Fee),
            "FX_CONVERSION" => Some(Self::FxConversion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Dividend => "DIVIDEND",
            Self::Interest => "INTEREST",
            Self::Fee => "FEE",
            Self::FxConversion => "FX_CONVERSION",
        }
    }
}

sql_text_enum!(CashCategory);

/// Planned order lifecycle. `Executed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
}

impl OrderStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "EXECUTED" => Some(Self::Executed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executed => "EXECUTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

sql_text_enum!(OrderStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPriority {
    High,
    Normal,
    Low,
}

impl OrderPriority {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "NORMAL" => Some(Self::Normal),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

sql_text_enum!(OrderPriority);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Brokerage,
    Bank,
}

impl AccountKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "brokerage" => Some(Self::Brokerage),
            "bank" => Some(Self::Bank),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brokerage => "brokerage",
            Self::Bank => "bank",
        }
    }
}

sql_text_enum!(AccountKind);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
}

impl User {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            display_name: row.get("display_name")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub broker: String,
    pub market: Market,
    pub currency: Currency,
    pub kind: AccountKind,
    pub is_active: bool,
    pub created_at: String,
}

impl Account {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("account_name")?,
            broker: row.get("broker")?,
            market: row.get("market")?,
            currency: row.get("currency")?,
            kind: row.get("account_type")?,
            is_active: row.get("is_active")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A stock position. One row per (account, ticker); a position sold down to
/// zero shares is deleted, never kept around.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub id: i64,
    pub account_id: i64,
    pub ticker: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl Holding {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            ticker: row.get("ticker")?,
            shares: row.get("shares")?,
            avg_cost: row.get("avg_cost")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Immutable trade record. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub ticker: String,
    pub action: TradeAction,
    pub shares: f64,
    pub price: f64,
    pub fee: f64,
    pub tax: f64,
    pub currency: Currency,
    pub notes: Option<String>,
    pub executed_at: String,
    pub created_at: String,
}

impl Transaction {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            ticker: row.get("ticker")?,
            action: row.get("action")?,
            shares: row.get("shares")?,
            price: row.get("price")?,
            fee: row.get("fee")?,
            tax: row.get("tax")?,
            currency: row.get("currency")?,
            notes: row.get("notes")?,
            executed_at: row.get("executed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Per-currency running cash balance. Created lazily on first movement; the
/// currency need not match the account's settlement currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashPosition {
    pub id: i64,
    pub account_id: i64,
    pub currency: Currency,
    pub balance: f64,
    pub updated_at: String,
}

impl CashPosition {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            currency: row.get("currency")?,
            balance: row.get("balance")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Immutable cash movement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashTransaction {
    pub id: i64,
    pub account_id: i64,
    pub currency: Currency,
    pub amount: f64,
    pub category: CashCategory,
    pub description: Option<String>,
    pub executed_at: String,
    pub created_at: String,
}

impl CashTransaction {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            currency: row.get("currency")?,
            amount: row.get("amount")?,
            category: row.get("category")?,
            description: row.get("description")?,
            executed_at: row.get("executed_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A recorded trading intent. The target price is advisory only; execution
/// uses the actual fill price supplied at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOrder {
    pub id: i64,
    pub account_id: i64,
    pub ticker: String,
    pub action: TradeAction,
    pub shares: f64,
    pub target_price: Option<f64>,
    pub reason: Option<String>,
    pub priority: OrderPriority,
    pub status: OrderStatus,
    pub created_at: String,
    pub executed_at: Option<String>,
    pub linked_transaction_id: Option<i64>,
}

impl PlannedOrder {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            ticker: row.get("ticker")?,
            action: row.get("action")?,
            shares: row.get("shares")?,
            target_price: row.get("target_price")?,
            reason: row.get("reason")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            executed_at: row.get("executed_at")?,
            linked_transaction_id: row.get("linked_transaction_id")?,
        })
    }
}

/// Cached security price. Single row per ticker, overwritten on refresh;
/// staleness is judged against `fetched_at`, not stored as an expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPrice {
    pub ticker: String,
    pub price: f64,
    pub currency: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl CachedPrice {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            ticker: row.get("ticker")?,
            price: row.get("price")?,
            currency: row.get("currency")?,
            source: row.get("source")?,
            fetched_at: row.get("fetched_at")?,
        })
    }
}

/// Cached FX rate. Single row per currency pair, overwritten on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub rate: f64,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            from_currency: row.get("from_currency")?,
            to_currency: row.get("to_currency")?,
            rate: row.get("rate")?,
            source: row.get("source")?,
            fetched_at: row.get("fetched_at")?,
        })
    }
}
