//! Portfolio aggregation: point-in-time valuations across holdings, cash,
//! accounts, and users.
//!
//! Read-only: summaries compose ledger state with the price/FX caches and
//! never mutate either. Holdings with no resolvable price report null
//! valuation fields instead of failing the whole summary.

use serde::Serialize;

use crate::accounts;
use crate::cash;
use crate::currency;
use crate::db::Database;
use crate::error::Result;
use crate::holdings;
use crate::models::{Account, CashPosition, Currency, Holding, User};
use crate::prices;
use crate::quotes::QuoteSource;
use crate::users;

/// A holding with its market valuation, when a price was resolvable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingValuation {
    pub holding: Holding,
    pub current_price: Option<f64>,
    pub market_value: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
}

/// Full valuation of one account in its settlement currency.
///
/// `total_cash_value` sums only settlement-currency cash; foreign-currency
/// positions stay visible in `cash` but are excluded from the account total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account: Account,
    pub holdings: Vec<HoldingValuation>,
    pub cash: Vec<CashPosition>,
    pub total_stock_value: f64,
    pub total_cash_value: f64,
    pub total_value: f64,
    pub currency: Currency,
}

/// An account summary plus the FX rate applied to roll it into a user-level
/// total. The rate is recorded for display and audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRollup {
    pub summary: AccountSummary,
    pub fx_rate: f64,
    pub converted_total: f64,
}

/// All active accounts of one user, converted into a base currency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user: User,
    pub accounts: Vec<AccountRollup>,
    pub grand_total: f64,
    pub base_currency: Currency,
}

/// Everything, across all users.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalSummary {
    pub users: Vec<UserSummary>,
    pub grand_total: f64,
    pub base_currency: Currency,
}

/// Value one account: every holding priced through the cache, cash read
/// from the ledger.
pub async fn account_summary(
    db: &Database,
    source: &dyn QuoteSource,
    account_id: i64,
) -> Result<AccountSummary> {
    let account = accounts::get_account(db, account_id)?;
    let held = holdings::list_holdings(db, account_id)?;
    let cash_positions = cash::list_cash(db, account_id)?;

    let tickers: Vec<String> = held.iter().map(|h| h.ticker.clone()).collect();
    let price_results = prices::fetch_prices(db, source, &tickers).await;

    let mut valuations = Vec::with_capacity(held.len());
    let mut total_stock_value = 0.0;

    for holding in held {
        let current_price = price_results
            .get(&holding.ticker)
            .and_then(|result| result.price);

        let valuation = match current_price {
            Some(price) => {
                let market_value = price * holding.shares;
                let cost_basis = holding.avg_cost * holding.shares;
                let pnl_pct = if holding.avg_cost > 0.0 {
                    (price / holding.avg_cost - 1.0) * 100.0
                } else {
                    0.0
                };
                total_stock_value += market_value;
                HoldingValuation {
                    current_price: Some(price),
                    market_value: Some(market_value),
                    unrealized_pnl: Some(market_value - cost_basis),
                    pnl_pct: Some(pnl_pct),
                    holding,
                }
            }
            None => HoldingValuation {
                holding,
                current_price: None,
                market_value: None,
                unrealized_pnl: None,
                pnl_pct: None,
            },
        };
        valuations.push(valuation);
    }

    let total_cash_value: f64 = cash_positions
        .iter()
        .filter(|position| position.currency == account.currency)
        .map(|position| position.balance)
        .sum();

    let currency = account.currency;
    Ok(AccountSummary {
        account,
        holdings: valuations,
        cash: cash_positions,
        total_stock_value,
        total_cash_value,
        total_value: total_stock_value + total_cash_value,
        currency,
    })
}

/// Value every active account of a user and roll them up into one base
/// currency. FX rates are prefetched once per call.
pub async fn user_summary(
    db: &Database,
    source: &dyn QuoteSource,
    username: &str,
    base_currency: Currency,
) -> Result<UserSummary> {
    let user = users::get_user_by_username(db, username)?;
    let user_accounts = accounts::list_accounts(db, Some(user.id))?;

    let fx_rates = currency::all_rates(db, source, base_currency).await?;

    let mut rollups = Vec::with_capacity(user_accounts.len());
    let mut grand_total = 0.0;

    for account in user_accounts {
        let fx_rate = fx_rates.get(&account.currency).copied().unwrap_or(1.0);
        let summary = account_summary(db, source, account.id).await?;
        let converted_total = summary.total_value * fx_rate;
        grand_total += converted_total;
        rollups.push(AccountRollup {
            summary,
            fx_rate,
            converted_total,
        });
    }

    Ok(UserSummary {
        user,
        accounts: rollups,
        grand_total,
        base_currency,
    })
}

/// Value every user in the store.
pub async fn total_summary(
    db: &Database,
    source: &dyn QuoteSource,
    base_currency: Currency,
) -> Result<TotalSummary> {
    let all_users = users::list_users(db)?;

    let mut summaries = Vec::with_capacity(all_users.len());
    let mut grand_total = 0.0;

    for user in all_users {
        let summary = user_summary(db, source, &user.username, base_currency).await?;
        grand_total += summary.grand_total;
        summaries.push(summary);
    }

    Ok(TotalSummary {
        users: summaries,
        grand_total,
        base_currency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, CashCategory, Market, TradeAction};
    use crate::quotes::stub::StubSource;
    use crate::transactions;

    const EPS: f64 = 1e-6;

    fn setup_tw_account(db: &Database, username: &str) -> i64 {
        let user = users::create_user(db, username, username).unwrap();
        let account = accounts::create_account(
            db,
            user.id,
            "Fubon TW",
            "Fubon",
            Market::Tw,
            AccountKind::Brokerage,
        )
        .unwrap();
        account.id
    }

    #[tokio::test]
    async fn account_summary_values_holdings_and_settlement_cash() {
        let db = Database::open_in_memory().unwrap();
        let account_id = setup_tw_account(&db, "amy");
        cash::record_cash_transaction(
            &db,
            account_id,
            Currency::Twd,
            1_000_000.0,
            CashCategory::Deposit,
            None,
            None,
        )
        .unwrap();
        transactions::record_transaction(
            &db,
            account_id,
            "2330.TW",
            TradeAction::Buy,
            1000.0,
            580.5,
            20.0,
            0.0,
            None,
            None,
        )
        .unwrap();
        // Foreign cash: visible, but outside the account total.
        cash::set_cash(&db, account_id, Currency::Usd, 200.0).unwrap();

        let source = StubSource::new().with_price("2330.TW", 600.0, "TWD");
        let summary = account_summary(&db, &source, account_id).await.unwrap();

        assert_eq!(summary.currency, Currency::Twd);
        assert_eq!(summary.holdings.len(), 1);

        let valuation = &summary.holdings[0];
        assert_eq!(valuation.current_price, Some(600.0));
        assert!((valuation.market_value.unwrap() - 600_000.0).abs() < EPS);
        assert!((valuation.unrealized_pnl.unwrap() - 19_500.0).abs() < EPS);
        assert!((valuation.pnl_pct.unwrap() - (600.0 / 580.5 - 1.0) * 100.0).abs() < EPS);

        let expected_cash = 1_000_000.0 - 580_500.0 - 20.0;
        assert!((summary.total_cash_value - expected_cash).abs() < EPS);
        assert!((summary.total_stock_value - 600_000.0).abs() < EPS);
        assert!((summary.total_value - (600_000.0 + expected_cash)).abs() < EPS);
        assert_eq!(summary.cash.len(), 2);
    }

    #[tokio::test]
    async fn unpriced_holding_reports_null_fields_not_failure() {
        let db = Database::open_in_memory().unwrap();
        let account_id = setup_tw_account(&db, "amy");
        holdings::add_holding(&db, account_id, "2330.TW", 1000.0, 580.5).unwrap();
        holdings::add_holding(&db, account_id, "9999.TW", 500.0, 10.0).unwrap();

        let source = StubSource::new().with_price("2330.TW", 600.0, "TWD");
        let summary = account_summary(&db, &source, account_id).await.unwrap();

        let unpriced = summary
            .holdings
            .iter()
            .find(|v| v.holding.ticker == "9999.TW")
            .unwrap();
        assert!(unpriced.current_price.is_none());
        assert!(unpriced.market_value.is_none());
        assert!(unpriced.pnl_pct.is_none());

        // Only the priced holding contributes to the total.
        assert!((summary.total_stock_value - 600_000.0).abs() < EPS);
    }

    #[tokio::test]
    async fn zero_cost_holding_reports_zero_pnl_pct() {
        let db = Database::open_in_memory().unwrap();
        let account_id = setup_tw_account(&db, "amy");
        holdings::add_holding(&db, account_id, "0050.TW", 100.0, 0.0).unwrap();

        let source = StubSource::new().with_price("0050.TW", 150.0, "TWD");
        let summary = account_summary(&db, &source, account_id).await.unwrap();
        assert_eq!(summary.holdings[0].pnl_pct, Some(0.0));
    }

    #[tokio::test]
    async fn user_summary_converts_each_account_into_base() {
        let db = Database::open_in_memory().unwrap();
        let user = users::create_user(&db, "amy", "Amy").unwrap();
        let tw = accounts::create_account(
            &db, user.id, "Fubon TW", "Fubon", Market::Tw, AccountKind::Brokerage,
        )
        .unwrap();
        let us = accounts::create_account(
            &db, user.id, "Firstrade", "Firstrade", Market::Us, AccountKind::Brokerage,
        )
        .unwrap();
        cash::set_cash(&db, tw.id, Currency::Twd, 100_000.0).unwrap();
        cash::set_cash(&db, us.id, Currency::Usd, 1_000.0).unwrap();

        let source = StubSource::new()
            .with_rate(Currency::Usd, Currency::Twd, 31.58)
            .with_rate(Currency::Sgd, Currency::Twd, 24.92);

        let summary = user_summary(&db, &source, "amy", Currency::Twd)
            .await
            .unwrap();
        assert_eq!(summary.accounts.len(), 2);

        let us_rollup = summary
            .accounts
            .iter()
            .find(|r| r.summary.account.id == us.id)
            .unwrap();
        assert_eq!(us_rollup.fx_rate, 31.58);
        assert!((us_rollup.converted_total - 31_580.0).abs() < EPS);

        assert!((summary.grand_total - (100_000.0 + 31_580.0)).abs() < EPS);
    }

    #[tokio::test]
    async fn deactivated_accounts_are_excluded_from_user_summary() {
        let db = Database::open_in_memory().unwrap();
        let user = users::create_user(&db, "amy", "Amy").unwrap();
        let account = accounts::create_account(
            &db, user.id, "Old", "Fubon", Market::Tw, AccountKind::Brokerage,
        )
        .unwrap();
        cash::set_cash(&db, account.id, Currency::Twd, 999_999.0).unwrap();
        accounts::deactivate_account(&db, account.id).unwrap();

        let source = StubSource::new()
            .with_rate(Currency::Usd, Currency::Twd, 31.58)
            .with_rate(Currency::Sgd, Currency::Twd, 24.92);
        let summary = user_summary(&db, &source, "amy", Currency::Twd)
            .await
            .unwrap();
        assert!(summary.accounts.is_empty());
        assert_eq!(summary.grand_total, 0.0);
    }

    #[tokio::test]
    async fn total_summary_folds_over_all_users() {
        let db = Database::open_in_memory().unwrap();
        for (username, balance) in [("amy", 100_000.0), ("ben", 50_000.0)] {
            let account_id = setup_tw_account(&db, username);
            cash::set_cash(&db, account_id, Currency::Twd, balance).unwrap();
        }

        let source = StubSource::new()
            .with_rate(Currency::Usd, Currency::Twd, 31.58)
            .with_rate(Currency::Sgd, Currency::Twd, 24.92);
        let summary = total_summary(&db, &source, Currency::Twd).await.unwrap();
        assert_eq!(summary.users.len(), 2);
        assert!((summary.grand_total - 150_000.0).abs() < EPS);
    }
}
