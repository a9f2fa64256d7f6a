//! Transaction recorder: double-entry trade recording (stock + cash).
//!
//! A trade mutates the holding, the cash balance, and the append-only trade
//! log inside a single transaction scope; either all three commit or none
//! does. A sell that fails the share check aborts before any cash or log
//! mutation becomes durable.

use rusqlite::params;

use crate::accounts;
use crate::cash;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::holdings;
use crate::models::{Market, TradeAction, Transaction, TW_SELL_TAX_RATE};
use crate::ticker::validate_ticker;

/// Record a stock trade and update holdings + cash atomically.
///
/// BUY: cash decreases by `shares * price + fee + tax`.
/// SELL: cash increases by `shares * price - fee - tax`.
/// The cash delta is always booked in the account's settlement currency.
#[allow(clippy::too_many_arguments)]
pub fn record_transaction(
    db: &Database,
    account_id: i64,
    ticker: &str,
    action: TradeAction,
    shares: f64,
    price: f64,
    fee: f64,
    tax: f64,
    executed_at: Option<&str>,
    notes: Option<&str>,
) -> Result<Transaction> {
    let ticker = validate_ticker(ticker)?;
    if shares <= 0.0 {
        return Err(Error::Validation("shares must be positive".into()));
    }
    if price <= 0.0 {
        return Err(Error::Validation("price must be positive".into()));
    }
    if fee < 0.0 || tax < 0.0 {
        return Err(Error::Validation("fee and tax must not be negative".into()));
    }

    let account = accounts::get_account(db, account_id)?;
    let currency = account.currency;

    db.write(|conn| {
        holdings::apply_trade(conn, account_id, &ticker, action, shares, price)?;

        let gross = shares * price;
        let cash_delta = match action {
            TradeAction::Buy => -(gross + fee + tax),
            TradeAction::Sell => gross - fee - tax,
        };
        cash::adjust_cash(conn, account_id, currency, cash_delta)?;

        match executed_at {
            Some(ts) => conn.execute(
                r#"INSERT INTO transactions
                   (account_id, ticker, action, shares, price, fee, tax, currency, notes, executed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                params![account_id, ticker, action, shares, price, fee, tax, currency, notes, ts],
            )?,
            None => conn.execute(
                r#"INSERT INTO transactions
                   (account_id, ticker, action, shares, price, fee, tax, currency, notes, executed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))"#,
                params![account_id, ticker, action, shares, price, fee, tax, currency, notes],
            )?,
        };

        let recorded = conn.query_row(
            "SELECT * FROM transactions WHERE id = ?1",
            [conn.last_insert_rowid()],
            Transaction::from_row,
        )?;
        log::debug!(
            "recorded {} {} x {} @ {} for account {}",
            recorded.action.as_str(),
            recorded.shares,
            recorded.ticker,
            recorded.price,
            account_id
        );
        Ok(recorded)
    })
}

/// List trades, newest first, optionally filtered by account and/or ticker.
pub fn list_transactions(
    db: &Database,
    account_id: Option<i64>,
    ticker: Option<&str>,
    limit: u32,
) -> Result<Vec<Transaction>> {
    let ticker = ticker.map(validate_ticker).transpose()?;

    let mut conditions: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(id) = account_id {
        conditions.push("account_id = ?");
        args.push(Box::new(id));
    }
    if let Some(t) = &ticker {
        conditions.push("ticker = ?");
        args.push(Box::new(t.clone()));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    args.push(Box::new(limit));

    let sql = format!(
        "SELECT * FROM transactions {} ORDER BY executed_at DESC, id DESC LIMIT ?",
        where_clause
    );

    db.read(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let trades = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Transaction::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    })
}

/// Get a single trade by id.
pub fn get_transaction(db: &Database, transaction_id: i64) -> Result<Transaction> {
    db.read(|conn| {
        conn.query_row(
            "SELECT * FROM transactions WHERE id = ?1",
            [transaction_id],
            Transaction::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound(format!("transaction {}", transaction_id))
            }
            other => other.into(),
        })
    })
}

/// Estimated sell tax for a gross amount. Taiwan levies 0.3% on sell
/// proceeds; the other supported markets levy none at trade time.
pub fn estimated_sell_tax(market: Market, gross: f64) -> f64 {
    match market {
        Market::Tw => gross * TW_SELL_TAX_RATE,
        Market::Us | Market::Sg => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, CashCategory, Currency};
    use crate::{accounts, cash, holdings, users};

    const EPS: f64 = 1e-6;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = users::create_user(&db, "amy", "Amy").unwrap();
        let account = accounts::create_account(
            &db,
            user.id,
            "Fubon TW",
            "Fubon",
            Market::Tw,
            AccountKind::Brokerage,
        )
        .unwrap();
        (db, account.id)
    }

    #[test]
    fn buy_moves_stock_and_cash_together() {
        let (db, account_id) = setup();
        cash::record_cash_transaction(
            &db,
            account_id,
            Currency::Twd,
            100_000.0,
            CashCategory::Deposit,
            None,
            None,
        )
        .unwrap();

        let trade = record_transaction(
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
        assert_eq!(trade.currency, Currency::Twd);

        let holding = holdings::get_holding(&db, account_id, "2330.TW")
            .unwrap()
            .unwrap();
        assert!((holding.shares - 1000.0).abs() < EPS);
        assert!((holding.avg_cost - 580.5).abs() < EPS);

        // 100,000 - 580,500 - 20 = -480,520 (negative balances accepted)
        let position = cash::get_cash(&db, account_id, Currency::Twd)
            .unwrap()
            .unwrap();
        assert!((position.balance - (-480_520.0)).abs() < EPS);
    }

    #[test]
    fn sell_credits_proceeds_minus_fee_and_tax() {
        let (db, account_id) = setup();
        record_transaction(
            &db,
            account_id,
            "2330.TW",
            TradeAction::Buy,
            1000.0,
            580.5,
            0.0,
            0.0,
            None,
            None,
        )
        .unwrap();
        let before = cash::get_cash(&db, account_id, Currency::Twd)
            .unwrap()
            .unwrap()
            .balance;

        record_transaction(
            &db,
            account_id,
            "2330.TW",
            TradeAction::Sell,
            400.0,
            600.0,
            35.0,
            720.0,
            None,
            None,
        )
        .unwrap();

        let after = cash::get_cash(&db, account_id, Currency::Twd)
            .unwrap()
            .unwrap()
            .balance;
        assert!((after - before - (400.0 * 600.0 - 35.0 - 720.0)).abs() < EPS);

        let holding = holdings::get_holding(&db, account_id, "2330.TW")
            .unwrap()
            .unwrap();
        assert!((holding.shares - 600.0).abs() < EPS);
        assert!((holding.avg_cost - 580.5).abs() < EPS);
    }

    #[test]
    fn failed_sell_leaves_no_trace() {
        let (db, account_id) = setup();
        record_transaction(
            &db,
            account_id,
            "2330.TW",
            TradeAction::Buy,
            100.0,
            580.5,
            0.0,
            0.0,
            None,
            None,
        )
        .unwrap();
        let cash_before = cash::get_cash(&db, account_id, Currency::Twd)
            .unwrap()
            .unwrap()
            .balance;

        let err = record_transaction(
            &db,
            account_id,
            "2330.TW",
            TradeAction::Sell,
            500.0,
            600.0,
            0.0,
            0.0,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientShares { .. }));

        // No cash movement, no trade row, shares untouched.
        let cash_after = cash::get_cash(&db, account_id, Currency::Twd)
            .unwrap()
            .unwrap()
            .balance;
        assert_eq!(cash_before, cash_after);
        assert_eq!(
            list_transactions(&db, Some(account_id), None, 50)
                .unwrap()
                .len(),
            1
        );
        let holding = holdings::get_holding(&db, account_id, "2330.TW")
            .unwrap()
            .unwrap();
        assert!((holding.shares - 100.0).abs() < EPS);
    }

    #[test]
    fn rejects_malformed_input_before_any_mutation() {
        let (db, account_id) = setup();
        for (shares, price, fee, tax) in [
            (0.0, 580.5, 0.0, 0.0),
            (-10.0, 580.5, 0.0, 0.0),
            (10.0, 0.0, 0.0, 0.0),
            (10.0, -1.0, 0.0, 0.0),
            (10.0, 580.5, -1.0, 0.0),
            (10.0, 580.5, 0.0, -1.0),
        ] {
            let err = record_transaction(
                &db, account_id, "2330.TW", TradeAction::Buy, shares, price, fee, tax, None, None,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{shares}/{price}/{fee}/{tax}");
        }
        assert!(list_transactions(&db, Some(account_id), None, 50)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unknown_account_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = record_transaction(
            &db, 99, "AAPL", TradeAction::Buy, 1.0, 1.0, 0.0, 0.0, None, None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn list_filters_by_ticker() {
        let (db, account_id) = setup();
        record_transaction(
            &db, account_id, "2330.TW", TradeAction::Buy, 10.0, 580.5, 0.0, 0.0, None, None,
        )
        .unwrap();
        record_transaction(
            &db, account_id, "2603.TW", TradeAction::Buy, 10.0, 30.0, 0.0, 0.0, None, None,
        )
        .unwrap();

        let only = list_transactions(&db, Some(account_id), Some("2330.tw"), 50).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].ticker, "2330.TW");
    }

    #[test]
    fn tw_sell_tax_estimate() {
        assert!((estimated_sell_tax(Market::Tw, 240_000.0) - 720.0).abs() < EPS);
        assert_eq!(estimated_sell_tax(Market::Us, 240_000.0), 0.0);
    }
}
