//! Holding ledger: per-account stock positions with weighted-average cost.
//!
//! All lots merge into a single synthetic lot: every buy recomputes the
//! share-weighted average cost, every sell leaves the cost untouched. No
//! tax-lot (FIFO/LIFO) tracking.

use rusqlite::{params, Connection};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Holding, TradeAction};
use crate::ticker::validate_ticker;

pub(crate) fn find_in(
    conn: &Connection,
    account_id: i64,
    ticker: &str,
) -> Result<Option<Holding>> {
    let mut stmt =
        conn.prepare("SELECT * FROM holdings WHERE account_id = ?1 AND ticker = ?2")?;
    let mut rows = stmt.query_map(params![account_id, ticker], Holding::from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub(crate) fn list_in(conn: &Connection, account_id: i64) -> Result<Vec<Holding>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM holdings WHERE account_id = ?1 AND shares > 0 ORDER BY ticker",
    )?;
    let holdings = stmt
        .query_map([account_id], Holding::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(holdings)
}

pub(crate) fn insert_in(
    conn: &Connection,
    account_id: i64,
    ticker: &str,
    shares: f64,
    avg_cost: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO holdings (account_id, ticker, shares, avg_cost) VALUES (?1, ?2, ?3, ?4)",
        params![account_id, ticker, shares, avg_cost],
    )?;
    Ok(())
}

pub(crate) fn overwrite_in(
    conn: &Connection,
    account_id: i64,
    ticker: &str,
    shares: f64,
    avg_cost: f64,
) -> Result<()> {
    conn.execute(
        r#"UPDATE holdings
           SET shares = ?1, avg_cost = ?2, updated_at = datetime('now')
           WHERE account_id = ?3 AND ticker = ?4"#,
        params![shares, avg_cost, account_id, ticker],
    )?;
    Ok(())
}

pub(crate) fn delete_in(conn: &Connection, account_id: i64, ticker: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM holdings WHERE account_id = ?1 AND ticker = ?2",
        params![account_id, ticker],
    )?;
    Ok(())
}

/// Apply a BUY or SELL to the position. Runs inside the caller's transaction
/// scope (the transaction recorder pairs it with the matching cash delta and
/// the trade log append).
///
/// BUY merges into the weighted-average cost; SELL decrements shares, leaves
/// the cost untouched, and deletes the row when the balance reaches zero.
pub fn apply_trade(
    conn: &Connection,
    account_id: i64,
    ticker: &str,
    action: TradeAction,
    shares: f64,
    price: f64,
) -> Result<()> {
    let ticker = validate_ticker(ticker)?;
    let existing = find_in(conn, account_id, &ticker)?;

    match action {
        TradeAction::Buy => match existing {
            Some(holding) => {
                let new_shares = holding.shares + shares;
                let new_avg_cost =
                    (holding.shares * holding.avg_cost + shares * price) / new_shares;
                overwrite_in(conn, account_id, &ticker, new_shares, new_avg_cost)?;
            }
            None => insert_in(conn, account_id, &ticker, shares, price)?,
        },
        TradeAction::Sell => {
            let holding = match existing {
                Some(h) if h.shares >= shares => h,
                other => {
                    return Err(Error::InsufficientShares {
                        ticker,
                        requested: shares,
                        held: other.map(|h| h.shares).unwrap_or(0.0),
                    });
                }
            };
            let remaining = holding.shares - shares;
            if remaining == 0.0 {
                delete_in(conn, account_id, &ticker)?;
            } else {
                // avg_cost stays the same on SELL
                conn.execute(
                    r#"UPDATE holdings
                       SET shares = ?1, updated_at = datetime('now')
                       WHERE account_id = ?2 AND ticker = ?3"#,
                    params![remaining, account_id, ticker],
                )?;
            }
        }
    }
    Ok(())
}

/// Add or merge a holding directly, without a trade record. Used to seed
/// initial positions and by manual imports; merging uses the same
/// weighted-average formula as a buy.
pub fn add_holding(
    db: &Database,
    account_id: i64,
    ticker: &str,
    shares: f64,
    avg_cost: f64,
) -> Result<Holding> {
    let ticker = validate_ticker(ticker)?;
    db.write(|conn| {
        match find_in(conn, account_id, &ticker)? {
            Some(holding) => {
                let total_shares = holding.shares + shares;
                let new_avg_cost = if total_shares > 0.0 {
                    (holding.shares * holding.avg_cost + shares * avg_cost) / total_shares
                } else {
                    0.0
                };
                overwrite_in(conn, account_id, &ticker, total_shares, new_avg_cost)?;
            }
            None => insert_in(conn, account_id, &ticker, shares, avg_cost)?,
        }
        find_in(conn, account_id, &ticker)?
            .ok_or_else(|| Error::NotFound(format!("holding {}", ticker)))
    })
}

/// Get a single holding, if present.
pub fn get_holding(db: &Database, account_id: i64, ticker: &str) -> Result<Option<Holding>> {
    let ticker = validate_ticker(ticker)?;
    db.read(|conn| find_in(conn, account_id, &ticker))
}

/// List all open holdings in an account, ordered by ticker.
pub fn list_holdings(db: &Database, account_id: i64) -> Result<Vec<Holding>> {
    db.read(|conn| list_in(conn, account_id))
}

/// Remove a holding entirely, regardless of share count.
pub fn remove_holding(db: &Database, account_id: i64, ticker: &str) -> Result<()> {
    let ticker = validate_ticker(ticker)?;
    db.write(|conn| delete_in(conn, account_id, &ticker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts;
    use crate::models::{AccountKind, Market};
    use crate::users;

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
    fn buys_accumulate_weighted_average_cost() {
        let (db, account_id) = setup();
        let buys = [(1000.0, 580.5), (500.0, 600.0), (250.0, 550.0)];

        for (shares, price) in buys {
            db.write(|conn| {
                apply_trade(conn, account_id, "2330.TW", TradeAction::Buy, shares, price)
            })
            .unwrap();
        }

        let total_shares: f64 = buys.iter().map(|(s, _)| s).sum();
        let expected_cost: f64 =
            buys.iter().map(|(s, p)| s * p).sum::<f64>() / total_shares;

        let holding = get_holding(&db, account_id, "2330.TW").unwrap().unwrap();
        assert!((holding.shares - total_shares).abs() < EPS);
        assert!((holding.avg_cost - expected_cost).abs() < EPS);
    }

    #[test]
    fn sell_keeps_avg_cost_and_sell_all_deletes_row() {
        let (db, account_id) = setup();
        db.write(|conn| {
            apply_trade(conn, account_id, "2330.TW", TradeAction::Buy, 1000.0, 580.5)
        })
        .unwrap();

        db.write(|conn| {
            apply_trade(conn, account_id, "2330.TW", TradeAction::Sell, 400.0, 600.0)
        })
        .unwrap();
        let holding = get_holding(&db, account_id, "2330.TW").unwrap().unwrap();
        assert!((holding.shares - 600.0).abs() < EPS);
        assert!((holding.avg_cost - 580.5).abs() < EPS);

        db.write(|conn| {
            apply_trade(conn, account_id, "2330.TW", TradeAction::Sell, 600.0, 610.0)
        })
        .unwrap();
        assert!(get_holding(&db, account_id, "2330.TW").unwrap().is_none());
    }

    #[test]
    fn oversell_is_rejected_and_state_unchanged() {
        let (db, account_id) = setup();
        db.write(|conn| {
            apply_trade(conn, account_id, "2330.TW", TradeAction::Buy, 100.0, 580.5)
        })
        .unwrap();

        let err = db
            .write(|conn| {
                apply_trade(conn, account_id, "2330.TW", TradeAction::Sell, 150.0, 600.0)
            })
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientShares { .. }));

        let holding = get_holding(&db, account_id, "2330.TW").unwrap().unwrap();
        assert!((holding.shares - 100.0).abs() < EPS);
        assert!((holding.avg_cost - 580.5).abs() < EPS);
    }

    #[test]
    fn sell_with_no_position_reports_zero_held() {
        let (db, account_id) = setup();
        let err = db
            .write(|conn| {
                apply_trade(conn, account_id, "AAPL", TradeAction::Sell, 10.0, 100.0)
            })
            .unwrap_err();
        match err {
            Error::InsufficientShares { held, .. } => assert_eq!(held, 0.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn manual_add_merges_like_a_buy() {
        let (db, account_id) = setup();
        add_holding(&db, account_id, "aapl", 10.0, 150.0).unwrap();
        let merged = add_holding(&db, account_id, "AAPL", 10.0, 170.0).unwrap();

        assert_eq!(merged.ticker, "AAPL");
        assert!((merged.shares - 20.0).abs() < EPS);
        assert!((merged.avg_cost - 160.0).abs() < EPS);
    }

    #[test]
    fn listing_orders_by_ticker() {
        let (db, account_id) = setup();
        add_holding(&db, account_id, "2603.TW", 100.0, 30.0).unwrap();
        add_holding(&db, account_id, "2330.TW", 100.0, 580.0).unwrap();

        let holdings = list_holdings(&db, account_id).unwrap();
        let tickers: Vec<_> = holdings.iter().map(|h| h.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["2330.TW", "2603.TW"]);
    }
}
