//! Cash ledger: per-currency balances and immutable movement history.
//!
//! Balances may go negative (margin, import lag); there is deliberately no
//! floor check.

use rusqlite::{params, Connection};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CashCategory, CashPosition, CashTransaction, Currency};

pub(crate) fn find_in(
    conn: &Connection,
    account_id: i64,
    currency: Currency,
) -> Result<Option<CashPosition>> {
    let mut stmt =
        conn.prepare("SELECT * FROM cash_positions WHERE account_id = ?1 AND currency = ?2")?;
    let mut rows = stmt.query_map(params![account_id, currency], CashPosition::from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub(crate) fn list_in(conn: &Connection, account_id: i64) -> Result<Vec<CashPosition>> {
    let mut stmt =
        conn.prepare("SELECT * FROM cash_positions WHERE account_id = ?1 ORDER BY currency")?;
    let positions = stmt
        .query_map([account_id], CashPosition::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(positions)
}

pub(crate) fn set_in(
    conn: &Connection,
    account_id: i64,
    currency: Currency,
    balance: f64,
) -> Result<()> {
    conn.execute(
        r#"INSERT INTO cash_positions (account_id, currency, balance)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(account_id, currency)
           DO UPDATE SET balance = ?3, updated_at = datetime('now')"#,
        params![account_id, currency, balance],
    )?;
    Ok(())
}

/// Adjust a cash balance by a signed amount, creating the position row on
/// first movement. Runs inside the caller's transaction scope so trade and
/// cash mutations commit together.
pub fn adjust_cash(
    conn: &Connection,
    account_id: i64,
    currency: Currency,
    amount: f64,
) -> Result<()> {
    match find_in(conn, account_id, currency)? {
        Some(position) => {
            conn.execute(
                r#"UPDATE cash_positions
                   SET balance = ?1, updated_at = datetime('now')
                   WHERE account_id = ?2 AND currency = ?3"#,
                params![position.balance + amount, account_id, currency],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO cash_positions (account_id, currency, balance) VALUES (?1, ?2, ?3)",
                params![account_id, currency, amount],
            )?;
        }
    }
    Ok(())
}

/// Set a cash balance directly. Idempotent overwrite, used by snapshot
/// imports and reconciliation.
pub fn set_cash(
    db: &Database,
    account_id: i64,
    currency: Currency,
    balance: f64,
) -> Result<CashPosition> {
    db.write(|conn| {
        set_in(conn, account_id, currency, balance)?;
        find_in(conn, account_id, currency)?
            .ok_or_else(|| Error::NotFound(format!("cash position {}", currency.as_str())))
    })
}

/// Get the cash position for one currency, if present.
pub fn get_cash(db: &Database, account_id: i64, currency: Currency) -> Result<Option<CashPosition>> {
    db.read(|conn| find_in(conn, account_id, currency))
}

/// List all cash positions in an account, ordered by currency.
pub fn list_cash(db: &Database, account_id: i64) -> Result<Vec<CashPosition>> {
    db.read(|conn| list_in(conn, account_id))
}

/// Record a cash movement (deposit, withdrawal, dividend, ...) and update the
/// balance. Balance adjustment and movement append commit as one unit.
pub fn record_cash_transaction(
    db: &Database,
    account_id: i64,
    currency: Currency,
    amount: f64,
    category: CashCategory,
    description: Option<&str>,
    executed_at: Option<&str>,
) -> Result<CashTransaction> {
    db.write(|conn| {
        adjust_cash(conn, account_id, currency, amount)?;

        match executed_at {
            Some(ts) => conn.execute(
                r#"INSERT INTO cash_transactions
                   (account_id, currency, amount, category, description, executed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![account_id, currency, amount, category, description, ts],
            )?,
            None => conn.execute(
                r#"INSERT INTO cash_transactions
                   (account_id, currency, amount, category, description, executed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))"#,
                params![account_id, currency, amount, category, description],
            )?,
        };

        let movement = conn.query_row(
            "SELECT * FROM cash_transactions WHERE id = ?1",
            [conn.last_insert_rowid()],
            CashTransaction::from_row,
        )?;
        Ok(movement)
    })
}

/// List recent cash movements for an account, newest first.
pub fn list_cash_transactions(
    db: &Database,
    account_id: i64,
    limit: u32,
) -> Result<Vec<CashTransaction>> {
    db.read(|conn| {
        let mut stmt = conn.prepare(
            r#"SELECT * FROM cash_transactions
               WHERE account_id = ?1
               ORDER BY executed_at DESC, id DESC
               LIMIT ?2"#,
        )?;
        let movements = stmt
            .query_map(params![account_id, limit], CashTransaction::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(movements)
    })
}
