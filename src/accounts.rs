//! Account management: create, list, deactivate.
//!
//! An account's currency is derived from its market at creation time and
//! never changes afterwards.

use rusqlite::{params, Connection};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Account, AccountKind, Market};

/// Create a new account for a user. The settlement currency is assigned from
/// the market, never supplied by the caller.
pub fn create_account(
    db: &Database,
    user_id: i64,
    name: &str,
    broker: &str,
    market: Market,
    kind: AccountKind,
) -> Result<Account> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("account name must not be empty".into()));
    }

    let currency = market.currency();
    db.write(|conn| {
        conn.execute(
            r#"INSERT INTO accounts (user_id, account_name, broker, market, currency, account_type)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![user_id, name, broker, market, currency, kind],
        )?;
        let account = conn.query_row(
            "SELECT * FROM accounts WHERE id = ?1",
            [conn.last_insert_rowid()],
            Account::from_row,
        )?;
        Ok(account)
    })
}

pub(crate) fn get_account_in(conn: &Connection, account_id: i64) -> Result<Account> {
    conn.query_row(
        "SELECT * FROM accounts WHERE id = ?1",
        [account_id],
        Account::from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("account {}", account_id)),
        other => other.into(),
    })
}

/// Get an account by id.
pub fn get_account(db: &Database, account_id: i64) -> Result<Account> {
    db.read(|conn| get_account_in(conn, account_id))
}

/// List active accounts, optionally restricted to one user.
pub fn list_accounts(db: &Database, user_id: Option<i64>) -> Result<Vec<Account>> {
    db.read(|conn| {
        let mut accounts = Vec::new();
        match user_id {
            Some(uid) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM accounts WHERE user_id = ?1 AND is_active = 1 ORDER BY id",
                )?;
                for account in stmt.query_map([uid], Account::from_row)? {
                    accounts.push(account?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM accounts WHERE is_active = 1 ORDER BY id")?;
                for account in stmt.query_map([], Account::from_row)? {
                    accounts.push(account?);
                }
            }
        }
        Ok(accounts)
    })
}

/// Soft-delete an account. Its rows stay in place; it simply stops showing
/// up in active listings and user summaries.
pub fn deactivate_account(db: &Database, account_id: i64) -> Result<()> {
    db.write(|conn| {
        let changed = conn.execute(
            "UPDATE accounts SET is_active = 0 WHERE id = ?1",
            [account_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        Ok(())
    })
}
