//! Database handle and schema initialization.
//!
//! The whole engine runs against a single embedded SQLite store. The
//! [`Database`] handle owns the connection behind a mutex: one writer at a
//! time, serialized transactions, readers always see the last committed
//! state. Multi-entity mutations go through [`Database::write`], which wraps
//! the closure in one SQLite transaction (commit on `Ok`, rollback on `Err`).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    username     TEXT    NOT NULL UNIQUE,
    display_name TEXT    NOT NULL,
    created_at   TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS accounts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL REFERENCES users(id),
    account_name TEXT    NOT NULL,
    broker       TEXT    NOT NULL,
    market       TEXT    NOT NULL,  -- TW, US, SG
    currency     TEXT    NOT NULL,  -- TWD, USD, SGD
    account_type TEXT    NOT NULL DEFAULT 'brokerage',
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT    NOT NULL DEFAULT (datetime('now')),
    UNIQUE(user_id, account_name)
);

CREATE TABLE IF NOT EXISTS holdings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    ticker      TEXT    NOT NULL,
    shares      REAL    NOT NULL DEFAULT 0,
    avg_cost    REAL    NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT    NOT NULL DEFAULT (datetime('now')),
    UNIQUE(account_id, ticker)
);

CREATE TABLE IF NOT EXISTS transactions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    ticker      TEXT    NOT NULL,
    action      TEXT    NOT NULL,  -- BUY or SELL
    shares      REAL    NOT NULL,
    price       REAL    NOT NULL,
    fee         REAL    NOT NULL DEFAULT 0,
    tax         REAL    NOT NULL DEFAULT 0,
    currency    TEXT    NOT NULL,
    notes       TEXT,
    executed_at TEXT    NOT NULL,
    created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cash_positions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    currency    TEXT    NOT NULL,
    balance     REAL    NOT NULL DEFAULT 0,
    updated_at  TEXT    NOT NULL DEFAULT (datetime('now')),
    UNIQUE(account_id, currency)
);

CREATE TABLE IF NOT EXISTS cash_transactions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    currency    TEXT    NOT NULL,
    amount      REAL    NOT NULL,
    category    TEXT    NOT NULL,
    description TEXT,
    executed_at TEXT    NOT NULL,
    created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS planned_orders (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id            INTEGER NOT NULL REFERENCES accounts(id),
    ticker                TEXT    NOT NULL,
    action                TEXT    NOT NULL,  -- BUY or SELL
    shares                REAL    NOT NULL,
    target_price          REAL,
    reason                TEXT,
    priority              TEXT    NOT NULL DEFAULT 'NORMAL',
    status                TEXT    NOT NULL DEFAULT 'PENDING',
    created_at            TEXT    NOT NULL DEFAULT (datetime('now')),
    executed_at           TEXT,
    linked_transaction_id INTEGER REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS price_cache (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker     TEXT    NOT NULL UNIQUE,
    price      REAL    NOT NULL,
    currency   TEXT    NOT NULL,
    source     TEXT    NOT NULL DEFAULT 'yahoo',
    fetched_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS exchange_rates (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    from_currency TEXT    NOT NULL,
    to_currency   TEXT    NOT NULL,
    rate          REAL    NOT NULL,
    source        TEXT    NOT NULL DEFAULT 'yahoo',
    fetched_at    TEXT    NOT NULL,
    UNIQUE(from_currency, to_currency)
);

CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
CREATE INDEX IF NOT EXISTS idx_holdings_account ON holdings(account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_executed ON transactions(executed_at);
CREATE INDEX IF NOT EXISTS idx_cash_transactions_account ON cash_transactions(account_id);
CREATE INDEX IF NOT EXISTS idx_planned_orders_account_status ON planned_orders(account_id, status);
"#;

/// Handle to the embedded store. Open once at process start, share by
/// reference, drop at shutdown.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (and if necessary create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                crate::error::Error::Validation(format!(
                    "cannot create database directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database. Used by tests to substitute the
    /// on-disk store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        log::info!("database schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default on-disk location under the platform's local app-data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("PortfolioLedger")
            .join("portfolio.db")
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the transaction it held has already rolled back.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside a single SQLite transaction: every statement commits
    /// together on `Ok`, or rolls back together on `Err`. This is the shared
    /// atomic scope threaded through holding/cash/log mutations.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
