//! Planned orders: trading intents with a PENDING -> EXECUTED/CANCELLED
//! lifecycle.
//!
//! Both terminal states are final. Every terminal write is a conditional
//! update guarded by `status = 'PENDING'`, so two concurrent executions (or
//! an execute racing a cancel) cannot both succeed.

use rusqlite::params;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{OrderPriority, OrderStatus, PlannedOrder, TradeAction, Transaction};
use crate::ticker::validate_ticker;
use crate::transactions;

/// Fields of a pending order that may still be patched.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub ticker: Option<String>,
    pub action: Option<TradeAction>,
    pub shares: Option<f64>,
    pub target_price: Option<f64>,
    pub reason: Option<String>,
    pub priority: Option<OrderPriority>,
}

/// Create a new planned order in PENDING state. The target price is
/// advisory; execution happens at the actual fill price.
pub fn create_order(
    db: &Database,
    account_id: i64,
    ticker: &str,
    action: TradeAction,
    shares: f64,
    target_price: Option<f64>,
    reason: Option<&str>,
    priority: OrderPriority,
) -> Result<PlannedOrder> {
    let ticker = validate_ticker(ticker)?;
    if shares <= 0.0 {
        return Err(Error::Validation("shares must be positive".into()));
    }
    if let Some(p) = target_price {
        if p <= 0.0 {
            return Err(Error::Validation("target price must be positive".into()));
        }
    }

    db.write(|conn| {
        conn.execute(
            r#"INSERT INTO planned_orders
               (account_id, ticker, action, shares, target_price, reason, priority)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![account_id, ticker, action, shares, target_price, reason, priority],
        )?;
        let order = conn.query_row(
            "SELECT * FROM planned_orders WHERE id = ?1",
            [conn.last_insert_rowid()],
            PlannedOrder::from_row,
        )?;
        Ok(order)
    })
}

/// Get a planned order by id.
pub fn get_order(db: &Database, order_id: i64) -> Result<PlannedOrder> {
    db.read(|conn| {
        conn.query_row(
            "SELECT * FROM planned_orders WHERE id = ?1",
            [order_id],
            PlannedOrder::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound(format!("planned order {}", order_id))
            }
            other => other.into(),
        })
    })
}

/// List planned orders, HIGH priority first, then by creation order.
pub fn list_orders(
    db: &Database,
    account_id: Option<i64>,
    status: Option<OrderStatus>,
) -> Result<Vec<PlannedOrder>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(id) = account_id {
        conditions.push("account_id = ?");
        args.push(Box::new(id));
    }
    if let Some(s) = status {
        conditions.push("status = ?");
        args.push(Box::new(s));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        r#"SELECT * FROM planned_orders {}
           ORDER BY
               CASE priority
                   WHEN 'HIGH' THEN 0
                   WHEN 'NORMAL' THEN 1
                   ELSE 2
               END,
               created_at,
               id"#,
        where_clause
    );

    db.read(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), PlannedOrder::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    })
}

/// Execute a planned order at the actual fill price, recording the real
/// trade and linking it back to the order.
///
/// The trade unit and the terminal-state write are separate atomic scopes;
/// the terminal write re-checks PENDING so a concurrent second execute is
/// rejected with `InvalidState` instead of double-applying.
pub fn execute_order(
    db: &Database,
    order_id: i64,
    actual_price: f64,
    fee: f64,
    tax: f64,
) -> Result<(PlannedOrder, Transaction)> {
    let order = get_order(db, order_id)?;
    if order.status != OrderStatus::Pending {
        return Err(Error::InvalidState(format!(
            "planned order {} is already {}",
            order_id,
            order.status.as_str()
        )));
    }

    let trade = transactions::record_transaction(
        db,
        order.account_id,
        &order.ticker,
        order.action,
        order.shares,
        actual_price,
        fee,
        tax,
        None,
        Some(&format!("Executed from planned order #{}", order_id)),
    )?;

    let executed = db.write(|conn| {
        let changed = conn.execute(
            r#"UPDATE planned_orders
               SET status = 'EXECUTED', executed_at = datetime('now'),
                   linked_transaction_id = ?1
               WHERE id = ?2 AND status = 'PENDING'"#,
            params![trade.id, order_id],
        )?;
        if changed == 0 {
            log::warn!(
                "planned order {} left PENDING while executing; trade {} recorded",
                order_id,
                trade.id
            );
            return Err(Error::InvalidState(format!(
                "planned order {} was executed or cancelled concurrently",
                order_id
            )));
        }
        let order = conn.query_row(
            "SELECT * FROM planned_orders WHERE id = ?1",
            [order_id],
            PlannedOrder::from_row,
        )?;
        Ok(order)
    })?;

    Ok((executed, trade))
}

/// Cancel a pending planned order.
pub fn cancel_order(db: &Database, order_id: i64) -> Result<PlannedOrder> {
    db.write(|conn| {
        let changed = conn.execute(
            "UPDATE planned_orders SET status = 'CANCELLED' WHERE id = ?1 AND status = 'PENDING'",
            [order_id],
        )?;
        if changed == 0 {
            // Either missing or already terminal; tell the caller which.
            let status: Option<OrderStatus> = conn
                .query_row(
                    "SELECT status FROM planned_orders WHERE id = ?1",
                    [order_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            return match status {
                Some(s) => Err(Error::InvalidState(format!(
                    "planned order {} is already {}",
                    order_id,
                    s.as_str()
                ))),
                None => Err(Error::NotFound(format!("planned order {}", order_id))),
            };
        }
        let order = conn.query_row(
            "SELECT * FROM planned_orders WHERE id = ?1",
            [order_id],
            PlannedOrder::from_row,
        )?;
        Ok(order)
    })
}

/// Patch fields of a pending order. Rejected once the order is terminal.
pub fn update_order(db: &Database, order_id: i64, update: OrderUpdate) -> Result<PlannedOrder> {
    let ticker = update.ticker.as_deref().map(validate_ticker).transpose()?;
    if let Some(shares) = update.shares {
        if shares <= 0.0 {
            return Err(Error::Validation("shares must be positive".into()));
        }
    }
    if let Some(price) = update.target_price {
        if price <= 0.0 {
            return Err(Error::Validation("target price must be positive".into()));
        }
    }

    let mut assignments: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(t) = ticker {
        assignments.push("ticker = ?");
        args.push(Box::new(t));
    }
    if let Some(a) = update.action {
        assignments.push("action = ?");
        args.push(Box::new(a));
    }
    if let Some(s) = update.shares {
        assignments.push("shares = ?");
        args.push(Box::new(s));
    }
    if let Some(p) = update.target_price {
        assignments.push("target_price = ?");
        args.push(Box::new(p));
    }
    if let Some(r) = update.reason {
        assignments.push("reason = ?");
        args.push(Box::new(r));
    }
    if let Some(p) = update.priority {
        assignments.push("priority = ?");
        args.push(Box::new(p));
    }
    if assignments.is_empty() {
        return Err(Error::Validation("no fields to update".into()));
    }
    args.push(Box::new(order_id));

    let sql = format!(
        "UPDATE planned_orders SET {} WHERE id = ? AND status = 'PENDING'",
        assignments.join(", ")
    );

    db.write(|conn| {
        let changed = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
        if changed == 0 {
            let status: Option<OrderStatus> = conn
                .query_row(
                    "SELECT status FROM planned_orders WHERE id = ?1",
                    [order_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            return match status {
                Some(s) => Err(Error::InvalidState(format!(
                    "cannot update planned order {} with status {}",
                    order_id,
                    s.as_str()
                ))),
                None => Err(Error::NotFound(format!("planned order {}", order_id))),
            };
        }
        let order = conn.query_row(
            "SELECT * FROM planned_orders WHERE id = ?1",
            [order_id],
            PlannedOrder::from_row,
        )?;
        Ok(order)
    })
}
