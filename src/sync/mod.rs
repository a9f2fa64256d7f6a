//! Reconciliation: merge broker/import snapshots into the ledgers.
//!
//! Holdings reconciliation is a full replace, not an incremental merge: the
//! snapshot is authoritative for every ticker, including the ones it is
//! silent about (those get removed). Cash reconciliation is a plain
//! last-snapshot-wins overwrite.
//!
//! Snapshots arrive already normalized; broker SDK field-name quirks are an
//! importer concern and never reach this module.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::cash;
use crate::db::Database;
use crate::error::Result;
use crate::holdings;
use crate::models::{CashPosition, Currency};
use crate::ticker::normalize_ticker;

/// Tolerance when comparing snapshot avg cost against the stored one, to
/// absorb floating-point noise from upstream exports.
const AVG_COST_EPSILON: f64 = 0.01;

/// One normalized holding row from a broker API or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingSnapshot {
    pub ticker: String,
    pub shares: f64,
    pub avg_cost: f64,
}

/// Normalized cash balance from a broker API or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSnapshot {
    pub currency: Currency,
    pub balance: f64,
}

/// Outcome of a holdings reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Replace the account's holdings with the snapshot, reporting the diff.
///
/// Entries with non-positive shares are skipped (but still count as "seen",
/// so a zero-share snapshot row does not delete the local position).
/// Applying the same snapshot twice yields all-zero stats on the second run.
pub fn sync_holdings(
    db: &Database,
    account_id: i64,
    snapshot: &[HoldingSnapshot],
) -> Result<SyncStats> {
    accounts::get_account(db, account_id)?;

    let stats = db.write(|conn| {
        let existing = holdings::list_in(conn, account_id)?;
        let existing_by_ticker: HashMap<String, _> = existing
            .into_iter()
            .map(|h| (h.ticker.clone(), h))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut stats = SyncStats::default();

        for item in snapshot {
            let ticker = normalize_ticker(&item.ticker);
            seen.insert(ticker.clone());

            if item.shares <= 0.0 {
                continue;
            }

            match existing_by_ticker.get(&ticker) {
                Some(old) => {
                    if old.shares != item.shares
                        || (old.avg_cost - item.avg_cost).abs() > AVG_COST_EPSILON
                    {
                        holdings::overwrite_in(
                            conn,
                            account_id,
                            &ticker,
                            item.shares,
                            item.avg_cost,
                        )?;
                        stats.updated += 1;
                    }
                }
                None => {
                    holdings::insert_in(conn, account_id, &ticker, item.shares, item.avg_cost)?;
                    stats.added += 1;
                }
            }
        }

        for ticker in existing_by_ticker.keys() {
            if !seen.contains(ticker) {
                holdings::delete_in(conn, account_id, ticker)?;
                stats.removed += 1;
            }
        }

        Ok(stats)
    })?;

    log::info!(
        "holdings sync for account {}: {} added, {} updated, {} removed",
        account_id,
        stats.added,
        stats.updated,
        stats.removed
    );
    Ok(stats)
}

/// Overwrite the account's cash balance from a snapshot. Last snapshot wins;
/// there is no diffing.
pub fn sync_cash(db: &Database, account_id: i64, snapshot: &CashSnapshot) -> Result<CashPosition> {
    accounts::get_account(db, account_id)?;
    cash::set_cash(db, account_id, snapshot.currency, snapshot.balance)
}
