//! Copies a profile's onboarding blob into the normalized finance tables.
//!
//! One call runs one transaction: every derived row is upserted on its
//! natural key, onboarding rows the blob no longer produces are pruned, the
//! summary is recomputed and the profile is flagged complete. Rows created
//! from chat or by hand are never touched. A failure anywhere rolls the
//! whole run back, so re-running converges on the same state.

mod derive;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::info;

pub use derive::{
    derive_rows, ConsolidationPolicy, DerivedDebt, DerivedExpense, DerivedGoal, DerivedIncome,
    DerivedRows, TableCounts, DEFAULT_GOAL_TARGET, EXTRA_INCOME, PRIMARY_INCOME,
};

use crate::db::finish_tx;
use crate::id::new_uuid_v7;
use crate::onboarding::load_onboarding_conn;
use crate::profile::mark_onboarding_complete;
use crate::summary::{calculate_financial_summary, FinancialSummary};
use crate::time::{now_ms, today};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOptions {
    pub policy: ConsolidationPolicy,
    /// Drop the onboarding blob once its rows are written.
    pub clear_onboarding_data: bool,
    /// Reference date for expense rows; defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Consolidated,
    NoMigrationNeeded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub upserted: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub user_id: String,
    pub outcome: ConsolidationOutcome,
    pub tables: BTreeMap<String, TableReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<FinancialSummary>,
}

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("failed to write {table} rows for user {user_id}: {source}")]
    TableWrite {
        table: &'static str,
        user_id: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to recompute financial summary for user {user_id}: {source}")]
    Summary {
        user_id: String,
        #[source]
        source: AppError,
    },
}

impl From<ConsolidationError> for AppError {
    fn from(error: ConsolidationError) -> Self {
        let message = error.to_string();
        match error {
            ConsolidationError::TableWrite {
                table,
                user_id,
                source,
            } => AppError::new("CONSOLIDATE/TABLE_WRITE", message)
                .with_context("table", table)
                .with_context("user_id", user_id)
                .with_cause(source),
            ConsolidationError::Summary { user_id, source } => {
                AppError::new("CONSOLIDATE/SUMMARY", message)
                    .with_context("user_id", user_id)
                    .with_cause(source)
            }
        }
    }
}

static USER_LOCKS: Lazy<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn user_lock(user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = USER_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks
        .entry(user_id.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Holds a user's write lock. Dropping the last holder removes the map entry.
pub(crate) struct UserLockGuard {
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = USER_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
        // clones are only handed out under the map lock, so a count of one
        // means nobody holds or waits on this entry
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Serialize writes for `user_id` within this process.
pub(crate) async fn lock_user(user_id: &str) -> UserLockGuard {
    let guard = user_lock(user_id).lock_owned().await;
    UserLockGuard {
        user_id: user_id.to_string(),
        guard: Some(guard),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Delete onboarding rows of `table` whose `key_column` is not in `keep`.
async fn prune(
    conn: &mut SqliteConnection,
    table: &'static str,
    key_column: &str,
    user_id: &str,
    keep: &[&str],
) -> Result<u64, ConsolidationError> {
    let sql = if keep.is_empty() {
        format!("DELETE FROM {table} WHERE user_id = ? AND origin = 'onboarding'")
    } else {
        format!(
            "DELETE FROM {table} WHERE user_id = ? AND origin = 'onboarding' AND {key_column} NOT IN ({})",
            placeholders(keep.len())
        )
    };
    let mut query = sqlx::query(&sql).bind(user_id);
    for key in keep {
        query = query.bind(*key);
    }
    let res = query
        .execute(&mut *conn)
        .await
        .map_err(|source| ConsolidationError::TableWrite {
            table,
            user_id: user_id.to_string(),
            source,
        })?;
    Ok(res.rows_affected())
}

fn write_err(table: &'static str, user_id: &str) -> impl Fn(sqlx::Error) -> ConsolidationError {
    let user_id = user_id.to_string();
    move |source| ConsolidationError::TableWrite {
        table,
        user_id: user_id.clone(),
        source,
    }
}

async fn upsert_income(
    conn: &mut SqliteConnection,
    user_id: &str,
    rows: &[DerivedIncome],
    now: i64,
) -> Result<TableReport, ConsolidationError> {
    for row in rows {
        sqlx::query(
            "INSERT INTO income_sources (
                id, user_id, source_name, amount, frequency, is_active, origin, received_on, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, 1, 'onboarding', NULL, ?, ?)
             ON CONFLICT(user_id, source_name) WHERE origin = 'onboarding' DO UPDATE SET
                amount = excluded.amount,
                frequency = excluded.frequency,
                is_active = 1,
                updated_at = excluded.updated_at",
        )
        .bind(new_uuid_v7())
        .bind(user_id)
        .bind(&row.source_name)
        .bind(row.amount)
        .bind(row.frequency.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(write_err("income_sources", user_id))?;
    }
    let keep: Vec<&str> = rows.iter().map(|r| r.source_name.as_str()).collect();
    let removed = prune(conn, "income_sources", "source_name", user_id, &keep).await?;
    Ok(TableReport {
        upserted: rows.len() as u64,
        removed,
    })
}

async fn upsert_expenses(
    conn: &mut SqliteConnection,
    user_id: &str,
    rows: &[DerivedExpense],
    now: i64,
) -> Result<TableReport, ConsolidationError> {
    for row in rows {
        sqlx::query(
            "INSERT INTO expenses (
                id, user_id, category, subcategory, description, amount, date, is_recurring, origin, created_at, updated_at
             ) VALUES (?, ?, ?, NULL, NULL, ?, ?, 1, 'onboarding', ?, ?)
             ON CONFLICT(user_id, category) WHERE origin = 'onboarding' DO UPDATE SET
                amount = excluded.amount,
                date = excluded.date,
                is_recurring = 1,
                updated_at = excluded.updated_at",
        )
        .bind(new_uuid_v7())
        .bind(user_id)
        .bind(&row.category)
        .bind(row.amount)
        .bind(&row.date)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(write_err("expenses", user_id))?;
    }
    let keep: Vec<&str> = rows.iter().map(|r| r.category.as_str()).collect();
    let removed = prune(conn, "expenses", "category", user_id, &keep).await?;
    Ok(TableReport {
        upserted: rows.len() as u64,
        removed,
    })
}

async fn upsert_debts(
    conn: &mut SqliteConnection,
    user_id: &str,
    rows: &[DerivedDebt],
    now: i64,
) -> Result<TableReport, ConsolidationError> {
    for row in rows {
        // once payments exist the live balance belongs to the payment history
        sqlx::query(
            "INSERT INTO debts (
                id, user_id, creditor, original_amount, current_balance, monthly_payment,
                interest_rate, status, origin, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, 'active', 'onboarding', ?, ?)
             ON CONFLICT(user_id, creditor) WHERE origin = 'onboarding' DO UPDATE SET
                original_amount = excluded.original_amount,
                monthly_payment = excluded.monthly_payment,
                interest_rate = excluded.interest_rate,
                current_balance = CASE
                    WHEN EXISTS (SELECT 1 FROM debt_payments p WHERE p.debt_id = debts.id)
                    THEN debts.current_balance ELSE excluded.current_balance END,
                status = CASE
                    WHEN EXISTS (SELECT 1 FROM debt_payments p WHERE p.debt_id = debts.id)
                    THEN debts.status ELSE 'active' END,
                updated_at = excluded.updated_at",
        )
        .bind(new_uuid_v7())
        .bind(user_id)
        .bind(&row.creditor)
        .bind(row.amount)
        .bind(row.amount)
        .bind(row.monthly_payment)
        .bind(row.interest_rate)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(write_err("debts", user_id))?;
    }
    let keep: Vec<&str> = rows.iter().map(|r| r.creditor.as_str()).collect();
    let removed = prune(conn, "debts", "creditor", user_id, &keep).await?;
    Ok(TableReport {
        upserted: rows.len() as u64,
        removed,
    })
}

async fn upsert_goals(
    conn: &mut SqliteConnection,
    user_id: &str,
    rows: &[DerivedGoal],
    now: i64,
) -> Result<TableReport, ConsolidationError> {
    for row in rows {
        sqlx::query(
            "INSERT INTO goals (
                id, user_id, title, target_amount, current_amount, priority, status, origin, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, 'active', 'onboarding', ?, ?)
             ON CONFLICT(user_id, title) WHERE origin = 'onboarding' DO UPDATE SET
                target_amount = excluded.target_amount,
                current_amount = MAX(goals.current_amount, excluded.current_amount),
                priority = excluded.priority,
                updated_at = excluded.updated_at",
        )
        .bind(new_uuid_v7())
        .bind(user_id)
        .bind(&row.title)
        .bind(row.target_amount)
        .bind(row.current_amount)
        .bind(row.priority.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(write_err("goals", user_id))?;
    }
    let keep: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
    let removed = prune(conn, "goals", "title", user_id, &keep).await?;
    Ok(TableReport {
        upserted: rows.len() as u64,
        removed,
    })
}

/// Write every derived table, recompute the summary and flag the profile.
/// Must run inside the caller's transaction.
async fn apply_rows(
    conn: &mut SqliteConnection,
    user_id: &str,
    rows: &DerivedRows,
    options: &ConsolidationOptions,
    today: NaiveDate,
) -> AppResult<(BTreeMap<String, TableReport>, FinancialSummary)> {
    let now = now_ms();
    let mut tables = BTreeMap::new();

    tables.insert(
        "income_sources".to_string(),
        upsert_income(conn, user_id, &rows.income, now).await?,
    );
    tables.insert(
        "expenses".to_string(),
        upsert_expenses(conn, user_id, &rows.expenses, now).await?,
    );
    tables.insert(
        "debts".to_string(),
        upsert_debts(conn, user_id, &rows.debts, now).await?,
    );
    tables.insert(
        "goals".to_string(),
        upsert_goals(conn, user_id, &rows.goals, now).await?,
    );

    for (table, report) in &tables {
        info!(
            target: "finplan",
            event = "consolidate_table",
            user_id = %user_id,
            table = %table,
            upserted = report.upserted,
            removed = report.removed
        );
    }

    let summary = calculate_financial_summary(conn, user_id, today)
        .await
        .map_err(|source| ConsolidationError::Summary {
            user_id: user_id.to_string(),
            source,
        })?;

    mark_onboarding_complete(conn, user_id, options.clear_onboarding_data).await?;

    Ok((tables, summary))
}

/// Consolidate the user's onboarding blob into the finance tables.
///
/// Returns [`ConsolidationOutcome::NoMigrationNeeded`] without writing when
/// the profile carries no blob. Calls for the same user are serialized.
pub async fn consolidate(
    pool: &SqlitePool,
    user_id: &str,
    options: &ConsolidationOptions,
) -> AppResult<ConsolidationReport> {
    let _guard = lock_user(user_id).await;

    let today = options.as_of.unwrap_or_else(today);
    let mut tx = pool.begin().await?;

    let state = match load_onboarding_conn(&mut *tx, user_id).await {
        Ok(state) => state,
        Err(err) => return finish_tx(tx, Err(err)).await,
    };

    let Some(data) = state.data else {
        info!(target: "finplan", event = "consolidate_skipped", user_id = %user_id, reason = "no_onboarding_data");
        tx.rollback().await?;
        return Ok(ConsolidationReport {
            user_id: user_id.to_string(),
            outcome: ConsolidationOutcome::NoMigrationNeeded,
            tables: BTreeMap::new(),
            summary: None,
        });
    };

    let rows = derive_rows(&data, &options.policy, today);
    let result = apply_rows(&mut *tx, user_id, &rows, options, today).await;
    let (tables, summary) = finish_tx(tx, result).await.map_err(|err| {
        err.log_with_event("consolidate_failed");
        err
    })?;

    info!(
        target: "finplan",
        event = "consolidate_done",
        user_id = %user_id,
        income_sources = rows.income.len(),
        expenses = rows.expenses.len(),
        debts = rows.debts.len(),
        goals = rows.goals.len()
    );

    Ok(ConsolidationReport {
        user_id: user_id.to_string(),
        outcome: ConsolidationOutcome::Consolidated,
        tables,
        summary: Some(summary),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_match_bind_count() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(1), "?");
    }

    fn lock_registered(user_id: &str) -> bool {
        USER_LOCKS.lock().unwrap().contains_key(user_id)
    }

    #[test]
    fn same_user_shares_one_lock() {
        let a = user_lock("u-1");
        let b = user_lock("u-1");
        let c = user_lock("u-2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn lock_entry_is_dropped_with_the_last_guard() {
        let guard = lock_user("u-release").await;
        assert!(lock_registered("u-release"));
        drop(guard);
        assert!(!lock_registered("u-release"));

        for _ in 0..3 {
            drop(lock_user("u-repeat").await);
        }
        assert!(!lock_registered("u-repeat"));
    }

    #[tokio::test]
    async fn waiting_holder_keeps_the_entry_alive() {
        let first = lock_user("u-shared").await;
        let waiter = tokio::spawn(async { lock_user("u-shared").await });
        while USER_LOCKS
            .lock()
            .unwrap()
            .get("u-shared")
            .map_or(0, Arc::strong_count)
            < 3
        {
            tokio::task::yield_now().await;
        }
        drop(first);
        assert!(lock_registered("u-shared"));
        let second = waiter.await.unwrap();
        assert!(lock_registered("u-shared"));
        drop(second);
        assert!(!lock_registered("u-shared"));
    }

    #[test]
    fn table_errors_map_to_stable_codes() {
        let err: AppError = ConsolidationError::TableWrite {
            table: "debts",
            user_id: "u".into(),
            source: sqlx::Error::RowNotFound,
        }
        .into();
        assert_eq!(err.code(), "CONSOLIDATE/TABLE_WRITE");
        assert_eq!(err.context().get("table").map(String::as_str), Some("debts"));
        assert_eq!(err.cause().map(|c| c.code()), Some("SQLX/ROW_NOT_FOUND"));
    }
}
