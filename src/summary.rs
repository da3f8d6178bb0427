use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::model::Frequency;
use crate::money::round_cents;
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// Aggregate figures recomputed after every write that changes a user's
/// finances. All money values are per month except the balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub user_id: String,
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub total_debt: f64,
    pub monthly_debt_payments: f64,
    pub goals_target: f64,
    pub goals_saved: f64,
    pub disposable_income: f64,
    /// Monthly debt payments over monthly income; absent without income.
    pub debt_to_income: Option<f64>,
    pub computed_at: i64,
}

impl TryFrom<&SqliteRow> for FinancialSummary {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            monthly_income: row.try_get("monthly_income")?,
            monthly_expenses: row.try_get("monthly_expenses")?,
            total_debt: row.try_get("total_debt")?,
            monthly_debt_payments: row.try_get("monthly_debt_payments")?,
            goals_target: row.try_get("goals_target")?,
            goals_saved: row.try_get("goals_saved")?,
            disposable_income: row.try_get("disposable_income")?,
            debt_to_income: row.try_get("debt_to_income")?,
            computed_at: row.try_get("computed_at")?,
        })
    }
}

async fn monthly_income(
    conn: &mut SqliteConnection,
    user_id: &str,
    month: &str,
) -> AppResult<f64> {
    let rows = sqlx::query(
        "SELECT amount, frequency, received_on FROM income_sources WHERE user_id = ? AND is_active = 1",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut total = 0.0;
    for row in rows {
        let amount: f64 = row.try_get("amount")?;
        let frequency: Frequency = row.try_get::<String, _>("frequency")?.parse()?;
        let received_on: Option<String> = row.try_get("received_on")?;
        total += match frequency {
            // one-off income only counts toward the month it arrived in
            Frequency::OneTime => match received_on {
                Some(date) if date.starts_with(month) => amount,
                _ => 0.0,
            },
            other => amount * other.monthly_factor(),
        };
    }
    Ok(total)
}

/// Recompute and persist the user's summary. Runs on whatever connection or
/// transaction the caller holds so it commits atomically with their writes.
pub async fn calculate_financial_summary(
    conn: &mut SqliteConnection,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<FinancialSummary> {
    let month = today.format("%Y-%m").to_string();

    let income = monthly_income(conn, user_id, &month).await?;

    let (expenses,): (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0.0) FROM expenses
         WHERE user_id = ? AND (is_recurring = 1 OR substr(date, 1, 7) = ?)",
    )
    .bind(user_id)
    .bind(&month)
    .fetch_one(&mut *conn)
    .await?;

    let (total_debt, debt_payments): (f64, f64) = sqlx::query_as(
        "SELECT COALESCE(SUM(current_balance), 0.0), COALESCE(SUM(monthly_payment), 0.0)
         FROM debts WHERE user_id = ? AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let (goals_target, goals_saved): (f64, f64) = sqlx::query_as(
        "SELECT COALESCE(SUM(target_amount), 0.0), COALESCE(SUM(current_amount), 0.0)
         FROM goals WHERE user_id = ? AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let summary = FinancialSummary {
        user_id: user_id.to_string(),
        monthly_income: round_cents(income),
        monthly_expenses: round_cents(expenses),
        total_debt: round_cents(total_debt),
        monthly_debt_payments: round_cents(debt_payments),
        goals_target: round_cents(goals_target),
        goals_saved: round_cents(goals_saved),
        disposable_income: round_cents(income - expenses - debt_payments),
        debt_to_income: (income > 0.0).then(|| (debt_payments / income * 10_000.0).round() / 10_000.0),
        computed_at: now_ms(),
    };

    sqlx::query(
        "INSERT INTO financial_summaries (
            user_id, monthly_income, monthly_expenses, total_debt, monthly_debt_payments,
            goals_target, goals_saved, disposable_income, debt_to_income, computed_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            monthly_income = excluded.monthly_income,
            monthly_expenses = excluded.monthly_expenses,
            total_debt = excluded.total_debt,
            monthly_debt_payments = excluded.monthly_debt_payments,
            goals_target = excluded.goals_target,
            goals_saved = excluded.goals_saved,
            disposable_income = excluded.disposable_income,
            debt_to_income = excluded.debt_to_income,
            computed_at = excluded.computed_at",
    )
    .bind(&summary.user_id)
    .bind(summary.monthly_income)
    .bind(summary.monthly_expenses)
    .bind(summary.total_debt)
    .bind(summary.monthly_debt_payments)
    .bind(summary.goals_target)
    .bind(summary.goals_saved)
    .bind(summary.disposable_income)
    .bind(summary.debt_to_income)
    .bind(summary.computed_at)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "store_summary"))?;

    debug!(
        target: "finplan",
        event = "summary_recomputed",
        user_id = %user_id,
        monthly_income = summary.monthly_income,
        disposable_income = summary.disposable_income
    );
    Ok(summary)
}

pub async fn load_summary(pool: &SqlitePool, user_id: &str) -> AppResult<Option<FinancialSummary>> {
    let row = sqlx::query("SELECT * FROM financial_summaries WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(FinancialSummary::try_from).transpose()
}

/// This month's spending grouped by category, recurring rows included.
pub async fn expenses_by_category(
    conn: &mut SqliteConnection,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<BTreeMap<String, f64>> {
    let month = today.format("%Y-%m").to_string();
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT category, SUM(amount) FROM expenses
         WHERE user_id = ? AND (is_recurring = 1 OR substr(date, 1, 7) = ?)
         GROUP BY category ORDER BY category",
    )
    .bind(user_id)
    .bind(&month)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(category, amount)| (category, round_cents(amount)))
        .collect())
}

/// Recompute on a fresh pooled connection.
pub async fn refresh_summary(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<FinancialSummary> {
    let mut conn = pool.acquire().await?;
    calculate_financial_summary(&mut conn, user_id, today).await
}
