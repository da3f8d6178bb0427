use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::consolidate::{derive_rows, ConsolidationPolicy, TableCounts};
use crate::model::Origin;
use crate::onboarding::load_onboarding_conn;
use crate::repo::count_for_user;
use crate::time::today;
use crate::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiagnosis {
    pub expected: i64,
    pub present: i64,
}

impl TableDiagnosis {
    pub fn is_short(&self) -> bool {
        self.present < self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub user_id: String,
    pub has_onboarding_data: bool,
    pub onboarding_completed: bool,
    pub needs_migration: bool,
    pub income_sources: TableDiagnosis,
    pub expenses: TableDiagnosis,
    pub debts: TableDiagnosis,
    pub goals: TableDiagnosis,
    pub reasons: Vec<String>,
}

/// Decide whether consolidation still has work to do for `user_id`, by
/// comparing what the blob would produce with the onboarding rows present.
pub async fn diagnose(
    pool: &SqlitePool,
    user_id: &str,
    policy: &ConsolidationPolicy,
) -> AppResult<Diagnosis> {
    let mut conn = pool.acquire().await?;
    let state = load_onboarding_conn(&mut conn, user_id).await?;

    let expected = state
        .data
        .as_ref()
        .map(|data| derive_rows(data, policy, today()).counts())
        .unwrap_or_default();

    let onboarding = Some(Origin::Onboarding);
    let present = TableCounts {
        income_sources: count_for_user(&mut conn, "income_sources", user_id, onboarding).await?,
        expenses: count_for_user(&mut conn, "expenses", user_id, onboarding).await?,
        debts: count_for_user(&mut conn, "debts", user_id, onboarding).await?,
        goals: count_for_user(&mut conn, "goals", user_id, onboarding).await?,
    };

    let tables = [
        ("income_sources", expected.income_sources, present.income_sources),
        ("expenses", expected.expenses, present.expenses),
        ("debts", expected.debts, present.debts),
        ("goals", expected.goals, present.goals),
    ];

    let has_data = state.data.is_some();
    let mut reasons = Vec::new();
    if has_data {
        if !state.completed {
            reasons.push("onboarding not marked complete".to_string());
        }
        for (table, expected, present) in tables {
            if present < expected {
                reasons.push(format!("{table}: {present} of {expected} rows present"));
            }
        }
    }
    let needs_migration = has_data && !reasons.is_empty();

    info!(
        target: "finplan",
        event = "diagnose",
        user_id = %user_id,
        needs_migration,
        reasons = reasons.len()
    );

    let pair = |e: i64, p: i64| TableDiagnosis {
        expected: e,
        present: p,
    };
    Ok(Diagnosis {
        user_id: user_id.to_string(),
        has_onboarding_data: has_data,
        onboarding_completed: state.completed,
        needs_migration,
        income_sources: pair(expected.income_sources, present.income_sources),
        expenses: pair(expected.expenses, present.expenses),
        debts: pair(expected.debts, present.debts),
        goals: pair(expected.goals, present.goals),
        reasons,
    })
}
