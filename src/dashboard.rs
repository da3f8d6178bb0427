use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::model::{Debt, Goal, IncomeSource, Profile};
use crate::payoff::{payoff_schedule, PayoffEstimate};
use crate::profile::{get_profile, not_found};
use crate::repo::list_for_user;
use crate::summary::{expenses_by_category, load_summary, refresh_summary, FinancialSummary};
use crate::time::today;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtView {
    #[serde(flatten)]
    pub debt: Debt,
    pub payoff: PayoffEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalView {
    #[serde(flatten)]
    pub goal: Goal,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub profile: Profile,
    pub summary: FinancialSummary,
    pub income: Vec<IncomeSource>,
    pub expenses_by_category: BTreeMap<String, f64>,
    pub debts: Vec<DebtView>,
    pub goals: Vec<GoalView>,
}

/// Everything the home screen shows for one user. Uses the stored summary
/// and only computes one when none exists yet.
pub async fn dashboard(pool: &SqlitePool, user_id: &str) -> AppResult<Dashboard> {
    let profile = get_profile(pool, user_id)
        .await?
        .ok_or_else(|| not_found(user_id))?;
    let today = today();
    let summary = match load_summary(pool, user_id).await? {
        Some(summary) => summary,
        None => refresh_summary(pool, user_id, today).await?,
    };

    let income: Vec<IncomeSource> = list_for_user(pool, "income_sources", user_id).await?;
    let debts: Vec<Debt> = list_for_user(pool, "debts", user_id).await?;
    let goals: Vec<Goal> = list_for_user(pool, "goals", user_id).await?;
    let by_category = {
        let mut conn = pool.acquire().await?;
        expenses_by_category(&mut conn, user_id, today).await?
    };

    let debts = debts
        .into_iter()
        .map(|debt| DebtView {
            payoff: payoff_schedule(debt.current_balance, debt.interest_rate, debt.monthly_payment),
            debt,
        })
        .collect();
    let goals = goals
        .into_iter()
        .map(|goal| GoalView {
            progress_pct: (goal.progress_pct() * 10.0).round() / 10.0,
            goal,
        })
        .collect();

    Ok(Dashboard {
        profile,
        summary,
        income,
        expenses_by_category: by_category,
        debts,
        goals,
    })
}
