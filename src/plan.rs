//! Financial plan generation.
//!
//! [`PlanRequest`] is the JSON document describing a user's finances;
//! a [`PlanGenerator`] turns it into a [`FinancialPlan`]. The bundled
//! [`RulePlanGenerator`] is deterministic and runs in-process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::model::{Debt, DebtStatus, Goal, GoalPriority, GoalStatus, IncomeSource};
use crate::money::round_cents;
use crate::payoff::{months_to_payoff, payment_covers_interest};
use crate::profile::{get_profile, not_found};
use crate::repo::list_for_user;
use crate::summary::{expenses_by_category, refresh_summary, FinancialSummary};
use crate::time::{now_ms, today};
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub user_id: String,
    pub display_name: String,
    pub summary: FinancialSummary,
    pub income: Vec<IncomeSource>,
    pub expenses_by_category: BTreeMap<String, f64>,
    pub debts: Vec<Debt>,
    pub goals: Vec<Goal>,
}

impl PlanRequest {
    /// Snapshot the user's current finances, recomputing the summary first.
    pub async fn build(pool: &SqlitePool, user_id: &str) -> AppResult<Self> {
        let profile = get_profile(pool, user_id)
            .await?
            .ok_or_else(|| not_found(user_id))?;
        let today = today();
        let summary = refresh_summary(pool, user_id, today).await?;
        let income: Vec<IncomeSource> = list_for_user(pool, "income_sources", user_id).await?;
        let debts: Vec<Debt> = list_for_user(pool, "debts", user_id).await?;
        let goals: Vec<Goal> = list_for_user(pool, "goals", user_id).await?;
        let mut conn = pool.acquire().await?;
        let expenses_by_category = expenses_by_category(&mut conn, user_id, today).await?;

        Ok(Self {
            user_id: user_id.to_string(),
            display_name: profile.display_name,
            summary,
            income: income.into_iter().filter(|i| i.is_active).collect(),
            expenses_by_category,
            debts: debts
                .into_iter()
                .filter(|d| d.status == DebtStatus::Active)
                .collect(),
            goals: goals
                .into_iter()
                .filter(|g| g.status == GoalStatus::Active)
                .collect(),
        })
    }

    /// The request body as sent to a plan service.
    pub fn to_payload(&self) -> AppResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSplit {
    pub needs: f64,
    pub wants: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtStep {
    pub creditor: String,
    pub balance: f64,
    pub interest_rate: f64,
    pub suggested_payment: f64,
    pub months_to_payoff: u32,
    /// False when the suggested payment does not cover the monthly interest.
    pub payoff_possible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTimeline {
    pub title: String,
    pub remaining: f64,
    pub monthly_contribution: f64,
    /// `None` when nothing can be put aside for this goal.
    pub months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialPlan {
    pub user_id: String,
    pub generated_at: i64,
    pub budget: BudgetSplit,
    pub debt_strategy: Vec<DebtStep>,
    pub goal_timelines: Vec<GoalTimeline>,
    pub recommendations: Vec<String>,
}

pub trait PlanGenerator {
    fn generate(&self, request: &PlanRequest) -> AppResult<FinancialPlan>;
}

/// 50/30/20 budget, avalanche debt ordering, and priority-weighted goal
/// contributions out of whatever income is left each month.
#[derive(Debug, Clone)]
pub struct RulePlanGenerator {
    /// Share of disposable income sent to the highest-rate debt.
    pub debt_share: f64,
    /// Debt payments above this share of income trigger a warning.
    pub max_debt_to_income: f64,
}

impl Default for RulePlanGenerator {
    fn default() -> Self {
        Self {
            debt_share: 0.5,
            max_debt_to_income: 0.36,
        }
    }
}

fn priority_weight(priority: GoalPriority) -> f64 {
    match priority {
        GoalPriority::High => 2.0,
        GoalPriority::Medium => 1.0,
        GoalPriority::Low => 0.5,
    }
}

impl RulePlanGenerator {
    fn debt_strategy(&self, debts: &[Debt], extra: f64) -> Vec<DebtStep> {
        let mut ordered: Vec<&Debt> = debts.iter().filter(|d| d.current_balance > 0.0).collect();
        ordered.sort_by(|a, b| {
            b.interest_rate
                .total_cmp(&a.interest_rate)
                .then_with(|| a.current_balance.total_cmp(&b.current_balance))
        });
        ordered
            .into_iter()
            .enumerate()
            .map(|(index, debt)| {
                let payment = if index == 0 {
                    debt.monthly_payment + extra
                } else {
                    debt.monthly_payment
                };
                DebtStep {
                    creditor: debt.creditor.clone(),
                    balance: debt.current_balance,
                    interest_rate: debt.interest_rate,
                    suggested_payment: round_cents(payment),
                    months_to_payoff: months_to_payoff(
                        debt.current_balance,
                        debt.interest_rate,
                        payment,
                    ),
                    payoff_possible: payment_covers_interest(
                        debt.current_balance,
                        debt.interest_rate,
                        payment,
                    ),
                }
            })
            .collect()
    }

    fn goal_timelines(&self, goals: &[Goal], pool: f64) -> Vec<GoalTimeline> {
        let total_weight: f64 = goals
            .iter()
            .filter(|g| g.target_amount > g.current_amount)
            .map(|g| priority_weight(g.priority))
            .sum();
        goals
            .iter()
            .map(|goal| {
                let remaining = (goal.target_amount - goal.current_amount).max(0.0);
                let contribution = if remaining > 0.0 && total_weight > 0.0 {
                    pool * priority_weight(goal.priority) / total_weight
                } else {
                    0.0
                };
                let months = if remaining <= 0.0 {
                    Some(0)
                } else if contribution > 0.0 {
                    Some((remaining / contribution).ceil() as u32)
                } else {
                    None
                };
                GoalTimeline {
                    title: goal.title.clone(),
                    remaining: round_cents(remaining),
                    monthly_contribution: round_cents(contribution),
                    months,
                }
            })
            .collect()
    }

    fn recommendations(&self, request: &PlanRequest, steps: &[DebtStep]) -> Vec<String> {
        let summary = &request.summary;
        let mut out = Vec::new();
        if summary.monthly_income <= 0.0 {
            out.push("Record your income so the plan can size your budget.".to_string());
        }
        if summary.disposable_income < 0.0 {
            out.push(format!(
                "Spending exceeds income by {:.2} a month; trim expenses before taking on new goals.",
                -summary.disposable_income
            ));
        }
        if let Some(ratio) = summary.debt_to_income {
            if ratio > self.max_debt_to_income {
                out.push(format!(
                    "Debt payments take {:.0}% of income; avoid new credit until this drops below {:.0}%.",
                    ratio * 100.0,
                    self.max_debt_to_income * 100.0
                ));
            }
        }
        for step in steps {
            if !step.payoff_possible {
                out.push(format!(
                    "The payment on {} does not cover its interest; raise it to pay the balance down.",
                    step.creditor
                ));
            }
        }
        if summary.monthly_income > 0.0 {
            if let Some((category, amount)) = request
                .expenses_by_category
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
            {
                if *amount > summary.monthly_income * 0.3 {
                    out.push(format!(
                        "{category} takes more than 30% of income; it is the first place to cut."
                    ));
                }
            }
        }
        let has_emergency_fund = request.goals.iter().any(|g| {
            let title = g.title.to_lowercase();
            title.contains("emergen")
        });
        if !has_emergency_fund {
            out.push("Start an emergency fund worth three months of expenses.".to_string());
        }
        out
    }
}

impl PlanGenerator for RulePlanGenerator {
    fn generate(&self, request: &PlanRequest) -> AppResult<FinancialPlan> {
        let income = request.summary.monthly_income.max(0.0);
        let budget = BudgetSplit {
            needs: round_cents(income * 0.5),
            wants: round_cents(income * 0.3),
            savings: round_cents(income * 0.2),
        };

        let disposable = request.summary.disposable_income.max(0.0);
        let extra_for_debt = if request.debts.is_empty() {
            0.0
        } else {
            disposable * self.debt_share
        };
        let debt_strategy = self.debt_strategy(&request.debts, extra_for_debt);
        let goal_timelines = self.goal_timelines(&request.goals, disposable - extra_for_debt);
        let recommendations = self.recommendations(request, &debt_strategy);

        info!(
            target: "finplan",
            event = "plan_generated",
            user_id = %request.user_id,
            debts = debt_strategy.len(),
            goals = goal_timelines.len(),
            recommendations = recommendations.len()
        );

        Ok(FinancialPlan {
            user_id: request.user_id.clone(),
            generated_at: now_ms(),
            budget,
            debt_strategy,
            goal_timelines,
            recommendations,
        })
    }
}
