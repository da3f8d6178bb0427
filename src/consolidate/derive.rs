use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{Frequency, GoalPriority};
use crate::money::round_cents;
use crate::onboarding::OnboardingData;
use crate::time::{format_date, month_start};

pub const PRIMARY_INCOME: &str = "Primary income";
pub const EXTRA_INCOME: &str = "Extra income";
pub const DEFAULT_GOAL_TARGET: f64 = 10_000.0;

/// Knobs for turning an onboarding blob into rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationPolicy {
    /// Target assigned to goals, which the wizard only collects as titles.
    pub default_goal_target: f64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            default_goal_target: DEFAULT_GOAL_TARGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedIncome {
    pub source_name: String,
    pub amount: f64,
    pub frequency: Frequency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedExpense {
    pub category: String,
    pub amount: f64,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedDebt {
    pub creditor: String,
    pub amount: f64,
    pub monthly_payment: f64,
    pub interest_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedGoal {
    pub title: String,
    pub target_amount: f64,
    pub current_amount: f64,
    pub priority: GoalPriority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedRows {
    pub income: Vec<DerivedIncome>,
    pub expenses: Vec<DerivedExpense>,
    pub debts: Vec<DerivedDebt>,
    pub goals: Vec<DerivedGoal>,
}

/// Expected row count per consolidated table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub income_sources: i64,
    pub expenses: i64,
    pub debts: i64,
    pub goals: i64,
}

impl DerivedRows {
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            income_sources: self.income.len() as i64,
            expenses: self.expenses.len() as i64,
            debts: self.debts.len() as i64,
            goals: self.goals.len() as i64,
        }
    }
}

/// Map an onboarding blob onto the rows consolidation will own. Pure: the
/// same blob, policy and date always give the same rows in the same order.
pub fn derive_rows(
    data: &OnboardingData,
    policy: &ConsolidationPolicy,
    today: NaiveDate,
) -> DerivedRows {
    let mut income = Vec::new();
    if let Some(amount) = data.monthly_income {
        income.push(DerivedIncome {
            source_name: PRIMARY_INCOME.to_string(),
            amount: round_cents(amount),
            frequency: Frequency::Monthly,
        });
    }
    if let Some(amount) = data.extra_income {
        income.push(DerivedIncome {
            source_name: EXTRA_INCOME.to_string(),
            amount: round_cents(amount),
            frequency: Frequency::Monthly,
        });
    }

    let date = format_date(month_start(today));
    let expenses = data
        .expense_categories
        .iter()
        .map(|(category, amount)| DerivedExpense {
            category: category.clone(),
            amount: round_cents(*amount),
            date: date.clone(),
        })
        .collect();

    let mut debts: Vec<DerivedDebt> = Vec::new();
    for (index, debt) in data.debts.iter().enumerate() {
        let Some(amount) = debt.amount else {
            continue;
        };
        let creditor = debt
            .name
            .clone()
            .unwrap_or_else(|| format!("Debt {}", index + 1));
        let payment = debt.monthly_payment.unwrap_or(0.0);
        let rate = debt.interest_rate.unwrap_or(0.0);
        // repeated creditors merge into one row
        if let Some(existing) = debts.iter_mut().find(|d| d.creditor == creditor) {
            existing.amount = round_cents(existing.amount + amount);
            existing.monthly_payment = round_cents(existing.monthly_payment + payment);
            existing.interest_rate = existing.interest_rate.max(rate);
        } else {
            debts.push(DerivedDebt {
                creditor,
                amount: round_cents(amount),
                monthly_payment: round_cents(payment),
                interest_rate: rate,
            });
        }
    }

    let mut goals: Vec<DerivedGoal> = Vec::new();
    for title in &data.financial_goals {
        if goals.iter().any(|g| g.title.eq_ignore_ascii_case(title)) {
            continue;
        }
        let first = goals.is_empty();
        goals.push(DerivedGoal {
            title: title.clone(),
            target_amount: policy.default_goal_target,
            current_amount: if first {
                data.savings.map(round_cents).unwrap_or(0.0)
            } else {
                0.0
            },
            priority: if first {
                GoalPriority::High
            } else {
                GoalPriority::Medium
            },
        });
    }

    DerivedRows {
        income,
        expenses,
        debts,
        goals,
    }
}
