#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use finplan_lib::consolidate::{consolidate, ConsolidationOptions};
use finplan_lib::dashboard::dashboard;
use finplan_lib::payoff::NEVER_PAID_OFF_MONTHS;
use finplan_lib::plan::{PlanGenerator, PlanRequest, RulePlanGenerator};
use finplan_lib::summary::load_summary;
use serde_json::json;
use util::{migrated_pool, onboarded_user};

async fn seeded() -> (sqlx::SqlitePool, String) {
    let pool = migrated_pool().await;
    let user = onboarded_user(
        &pool,
        &json!({
            "monthlyIncome": 3000,
            "expenseCategories": { "food": 400, "rent": 1000 },
            "debts": [
                { "name": "Visa", "amount": 2000, "monthlyPayment": 100, "interestRate": 28 },
                { "name": "Store card", "amount": 1000, "monthlyPayment": 10, "interestRate": 24 }
            ],
            "financialGoals": ["Emergency fund", "Trip"],
            "savings": 1000
        }),
    )
    .await;
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();
    (pool, user)
}

#[tokio::test]
async fn plan_request_snapshots_active_rows() {
    let (pool, user) = seeded().await;
    let request = PlanRequest::build(&pool, &user).await.unwrap();
    assert_eq!(request.display_name, "Ana");
    assert_eq!(request.debts.len(), 2);
    assert_eq!(request.expenses_by_category.get("rent"), Some(&1000.0));

    let payload = request.to_payload().unwrap();
    assert_eq!(payload["summary"]["monthly_income"], json!(3000.0));
    assert_eq!(payload["goals"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn rule_plan_orders_debts_by_rate_and_flags_stuck_ones() {
    let (pool, user) = seeded().await;
    let request = PlanRequest::build(&pool, &user).await.unwrap();
    let plan = RulePlanGenerator::default().generate(&request).unwrap();

    assert_eq!(plan.debt_strategy[0].creditor, "Visa");
    assert!(plan.debt_strategy[0].months_to_payoff < NEVER_PAID_OFF_MONTHS);
    // 10 a month never covers 24 % on 1000
    assert_eq!(plan.debt_strategy[1].months_to_payoff, NEVER_PAID_OFF_MONTHS);
    assert!(!plan.debt_strategy[1].payoff_possible);
    assert!(plan
        .recommendations
        .iter()
        .any(|r| r.contains("Store card")));
    assert!(!plan
        .recommendations
        .iter()
        .any(|r| r.contains("Start an emergency fund")));
}

#[tokio::test]
async fn dashboard_combines_rows_and_payoff_estimates() {
    let (pool, user) = seeded().await;
    let view = dashboard(&pool, &user).await.unwrap();

    assert_eq!(view.profile.id, user);
    assert_eq!(view.income.len(), 1);
    assert_eq!(view.expenses_by_category.len(), 2);
    let visa = view.debts.iter().find(|d| d.debt.creditor == "Visa").unwrap();
    assert!(visa.payoff.payoff_possible);
    let store = view
        .debts
        .iter()
        .find(|d| d.debt.creditor == "Store card")
        .unwrap();
    assert!(!store.payoff.payoff_possible);
    let fund = view
        .goals
        .iter()
        .find(|g| g.goal.title == "Emergency fund")
        .unwrap();
    assert_eq!(fund.progress_pct, 10.0);
}

#[tokio::test]
async fn dashboard_computes_a_missing_summary() {
    let (pool, user) = seeded().await;
    sqlx::query("DELETE FROM financial_summaries")
        .execute(&pool)
        .await
        .unwrap();
    let view = dashboard(&pool, &user).await.unwrap();
    assert_eq!(view.summary.monthly_income, 3000.0);
    assert!(load_summary(&pool, &user).await.unwrap().is_some());
}
