#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use finplan_lib::chat::{ChatBot, Intent, Lang};
use finplan_lib::consolidate::{consolidate, ConsolidationOptions};
use finplan_lib::model::{Debt, DebtStatus};
use finplan_lib::plan::RulePlanGenerator;
use finplan_lib::profile::create_profile;
use finplan_lib::repo::list_for_user;
use serde_json::json;
use util::{count, count_origin, migrated_pool, onboarded_user};

fn bot() -> ChatBot {
    ChatBot::new(RulePlanGenerator::default())
}

#[tokio::test]
async fn spanish_expense_creates_a_food_row() {
    let pool = migrated_pool().await;
    let user = create_profile(&pool, "Ana").await.unwrap().id;

    let reply = bot().handle(&pool, &user, "Gasté $50 en comida").await.unwrap();
    assert_eq!(reply.lang, Lang::Es);
    assert!(reply.reply.contains("$50.00"), "{}", reply.reply);

    let (amount, category, origin): (f64, String, String) =
        sqlx::query_as("SELECT amount, category, origin FROM expenses WHERE id = ?")
            .bind(reply.record_id.as_deref().unwrap())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(amount, 50.0);
    assert_eq!(category, "food");
    assert_eq!(origin, "chat");
    assert_eq!(reply.summary.unwrap().monthly_expenses, 50.0);
}

#[tokio::test]
async fn english_income_is_one_time_and_counts_this_month() {
    let pool = migrated_pool().await;
    let user = create_profile(&pool, "Sam").await.unwrap().id;

    let reply = bot()
        .handle(&pool, &user, "I received $300 from freelance work")
        .await
        .unwrap();
    assert_eq!(reply.lang, Lang::En);
    let (frequency, source): (String, String) =
        sqlx::query_as("SELECT frequency, source_name FROM income_sources WHERE user_id = ?")
            .bind(&user)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(frequency, "one_time");
    assert_eq!(source, "freelance work");
    assert_eq!(reply.summary.unwrap().monthly_income, 300.0);
}

#[tokio::test]
async fn debt_payment_reduces_the_balance_and_can_settle_it() {
    let pool = migrated_pool().await;
    let user = onboarded_user(
        &pool,
        &json!({ "debts": [{ "name": "Visa", "amount": 500, "monthlyPayment": 50, "interestRate": 24 }] }),
    )
    .await;
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();

    let reply = bot().handle(&pool, &user, "Pagué 200 a la Visa").await.unwrap();
    assert!(reply.reply.contains("$300.00"), "{}", reply.reply);
    let debts: Vec<Debt> = list_for_user(&pool, "debts", &user).await.unwrap();
    assert_eq!(debts[0].current_balance, 300.0);
    assert_eq!(debts[0].status, DebtStatus::Active);

    bot().handle(&pool, &user, "I paid $300 to visa").await.unwrap();
    let debts: Vec<Debt> = list_for_user(&pool, "debts", &user).await.unwrap();
    assert_eq!(debts[0].current_balance, 0.0);
    assert_eq!(debts[0].status, DebtStatus::PaidOff);
    assert_eq!(count(&pool, "debt_payments", &user).await, 2);

    // a re-run keeps the balance the payments produced
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();
    let debts: Vec<Debt> = list_for_user(&pool, "debts", &user).await.unwrap();
    assert_eq!(debts[0].current_balance, 0.0);
    assert_eq!(debts[0].status, DebtStatus::PaidOff);
}

#[tokio::test]
async fn unknown_creditor_writes_nothing() {
    let pool = migrated_pool().await;
    let user = create_profile(&pool, "Ana").await.unwrap().id;

    let reply = bot().handle(&pool, &user, "Pagué 100 al banco").await.unwrap();
    assert!(matches!(reply.intent, Intent::DebtPayment { .. }));
    assert!(reply.reply.starts_with("Lo siento"));
    assert!(reply.record_id.is_none());
    assert_eq!(count(&pool, "debt_payments", &user).await, 0);
}

#[tokio::test]
async fn paying_a_bill_records_an_expense_not_a_debt_payment() {
    let pool = migrated_pool().await;
    let user = create_profile(&pool, "Ana").await.unwrap().id;

    let reply = bot().handle(&pool, &user, "Pagué 50 de luz").await.unwrap();
    assert!(matches!(reply.intent, Intent::Expense { .. }));
    assert_eq!(reply.lang, Lang::Es);
    let (amount, category): (f64, String) =
        sqlx::query_as("SELECT amount, category FROM expenses WHERE id = ?")
            .bind(reply.record_id.as_deref().unwrap())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(amount, 50.0);
    assert_eq!(category, "utilities");
    assert_eq!(count(&pool, "debt_payments", &user).await, 0);
}

#[tokio::test]
async fn chat_rows_survive_reconsolidation() {
    let pool = migrated_pool().await;
    let user = onboarded_user(&pool, &json!({ "expenseCategories": { "food": 200 } })).await;
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();
    bot().handle(&pool, &user, "Gasté 40 en comida").await.unwrap();
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();

    assert_eq!(count_origin(&pool, "expenses", &user, "onboarding").await, 1);
    assert_eq!(count_origin(&pool, "expenses", &user, "chat").await, 1);
}

#[tokio::test]
async fn plan_request_returns_a_plan() {
    let pool = migrated_pool().await;
    let user = onboarded_user(
        &pool,
        &json!({ "monthlyIncome": 2000, "financialGoals": ["Emergency fund"] }),
    )
    .await;
    consolidate(&pool, &user, &ConsolidationOptions::default())
        .await
        .unwrap();

    let reply = bot().handle(&pool, &user, "update my plan").await.unwrap();
    assert_eq!(reply.intent, Intent::UpdatePlan);
    let plan = reply.plan.unwrap();
    assert_eq!(plan.budget.needs, 1000.0);
    assert_eq!(plan.goal_timelines.len(), 1);
}

#[tokio::test]
async fn unknown_messages_get_help_and_empty_ones_fail() {
    let pool = migrated_pool().await;
    let user = create_profile(&pool, "Ana").await.unwrap().id;

    let reply = bot().handle(&pool, &user, "hola").await.unwrap();
    assert_eq!(reply.intent, Intent::Unknown);
    assert!(reply.reply.contains("Gasté"));

    let err = bot().handle(&pool, &user, "   ").await.unwrap_err();
    assert_eq!(err.code(), "CHAT/EMPTY_MESSAGE");

    let err = bot().handle(&pool, "missing", "gaste 5 en cafe").await.unwrap_err();
    assert_eq!(err.code(), "PROFILE/NOT_FOUND");
}
