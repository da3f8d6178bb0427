#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use anyhow::Result;
use finplan_lib::migrate::{applied_versions, apply_migrations, known_versions};
use sqlx::SqlitePool;

async fn assert_table_exists(pool: &SqlitePool, name: &str) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?;")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    assert!(exists.is_some(), "expected table `{name}`");
    Ok(())
}

#[tokio::test]
async fn fresh_database_gets_every_table() -> Result<()> {
    let pool = util::temp_pool().await;
    assert!(applied_versions(&pool).await?.is_empty());

    apply_migrations(&pool).await?;
    for table in [
        "profiles",
        "income_sources",
        "expenses",
        "debts",
        "debt_payments",
        "goals",
        "financial_summaries",
        "schema_migrations",
    ] {
        assert_table_exists(&pool, table).await?;
    }
    assert_eq!(applied_versions(&pool).await?, known_versions());
    Ok(())
}

#[tokio::test]
async fn second_run_is_a_no_op() -> Result<()> {
    let pool = util::temp_pool().await;
    apply_migrations(&pool).await?;
    apply_migrations(&pool).await?;
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(rows as usize, known_versions().len());
    Ok(())
}

#[tokio::test]
async fn edited_migration_is_refused() -> Result<()> {
    let pool = util::temp_pool().await;
    apply_migrations(&pool).await?;
    sqlx::query("UPDATE schema_migrations SET checksum = 'tampered'")
        .execute(&pool)
        .await?;
    let err = apply_migrations(&pool).await.unwrap_err();
    assert!(err.to_string().contains("edited after application"));
    Ok(())
}

#[tokio::test]
async fn onboarding_upsert_indexes_are_partial() -> Result<()> {
    let pool = util::migrated_pool().await;
    sqlx::query("INSERT INTO profiles (id, display_name, created_at, updated_at) VALUES ('u', 'U', 0, 0)")
        .execute(&pool)
        .await?;
    for (id, origin) in [("a", "onboarding"), ("b", "chat"), ("c", "chat")] {
        sqlx::query(
            "INSERT INTO expenses (id, user_id, category, amount, date, origin, created_at, updated_at)
             VALUES (?, 'u', 'food', 10, '2026-10-01', ?, 0, 0)",
        )
        .bind(id)
        .bind(origin)
        .execute(&pool)
        .await?;
    }
    let dup = sqlx::query(
        "INSERT INTO expenses (id, user_id, category, amount, date, origin, created_at, updated_at)
         VALUES ('d', 'u', 'food', 10, '2026-10-01', 'onboarding', 0, 0)",
    )
    .execute(&pool)
    .await;
    assert!(dup.is_err());

    for (id, origin) in [("visa-1", "onboarding"), ("visa-2", "manual")] {
        sqlx::query(
            "INSERT INTO debts (id, user_id, creditor, original_amount, current_balance, origin, created_at, updated_at)
             VALUES (?, 'u', 'Visa', 100, 100, ?, 0, 0)",
        )
        .bind(id)
        .bind(origin)
        .execute(&pool)
        .await?;
    }
    Ok(())
}
