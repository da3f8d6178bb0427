#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use finplan_lib::migrate::apply_migrations;
use finplan_lib::onboarding::save_onboarding;
use finplan_lib::profile::create_profile;
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

/// Profile with `blob` saved as its onboarding answers.
pub async fn onboarded_user(pool: &SqlitePool, blob: &Value) -> String {
    let profile = create_profile(pool, "Ana").await.unwrap();
    save_onboarding(pool, &profile.id, blob).await.unwrap();
    profile.id
}

pub async fn count(pool: &SqlitePool, table: &str, user_id: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?");
    sqlx::query_scalar(&sql)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count_origin(pool: &SqlitePool, table: &str, user_id: &str, origin: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ? AND origin = ?");
    sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(origin)
        .fetch_one(pool)
        .await
        .unwrap()
}
