use sqlx::{sqlite::SqliteRow, SqliteConnection, SqlitePool};

use crate::model::Origin;
use crate::{AppError, AppResult};

/// Tables scoped by `user_id`. Table names are interpolated into SQL, so
/// everything goes through this list first.
pub const USER_TABLES: &[&str] = &[
    "income_sources",
    "expenses",
    "debts",
    "debt_payments",
    "goals",
];

fn ensure_table(table: &str) -> AppResult<()> {
    if USER_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(AppError::new("REPO/INVALID_TABLE", "invalid table").with_context("table", table))
    }
}

fn order_clause(table: &str) -> &'static str {
    match table {
        "expenses" => "date DESC, created_at, id",
        "debt_payments" => "paid_on DESC, created_at, id",
        _ => "created_at, id",
    }
}

pub async fn list_for_user<T>(pool: &SqlitePool, table: &str, user_id: &str) -> AppResult<Vec<T>>
where
    T: for<'r> TryFrom<&'r SqliteRow, Error = AppError>,
{
    ensure_table(table)?;
    let sql = format!(
        "SELECT * FROM {table} WHERE user_id = ? ORDER BY {}",
        order_clause(table)
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "list")
                .with_context("table", table.to_string())
        })?;
    rows.iter().map(T::try_from).collect()
}

/// Count rows for a user, optionally restricted to one origin.
pub async fn count_for_user(
    conn: &mut SqliteConnection,
    table: &str,
    user_id: &str,
    origin: Option<Origin>,
) -> AppResult<i64> {
    ensure_table(table)?;
    let count = match origin {
        Some(origin) => {
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ? AND origin = ?");
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(user_id)
                .bind(origin.as_str())
                .fetch_one(&mut *conn)
                .await
        }
        None => {
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?");
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await
        }
    };
    count.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "count")
            .with_context("table", table.to_string())
    })
}
