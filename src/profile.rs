use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::id::new_uuid_v7;
use crate::model::Profile;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const PROFILE_NOT_FOUND: &str = "PROFILE/NOT_FOUND";
pub const PROFILE_INVALID_NAME: &str = "PROFILE/INVALID_NAME";

pub(crate) fn not_found(user_id: &str) -> AppError {
    AppError::new(PROFILE_NOT_FOUND, "Profile not found").with_context("user_id", user_id)
}

pub async fn create_profile(pool: &SqlitePool, display_name: &str) -> AppResult<Profile> {
    let name = display_name.trim();
    if name.is_empty() {
        return Err(AppError::new(
            PROFILE_INVALID_NAME,
            "Display name must not be empty",
        ));
    }
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO profiles (id, display_name, onboarding_data, onboarding_completed, created_at, updated_at)
         VALUES (?, ?, NULL, 0, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "create_profile"))?;

    info!(target: "finplan", event = "profile_created", user_id = %id);
    Ok(Profile {
        id,
        display_name: name.to_string(),
        onboarding_data: None,
        onboarding_completed: false,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_profile(pool: &SqlitePool, user_id: &str) -> AppResult<Option<Profile>> {
    let mut conn = pool.acquire().await?;
    fetch_profile(&mut conn, user_id).await
}

pub(crate) async fn fetch_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> AppResult<Option<Profile>> {
    let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "get_profile")
                .with_context("user_id", user_id.to_string())
        })?;
    row.as_ref().map(Profile::try_from).transpose()
}

pub async fn list_profiles(pool: &SqlitePool) -> AppResult<Vec<Profile>> {
    let rows = sqlx::query("SELECT * FROM profiles ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Profile::try_from).collect()
}

/// Flip the onboarding-complete flag, optionally dropping the blob.
pub(crate) async fn mark_onboarding_complete(
    conn: &mut SqliteConnection,
    user_id: &str,
    clear_onboarding_data: bool,
) -> AppResult<()> {
    let sql = if clear_onboarding_data {
        "UPDATE profiles SET onboarding_completed = 1, onboarding_data = NULL, updated_at = ? WHERE id = ?"
    } else {
        "UPDATE profiles SET onboarding_completed = 1, updated_at = ? WHERE id = ?"
    };
    let res = sqlx::query(sql)
        .bind(now_ms())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(not_found(user_id));
    }
    Ok(())
}
