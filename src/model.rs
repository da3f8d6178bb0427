//! Row types for the finance tables and the small vocabularies stored in
//! their text columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use crate::{AppError, AppResult};

const MODEL_DECODE: &str = "MODEL/DECODE";

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::new(MODEL_DECODE, concat!("Unknown ", stringify!($name)))
                        .with_context("value", other.to_string())),
                }
            }
        }
    };
}

text_enum!(Origin {
    Onboarding => "onboarding",
    Chat => "chat",
    Manual => "manual",
});

text_enum!(Frequency {
    Weekly => "weekly",
    Biweekly => "biweekly",
    Monthly => "monthly",
    Yearly => "yearly",
    OneTime => "one_time",
});

text_enum!(DebtStatus {
    Active => "active",
    PaidOff => "paid_off",
});

text_enum!(GoalPriority {
    High => "high",
    Medium => "medium",
    Low => "low",
});

text_enum!(GoalStatus {
    Active => "active",
    Completed => "completed",
});

impl Frequency {
    /// Multiplier that turns one payment at this frequency into a monthly
    /// figure. One-time amounts have no recurring monthly equivalent.
    pub fn monthly_factor(&self) -> f64 {
        match self {
            Frequency::Weekly => 52.0 / 12.0,
            Frequency::Biweekly => 26.0 / 12.0,
            Frequency::Monthly => 1.0,
            Frequency::Yearly => 1.0 / 12.0,
            Frequency::OneTime => 0.0,
        }
    }
}

fn decode<T: FromStr<Err = AppError>>(row: &SqliteRow, column: &str) -> AppResult<T> {
    let raw: String = row.try_get(column).map_err(AppError::from)?;
    raw.parse::<T>()
        .map_err(|err| err.with_context("column", column.to_string()))
}

fn flag(row: &SqliteRow, column: &str) -> AppResult<bool> {
    row.try_get::<i64, _>(column)
        .map(|value| value != 0)
        .map_err(AppError::from)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_data: Option<serde_json::Value>,
    pub onboarding_completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for Profile {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let raw: Option<String> = row.try_get("onboarding_data").map_err(AppError::from)?;
        let onboarding_data = match raw {
            Some(text) if !text.trim().is_empty() => Some(
                serde_json::from_str(&text)
                    .map_err(|err| AppError::from(err).with_context("column", "onboarding_data"))?,
            ),
            _ => None,
        };
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            display_name: row.try_get("display_name").map_err(AppError::from)?,
            onboarding_data,
            onboarding_completed: flag(row, "onboarding_completed")?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeSource {
    pub id: String,
    pub user_id: String,
    pub source_name: String,
    pub amount: f64,
    pub frequency: Frequency,
    pub is_active: bool,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_on: Option<String>,
}

impl TryFrom<&SqliteRow> for IncomeSource {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            source_name: row.try_get("source_name").map_err(AppError::from)?,
            amount: row.try_get("amount").map_err(AppError::from)?,
            frequency: decode(row, "frequency")?,
            is_active: flag(row, "is_active")?,
            origin: decode(row, "origin")?,
            received_on: row.try_get("received_on").map_err(AppError::from)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub user_id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub amount: f64,
    pub date: String,
    pub is_recurring: bool,
    pub origin: Origin,
}

impl TryFrom<&SqliteRow> for Expense {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            category: row.try_get("category").map_err(AppError::from)?,
            subcategory: row.try_get("subcategory").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            amount: row.try_get("amount").map_err(AppError::from)?,
            date: row.try_get("date").map_err(AppError::from)?,
            is_recurring: flag(row, "is_recurring")?,
            origin: decode(row, "origin")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub id: String,
    pub user_id: String,
    pub creditor: String,
    pub original_amount: f64,
    pub current_balance: f64,
    pub monthly_payment: f64,
    /// Annual percentage rate, e.g. `24.0` for 24 %.
    pub interest_rate: f64,
    pub status: DebtStatus,
    pub origin: Origin,
}

impl TryFrom<&SqliteRow> for Debt {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            creditor: row.try_get("creditor").map_err(AppError::from)?,
            original_amount: row.try_get("original_amount").map_err(AppError::from)?,
            current_balance: row.try_get("current_balance").map_err(AppError::from)?,
            monthly_payment: row.try_get("monthly_payment").map_err(AppError::from)?,
            interest_rate: row.try_get("interest_rate").map_err(AppError::from)?,
            status: decode(row, "status")?,
            origin: decode(row, "origin")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub target_amount: f64,
    pub current_amount: f64,
    pub priority: GoalPriority,
    pub status: GoalStatus,
    pub origin: Origin,
}

impl Goal {
    pub fn progress_pct(&self) -> f64 {
        if self.target_amount <= 0.0 {
            return 0.0;
        }
        (self.current_amount / self.target_amount * 100.0).clamp(0.0, 100.0)
    }
}

impl TryFrom<&SqliteRow> for Goal {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            title: row.try_get("title").map_err(AppError::from)?,
            target_amount: row.try_get("target_amount").map_err(AppError::from)?,
            current_amount: row.try_get("current_amount").map_err(AppError::from)?,
            priority: decode(row, "priority")?,
            status: decode(row, "status")?,
            origin: decode(row, "origin")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_their_column_text() {
        assert_eq!("one_time".parse::<Frequency>().unwrap(), Frequency::OneTime);
        assert_eq!(DebtStatus::PaidOff.as_str(), "paid_off");
        let err = "fortnightly".parse::<Frequency>().unwrap_err();
        assert_eq!(err.code(), MODEL_DECODE);
        assert_eq!(err.context().get("value").map(String::as_str), Some("fortnightly"));
    }

    #[test]
    fn monthly_factor_normalises_common_frequencies() {
        assert!((Frequency::Weekly.monthly_factor() * 12.0 - 52.0).abs() < 1e-9);
        assert_eq!(Frequency::OneTime.monthly_factor(), 0.0);
    }

    #[test]
    fn goal_progress_is_clamped() {
        let goal = Goal {
            id: "g".into(),
            user_id: "u".into(),
            title: "Trip".into(),
            target_amount: 100.0,
            current_amount: 150.0,
            priority: GoalPriority::Low,
            status: GoalStatus::Active,
            origin: Origin::Manual,
        };
        assert_eq!(goal.progress_pct(), 100.0);
    }
}
