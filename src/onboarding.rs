//! Decoding of the free-form onboarding blob.
//!
//! The blob is whatever the onboarding wizard collected, so decoding is
//! lenient: amounts may be numbers or strings, field names have a few
//! historical aliases, and anything unusable is dropped rather than
//! rejected. Only a non-object root is an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use crate::money::{non_negative_amount, positive_amount};
use crate::profile::not_found;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const ONBOARDING_INVALID: &str = "ONBOARDING/INVALID";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnboardingDebt {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub monthly_payment: Option<f64>,
    pub interest_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnboardingData {
    pub monthly_income: Option<f64>,
    pub extra_income: Option<f64>,
    /// Category name to monthly amount. Only positive amounts are kept.
    pub expense_categories: BTreeMap<String, f64>,
    pub debts: Vec<OnboardingDebt>,
    pub financial_goals: Vec<String>,
    pub savings: Option<f64>,
    pub currency: Option<String>,
}

fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key).filter(|v| !v.is_null()))
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn decode_expenses(value: Option<&Value>) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    match value {
        Some(Value::Object(map)) => {
            for (category, amount) in map {
                let category = category.trim();
                if category.is_empty() {
                    continue;
                }
                if let Some(amount) = positive_amount(Some(amount)) {
                    out.insert(category.to_string(), amount);
                }
            }
        }
        // some wizard versions posted [{ "category": "food", "amount": 200 }]
        Some(Value::Array(items)) => {
            for item in items.iter().filter_map(Value::as_object) {
                let category = text(first(item, &["category", "name"]));
                let amount = positive_amount(first(item, &["amount", "value"]));
                if let (Some(category), Some(amount)) = (category, amount) {
                    *out.entry(category).or_insert(0.0) += amount;
                }
            }
        }
        _ => {}
    }
    out
}

fn decode_debts(value: Option<&Value>) -> Vec<OnboardingDebt> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| OnboardingDebt {
            name: text(first(item, &["creditor", "name", "title"])),
            amount: positive_amount(first(
                item,
                &["amount", "balance", "currentBalance", "totalAmount"],
            )),
            monthly_payment: non_negative_amount(first(
                item,
                &["monthlyPayment", "minimumPayment", "payment"],
            )),
            interest_rate: non_negative_amount(first(item, &["interestRate", "rate", "apr"])),
        })
        .collect()
}

fn decode_goals(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => text(first(map, &["title", "name"])),
            _ => None,
        })
        .filter(|title| !title.is_empty())
        .collect()
}

impl OnboardingData {
    pub fn from_value(value: &Value) -> AppResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            AppError::new(ONBOARDING_INVALID, "Onboarding data must be a JSON object")
        })?;
        Ok(Self {
            monthly_income: positive_amount(first(map, &["monthlyIncome", "income"])),
            extra_income: positive_amount(first(map, &["extraIncome", "additionalIncome"])),
            expense_categories: decode_expenses(first(map, &["expenseCategories", "expenses"])),
            debts: decode_debts(map.get("debts")),
            financial_goals: decode_goals(first(map, &["financialGoals", "goals"])),
            savings: positive_amount(first(map, &["savings", "currentSavings"])),
            currency: text(map.get("currency")),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.monthly_income.is_none()
            && self.extra_income.is_none()
            && self.expense_categories.is_empty()
            && self.debts.is_empty()
            && self.financial_goals.is_empty()
    }
}

/// Store a new onboarding blob on the profile and clear the completion flag
/// so the next consolidation picks it up.
pub async fn save_onboarding(pool: &SqlitePool, user_id: &str, blob: &Value) -> AppResult<()> {
    let decoded = OnboardingData::from_value(blob)?;
    let raw = serde_json::to_string(blob)?;
    let res = sqlx::query(
        "UPDATE profiles SET onboarding_data = ?, onboarding_completed = 0, updated_at = ? WHERE id = ?",
    )
    .bind(raw)
    .bind(now_ms())
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(not_found(user_id));
    }
    info!(
        target: "finplan",
        event = "onboarding_saved",
        user_id = %user_id,
        expense_categories = decoded.expense_categories.len(),
        debts = decoded.debts.len(),
        goals = decoded.financial_goals.len()
    );
    Ok(())
}

/// Profile state relevant to consolidation: the decoded blob (if any) and
/// the completion flag.
#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingState {
    pub data: Option<OnboardingData>,
    pub completed: bool,
}

pub async fn load_onboarding(pool: &SqlitePool, user_id: &str) -> AppResult<OnboardingState> {
    let mut conn = pool.acquire().await?;
    load_onboarding_conn(&mut conn, user_id).await
}

pub(crate) async fn load_onboarding_conn(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> AppResult<OnboardingState> {
    let row = sqlx::query("SELECT onboarding_data, onboarding_completed FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| not_found(user_id))?;

    let raw: Option<String> = row.try_get("onboarding_data")?;
    let completed = row.try_get::<i64, _>("onboarding_completed")? != 0;
    let data = match raw.as_deref().map(str::trim) {
        None | Some("") | Some("null") => None,
        Some(text) => {
            let value: Value = serde_json::from_str(text)
                .map_err(|err| AppError::from(err).with_context("user_id", user_id))?;
            Some(OnboardingData::from_value(&value)?)
        }
    };
    Ok(OnboardingState { data, completed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_the_canonical_wizard_payload() {
        let blob = json!({
            "monthlyIncome": 1000,
            "expenseCategories": { "food": 200, "transport": "50", "rent": 0 },
            "debts": [{ "name": "Visa", "amount": "1,200", "monthlyPayment": 100, "interestRate": 24 }],
            "financialGoals": ["Emergency fund", "  ", "Vacation"],
            "savings": "300"
        });
        let data = OnboardingData::from_value(&blob).unwrap();
        assert_eq!(data.monthly_income, Some(1000.0));
        assert_eq!(data.extra_income, None);
        assert_eq!(data.expense_categories.len(), 2);
        assert_eq!(data.expense_categories.get("transport"), Some(&50.0));
        assert_eq!(data.debts.len(), 1);
        assert_eq!(data.debts[0].name.as_deref(), Some("Visa"));
        assert_eq!(data.debts[0].amount, Some(1200.0));
        assert_eq!(data.financial_goals, vec!["Emergency fund", "Vacation"]);
        assert_eq!(data.savings, Some(300.0));
    }

    #[test]
    fn accepts_array_shaped_expenses_and_aliases() {
        let blob = json!({
            "income": "2.500",
            "expenses": [
                { "category": "food", "amount": 100 },
                { "category": "food", "amount": 50 },
                { "name": "gym", "value": "30" }
            ],
            "debts": [{ "creditor": "Bank", "balance": 5000, "rate": "12%" }]
        });
        let data = OnboardingData::from_value(&blob).unwrap();
        assert_eq!(data.monthly_income, Some(2500.0));
        assert_eq!(data.expense_categories.get("food"), Some(&150.0));
        assert_eq!(data.expense_categories.get("gym"), Some(&30.0));
        assert_eq!(data.debts[0].interest_rate, Some(12.0));
        assert_eq!(data.debts[0].monthly_payment, None);
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = OnboardingData::from_value(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), ONBOARDING_INVALID);
    }

    #[test]
    fn empty_object_decodes_to_empty_data() {
        let data = OnboardingData::from_value(&json!({ "unknown": true })).unwrap();
        assert!(data.is_empty());
    }
}
