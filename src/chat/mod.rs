//! Free-text chat: parse a message into an intent and apply it.
//!
//! Every write runs in one transaction together with the summary
//! recompute, so a failed message leaves no partial rows behind.

mod parser;

pub use parser::{category_for, normalize, parse_message, Intent, Lang, ParsedMessage};

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::consolidate::lock_user;
use crate::db::finish_tx;
use crate::id::new_uuid_v7;
use crate::model::{DebtStatus, Frequency, Origin};
use crate::money::round_cents;
use crate::plan::{FinancialPlan, PlanGenerator, PlanRequest, RulePlanGenerator};
use crate::profile::{get_profile, not_found};
use crate::summary::{calculate_financial_summary, FinancialSummary};
use crate::time::{format_date, now_ms, today};
use crate::{AppError, AppResult};

/// Balances at or below this are treated as settled.
const PAID_OFF_EPSILON: f64 = 0.005;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(f64),
}

impl From<ChatError> for AppError {
    fn from(error: ChatError) -> Self {
        let message = error.to_string();
        match error {
            ChatError::EmptyMessage => AppError::new("CHAT/EMPTY_MESSAGE", message),
            ChatError::NonPositiveAmount(amount) => {
                AppError::new("CHAT/INVALID_AMOUNT", message).with_context("amount", amount.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub intent: Intent,
    pub lang: Lang,
    pub reply: String,
    /// Id of the row the message created, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<FinancialSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<FinancialPlan>,
}

impl ChatReply {
    fn text(parsed: ParsedMessage, reply: String) -> Self {
        Self {
            intent: parsed.intent,
            lang: parsed.lang,
            reply,
            record_id: None,
            summary: None,
            plan: None,
        }
    }
}

fn money(amount: f64) -> String {
    format!("${:.2}", round_cents(amount))
}

fn ensure_positive(amount: f64) -> Result<f64, ChatError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(ChatError::NonPositiveAmount(amount))
    }
}

struct Recorded {
    id: String,
    summary: FinancialSummary,
}

async fn record_expense(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: f64,
    category: &str,
    description: &str,
) -> AppResult<Recorded> {
    let id = new_uuid_v7();
    let now = now_ms();
    let today = today();
    sqlx::query(
        "INSERT INTO expenses (id, user_id, category, subcategory, description, amount, date, is_recurring, origin, created_at, updated_at)
         VALUES (?, ?, ?, NULL, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(category)
    .bind(description)
    .bind(amount)
    .bind(format_date(today))
    .bind(Origin::Chat.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "chat_expense"))?;
    let summary = calculate_financial_summary(conn, user_id, today).await?;
    Ok(Recorded { id, summary })
}

async fn record_income(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: f64,
    source_name: &str,
) -> AppResult<Recorded> {
    let id = new_uuid_v7();
    let now = now_ms();
    let today = today();
    sqlx::query(
        "INSERT INTO income_sources (id, user_id, source_name, amount, frequency, is_active, origin, received_on, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(source_name)
    .bind(amount)
    .bind(Frequency::OneTime.as_str())
    .bind(Origin::Chat.as_str())
    .bind(format_date(today))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "chat_income"))?;
    let summary = calculate_financial_summary(conn, user_id, today).await?;
    Ok(Recorded { id, summary })
}

struct PaymentApplied {
    recorded: Recorded,
    creditor: String,
    remaining: f64,
    paid_off: bool,
}

/// Apply a payment to the user's best-matching active debt. `Ok(None)` when
/// no debt matches `creditor`.
async fn record_debt_payment(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: f64,
    creditor: &str,
) -> AppResult<Option<PaymentApplied>> {
    let needle = creditor.trim().to_lowercase();
    let row = sqlx::query(
        "SELECT id, creditor, current_balance FROM debts
         WHERE user_id = ?1 AND status = 'active'
           AND (lower(creditor) = ?2 OR instr(lower(creditor), ?2) > 0 OR instr(?2, lower(creditor)) > 0)
         ORDER BY lower(creditor) = ?2 DESC, current_balance DESC, id
         LIMIT 1",
    )
    .bind(user_id)
    .bind(&needle)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let debt_id: String = row.try_get("id")?;
    let name: String = row.try_get("creditor")?;
    let balance: f64 = row.try_get("current_balance")?;
    let remaining = round_cents((balance - amount).max(0.0));
    let paid_off = remaining <= PAID_OFF_EPSILON;
    let status = if paid_off {
        DebtStatus::PaidOff
    } else {
        DebtStatus::Active
    };

    let id = new_uuid_v7();
    let now = now_ms();
    let today = today();
    sqlx::query(
        "INSERT INTO debt_payments (id, debt_id, user_id, amount, paid_on, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&debt_id)
    .bind(user_id)
    .bind(amount)
    .bind(format_date(today))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "chat_debt_payment"))?;

    sqlx::query("UPDATE debts SET current_balance = ?, status = ?, updated_at = ? WHERE id = ?")
        .bind(remaining)
        .bind(status.as_str())
        .bind(now)
        .bind(&debt_id)
        .execute(&mut *conn)
        .await?;

    let summary = calculate_financial_summary(conn, user_id, today).await?;
    Ok(Some(PaymentApplied {
        recorded: Recorded { id, summary },
        creditor: name,
        remaining,
        paid_off,
    }))
}

fn help_text(lang: Lang) -> String {
    match lang {
        Lang::Es => "No entendí tu mensaje. Prueba con \"Gasté $50 en comida\", \"Recibí $500 de freelance\", \"Pagué $200 a la Visa\" o \"Actualiza mi plan\".".to_string(),
        Lang::En => "I didn't catch that. Try \"I spent $50 on food\", \"I received $500 from freelance\", \"I paid $200 to Visa\" or \"update my plan\".".to_string(),
    }
}

/// Dispatches parsed chat messages against the database.
#[derive(Debug, Clone, Default)]
pub struct ChatBot<G = RulePlanGenerator> {
    generator: G,
}

impl<G: PlanGenerator> ChatBot<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub async fn handle(&self, pool: &SqlitePool, user_id: &str, message: &str) -> AppResult<ChatReply> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }
        if get_profile(pool, user_id).await?.is_none() {
            return Err(not_found(user_id));
        }

        let parsed = parse_message(message);
        let lang = parsed.lang;
        let kind = match &parsed.intent {
            Intent::Expense { .. } => "expense",
            Intent::Income { .. } => "income",
            Intent::DebtPayment { .. } => "debt_payment",
            Intent::UpdatePlan => "update_plan",
            Intent::Unknown => "unknown",
        };
        info!(target: "finplan", event = "chat_message", user_id = %user_id, intent = kind);

        match parsed.intent.clone() {
            Intent::Expense {
                amount,
                category,
                description,
            } => {
                let amount = ensure_positive(amount)?;
                let _guard = lock_user(user_id).await;
                let mut tx = pool.begin().await?;
                let result = record_expense(&mut *tx, user_id, amount, &category, &description).await;
                let recorded = finish_tx(tx, result).await?;
                let reply = match lang {
                    Lang::Es => format!("Registré un gasto de {} en {}.", money(amount), category),
                    Lang::En => format!("Logged an expense of {} for {}.", money(amount), category),
                };
                Ok(ChatReply {
                    record_id: Some(recorded.id),
                    summary: Some(recorded.summary),
                    ..ChatReply::text(parsed, reply)
                })
            }
            Intent::Income { amount, source } => {
                let amount = ensure_positive(amount)?;
                let source_name = source.unwrap_or_else(|| match lang {
                    Lang::Es => "Ingreso extra".to_string(),
                    Lang::En => "Extra income".to_string(),
                });
                let _guard = lock_user(user_id).await;
                let mut tx = pool.begin().await?;
                let result = record_income(&mut *tx, user_id, amount, &source_name).await;
                let recorded = finish_tx(tx, result).await?;
                let reply = match lang {
                    Lang::Es => format!("Registré un ingreso de {} ({}).", money(amount), source_name),
                    Lang::En => format!("Logged income of {} ({}).", money(amount), source_name),
                };
                Ok(ChatReply {
                    record_id: Some(recorded.id),
                    summary: Some(recorded.summary),
                    ..ChatReply::text(parsed, reply)
                })
            }
            Intent::DebtPayment { amount, creditor } => {
                let amount = ensure_positive(amount)?;
                let _guard = lock_user(user_id).await;
                let mut tx = pool.begin().await?;
                let result = record_debt_payment(&mut *tx, user_id, amount, &creditor).await;
                let Some(applied) = finish_tx(tx, result).await? else {
                    let reply = match lang {
                        Lang::Es => format!("Lo siento, no encontré una deuda activa con \"{creditor}\"."),
                        Lang::En => format!("Sorry, I couldn't find an active debt with \"{creditor}\"."),
                    };
                    return Ok(ChatReply::text(parsed, reply));
                };
                let reply = match (lang, applied.paid_off) {
                    (Lang::Es, true) => format!(
                        "Registré un pago de {} a {}. ¡Deuda saldada!",
                        money(amount),
                        applied.creditor
                    ),
                    (Lang::Es, false) => format!(
                        "Registré un pago de {} a {}. Saldo restante: {}.",
                        money(amount),
                        applied.creditor,
                        money(applied.remaining)
                    ),
                    (Lang::En, true) => format!(
                        "Logged a payment of {} to {}. Debt paid off!",
                        money(amount),
                        applied.creditor
                    ),
                    (Lang::En, false) => format!(
                        "Logged a payment of {} to {}. Remaining balance: {}.",
                        money(amount),
                        applied.creditor,
                        money(applied.remaining)
                    ),
                };
                Ok(ChatReply {
                    record_id: Some(applied.recorded.id),
                    summary: Some(applied.recorded.summary),
                    ..ChatReply::text(parsed, reply)
                })
            }
            Intent::UpdatePlan => {
                let request = PlanRequest::build(pool, user_id).await?;
                let plan = self.generator.generate(&request)?;
                let reply = match lang {
                    Lang::Es => format!(
                        "Actualicé tu plan: {} pasos de deuda, {} metas y {} recomendaciones.",
                        plan.debt_strategy.len(),
                        plan.goal_timelines.len(),
                        plan.recommendations.len()
                    ),
                    Lang::En => format!(
                        "Updated your plan: {} debt steps, {} goals and {} recommendations.",
                        plan.debt_strategy.len(),
                        plan.goal_timelines.len(),
                        plan.recommendations.len()
                    ),
                };
                Ok(ChatReply {
                    summary: Some(request.summary.clone()),
                    plan: Some(plan),
                    ..ChatReply::text(parsed, reply)
                })
            }
            Intent::Unknown => Ok(ChatReply::text(parsed, help_text(lang))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_renders_two_decimals() {
        assert_eq!(money(50.0), "$50.00");
        assert_eq!(money(1234.567), "$1234.57");
    }

    #[test]
    fn zero_amounts_are_rejected_with_a_stable_code() {
        let err: AppError = ensure_positive(0.0).unwrap_err().into();
        assert_eq!(err.code(), "CHAT/INVALID_AMOUNT");
        assert!(ensure_positive(12.5).is_ok());
    }

    #[test]
    fn help_follows_message_language() {
        assert!(help_text(Lang::Es).contains("Gasté"));
        assert!(help_text(Lang::En).contains("I spent"));
    }
}
