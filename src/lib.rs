//! Personal-finance backend: onboarding consolidation, chat intents,
//! payoff math, summaries and plan generation over SQLite.

pub mod chat;
pub mod config;
pub mod consolidate;
pub mod dashboard;
pub mod db;
pub mod diagnose;
mod error;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod money;
pub mod onboarding;
pub mod payoff;
pub mod plan;
pub mod profile;
pub mod repo;
pub mod summary;
pub mod time;

pub use error::{AppError, AppResult};
