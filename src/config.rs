use std::path::{Path, PathBuf};

use crate::consolidate::{ConsolidationPolicy, DEFAULT_GOAL_TARGET};
use crate::{AppError, AppResult};

pub const ENV_DB: &str = "FINPLAN_DB";
pub const ENV_DATA_DIR: &str = "FINPLAN_DATA_DIR";
pub const ENV_DEFAULT_GOAL_TARGET: &str = "FINPLAN_DEFAULT_GOAL_TARGET";

const APP_DIR: &str = "finplan";
const DB_FILE: &str = "finplan.sqlite3";

/// Values given on the command line. `None` falls through to the
/// environment, then to built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub default_goal_target: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub default_goal_target: f64,
}

fn default_data_dir() -> AppResult<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(base.join(APP_DIR))
}

fn parse_goal_target(raw: &str) -> AppResult<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(AppError::new(
            "CONFIG/INVALID_VALUE",
            "Default goal target must be a positive number",
        )
        .with_context("key", ENV_DEFAULT_GOAL_TARGET)
        .with_context("value", raw.to_string())),
    }
}

impl AppConfig {
    pub fn resolve(overrides: ConfigOverrides) -> AppResult<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Like [`AppConfig::resolve`] with an injectable environment lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match overrides.data_dir {
            Some(dir) => dir,
            None => match env(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
                Some(dir) => PathBuf::from(dir),
                None => default_data_dir()?,
            },
        };
        let db_path = overrides
            .db_path
            .or_else(|| env(ENV_DB).filter(|v| !v.trim().is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| data_dir.join(DB_FILE));
        let default_goal_target = match overrides.default_goal_target {
            Some(value) => parse_goal_target(&value.to_string())?,
            None => match env(ENV_DEFAULT_GOAL_TARGET) {
                Some(raw) => parse_goal_target(&raw)?,
                None => DEFAULT_GOAL_TARGET,
            },
        };
        Ok(Self {
            data_dir,
            db_path,
            default_goal_target,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn policy(&self) -> ConsolidationPolicy {
        ConsolidationPolicy {
            default_goal_target: self.default_goal_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn flags_beat_environment() {
        let config = AppConfig::resolve_with(
            ConfigOverrides {
                db_path: Some(PathBuf::from("/tmp/flag.sqlite3")),
                data_dir: Some(PathBuf::from("/tmp/flag-data")),
                default_goal_target: Some(2500.0),
            },
            env_of(&[(ENV_DB, "/tmp/env.sqlite3"), (ENV_DEFAULT_GOAL_TARGET, "9000")]),
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/flag.sqlite3"));
        assert_eq!(config.default_goal_target, 2500.0);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/flag-data/logs"));
    }

    #[test]
    fn environment_fills_gaps_and_db_defaults_into_data_dir() {
        let config = AppConfig::resolve_with(
            ConfigOverrides::default(),
            env_of(&[(ENV_DATA_DIR, "/srv/finplan"), (ENV_DEFAULT_GOAL_TARGET, "7500")]),
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/finplan/finplan.sqlite3"));
        assert_eq!(config.policy().default_goal_target, 7500.0);
    }

    #[test]
    fn bad_goal_target_is_reported() {
        let err = AppConfig::resolve_with(
            ConfigOverrides {
                data_dir: Some(PathBuf::from("/tmp/x")),
                ..Default::default()
            },
            env_of(&[(ENV_DEFAULT_GOAL_TARGET, "lots")]),
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG/INVALID_VALUE");
    }
}
