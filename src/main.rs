use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;

use finplan_lib::chat::ChatBot;
use finplan_lib::config::{AppConfig, ConfigOverrides};
use finplan_lib::consolidate::{consolidate, ConsolidationOptions};
use finplan_lib::dashboard::dashboard;
use finplan_lib::db::open_sqlite_pool;
use finplan_lib::diagnose::diagnose;
use finplan_lib::logging::{init_file_logging, init_logging};
use finplan_lib::migrate::{applied_versions, apply_migrations, known_versions};
use finplan_lib::onboarding::save_onboarding;
use finplan_lib::payoff::payoff_schedule;
use finplan_lib::plan::{PlanGenerator, PlanRequest, RulePlanGenerator};
use finplan_lib::profile::{create_profile, get_profile, list_profiles};
use finplan_lib::summary::refresh_summary;
use finplan_lib::time::today;

#[derive(Parser)]
#[command(name = "finplan", about = "Personal finance planner")]
struct Cli {
    /// Explicit database path
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Directory for the database and logs
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Target amount for goals created from onboarding
    #[arg(long, value_name = "AMOUNT", global = true)]
    goal_target: Option<f64>,

    /// Also write logs under <data-dir>/logs
    #[arg(long, global = true)]
    log_file: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Schema maintenance
    #[command(subcommand)]
    Db(DbCmd),
    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileCmd),
    /// Store onboarding answers
    #[command(subcommand)]
    Onboarding(OnboardingCmd),
    /// Copy onboarding answers into the finance tables
    Consolidate {
        #[command(flatten)]
        user: UserArg,
        /// Drop the onboarding blob afterwards
        #[arg(long)]
        clear_onboarding: bool,
    },
    /// Report whether a profile still needs consolidation
    Diagnose {
        #[command(flatten)]
        user: UserArg,
    },
    /// Months needed to pay off a debt
    Payoff {
        #[arg(long)]
        principal: f64,
        /// Annual interest rate in percent
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
        #[arg(long)]
        payment: f64,
    },
    /// Send a chat message
    Chat {
        #[command(flatten)]
        user: UserArg,
        #[arg(long, short)]
        message: String,
    },
    /// Recompute and show the financial summary
    Summary {
        #[command(flatten)]
        user: UserArg,
    },
    /// Generate a financial plan
    Plan {
        #[command(flatten)]
        user: UserArg,
    },
    /// Show the dashboard view
    Dashboard {
        #[command(flatten)]
        user: UserArg,
    },
}

#[derive(Args)]
struct UserArg {
    /// Profile id
    #[arg(long, value_name = "ID")]
    user: String,
}

#[derive(Subcommand)]
enum DbCmd {
    /// Apply pending migrations
    Migrate,
    /// Show applied and pending migrations
    Status,
}

#[derive(Subcommand)]
enum ProfileCmd {
    Create {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Subcommand)]
enum OnboardingCmd {
    /// Set the blob from a JSON file, or `-` for stdin
    Set {
        #[command(flatten)]
        user: UserArg,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

async fn open(config: &AppConfig) -> Result<SqlitePool> {
    let pool = open_sqlite_pool(config.db_path()).await?;
    apply_migrations(&pool).await?;
    Ok(pool)
}

fn read_blob(file: &Path) -> Result<serde_json::Value> {
    let raw = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("read onboarding JSON from stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("read onboarding JSON from {}", file.display()))?
    };
    serde_json::from_str(&raw).context("parse onboarding JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::resolve(ConfigOverrides {
        db_path: cli.db,
        data_dir: cli.data_dir,
        default_goal_target: cli.goal_target,
    })?;

    let _guard = if cli.log_file {
        Some(init_file_logging(&config.log_dir())?)
    } else {
        init_logging();
        None
    };

    let json = cli.json;
    match cli.cmd {
        Cmd::Db(DbCmd::Migrate) => {
            let pool = open(&config).await?;
            let applied = applied_versions(&pool).await?;
            emit(json, &applied, |v| format!("applied {} migration(s)", v.len()))
        }
        Cmd::Db(DbCmd::Status) => {
            let pool = open_sqlite_pool(config.db_path()).await?;
            let applied = applied_versions(&pool).await?;
            let pending: Vec<&str> = known_versions()
                .into_iter()
                .filter(|v| !applied.iter().any(|a| a == v))
                .collect();
            let status = serde_json::json!({ "applied": applied, "pending": pending });
            emit(json, &status, |_| {
                format!("applied: {}, pending: {}", applied.len(), pending.len())
            })
        }
        Cmd::Profile(ProfileCmd::Create { name }) => {
            let pool = open(&config).await?;
            let profile = create_profile(&pool, &name).await?;
            emit(json, &profile, |p| p.id.clone())
        }
        Cmd::Profile(ProfileCmd::List) => {
            let pool = open(&config).await?;
            let profiles = list_profiles(&pool).await?;
            emit(json, &profiles, |ps| {
                ps.iter()
                    .map(|p| format!("{}\t{}\tonboarded={}", p.id, p.display_name, p.onboarding_completed))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Cmd::Onboarding(OnboardingCmd::Set { user, file }) => {
            let blob = read_blob(&file)?;
            let pool = open(&config).await?;
            save_onboarding(&pool, &user.user, &blob).await?;
            emit(json, &serde_json::json!({ "userId": user.user, "saved": true }), |_| {
                "onboarding saved".to_string()
            })
        }
        Cmd::Consolidate {
            user,
            clear_onboarding,
        } => {
            let pool = open(&config).await?;
            let options = ConsolidationOptions {
                policy: config.policy(),
                clear_onboarding_data: clear_onboarding,
                as_of: None,
            };
            let report = consolidate(&pool, &user.user, &options).await?;
            emit(json, &report, |r| {
                let mut lines = vec![format!("{:?}", r.outcome)];
                for (table, t) in &r.tables {
                    lines.push(format!("{table}: upserted {} removed {}", t.upserted, t.removed));
                }
                lines.join("\n")
            })
        }
        Cmd::Diagnose { user } => {
            let pool = open(&config).await?;
            let diagnosis = diagnose(&pool, &user.user, &config.policy()).await?;
            emit(json, &diagnosis, |d| {
                if d.needs_migration {
                    format!("needs migration: {}", d.reasons.join("; "))
                } else {
                    "no migration needed".to_string()
                }
            })
        }
        Cmd::Payoff {
            principal,
            rate,
            payment,
        } => {
            if principal < 0.0 || payment < 0.0 {
                bail!("principal and payment must not be negative");
            }
            let estimate = payoff_schedule(principal, rate, payment);
            emit(json, &estimate, |e| {
                if e.payoff_possible {
                    format!("{} months, interest {:.2}", e.months, e.total_interest)
                } else {
                    format!("{} (payment does not cover interest)", e.months)
                }
            })
        }
        Cmd::Chat { user, message } => {
            let pool = open(&config).await?;
            let bot = ChatBot::new(RulePlanGenerator::default());
            let reply = bot.handle(&pool, &user.user, &message).await?;
            emit(json, &reply, |r| r.reply.clone())
        }
        Cmd::Summary { user } => {
            let pool = open(&config).await?;
            if get_profile(&pool, &user.user).await?.is_none() {
                bail!("profile {} not found", user.user);
            }
            let summary = refresh_summary(&pool, &user.user, today()).await?;
            emit(json, &summary, |s| {
                format!(
                    "income {:.2}, expenses {:.2}, debt payments {:.2}, disposable {:.2}",
                    s.monthly_income, s.monthly_expenses, s.monthly_debt_payments, s.disposable_income
                )
            })
        }
        Cmd::Plan { user } => {
            let pool = open(&config).await?;
            let request = PlanRequest::build(&pool, &user.user).await?;
            let plan = RulePlanGenerator::default().generate(&request)?;
            emit(json, &plan, |p| p.recommendations.join("\n"))
        }
        Cmd::Dashboard { user } => {
            let pool = open(&config).await?;
            let view = dashboard(&pool, &user.user).await?;
            emit(json, &view, |d| {
                format!(
                    "{}: {} income source(s), {} debt(s), {} goal(s), disposable {:.2}",
                    d.profile.display_name,
                    d.income.len(),
                    d.debts.len(),
                    d.goals.len(),
                    d.summary.disposable_income
                )
            })
        }
    }
}
