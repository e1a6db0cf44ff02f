//! Budgetlens CLI - Statement-to-insight budgeting
//!
//! Usage:
//!   budgetlens init                                      Initialize database
//!   budgetlens ingest -u alice -f march.pdf --from 2024-03-01 --to 2024-03-31
//!   budgetlens profile -u alice                          Latest spending profile
//!   budgetlens budgets list -u alice                     Budget suggestions
//!   budgetlens insights -u alice                         Insights

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use budgetlens_core::models::BudgetStatus;
use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db),
        Commands::Ingest {
            user,
            file,
            from,
            to,
            currency,
            account,
            json,
        } => {
            let args = commands::IngestArgs::parse(&user, &from, &to, &currency, &account)?;
            commands::cmd_ingest(&cli.db, config_dir, &file, &args, json).await
        }
        Commands::Profile { user, period } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_profile(&db, &user, period.as_deref())
        }
        Commands::Budgets { action } => {
            let db = commands::open_db(&cli.db)?;
            match action {
                BudgetsAction::List { user, period } => {
                    commands::cmd_budgets_list(&db, &user, period.as_deref())
                }
                BudgetsAction::Accept {
                    user,
                    category,
                    period,
                } => commands::cmd_budgets_set(
                    &db,
                    &user,
                    &category,
                    &period,
                    BudgetStatus::Accepted,
                ),
                BudgetsAction::Reject {
                    user,
                    category,
                    period,
                } => commands::cmd_budgets_set(
                    &db,
                    &user,
                    &category,
                    &period,
                    BudgetStatus::Rejected,
                ),
            }
        }
        Commands::Insights { user, period } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_insights(&db, &user, period.as_deref())
        }
        Commands::Categories { action } => {
            let categorizer = commands::load_categorizer(config_dir)?;
            match action {
                None | Some(CategoriesAction::List) => commands::cmd_categories_list(&categorizer),
                Some(CategoriesAction::Test {
                    description,
                    suggested,
                }) => commands::cmd_categories_test(&categorizer, &description, suggested.as_deref()),
            }
        }
        Commands::Statements { user } => {
            let db = commands::open_db(&cli.db)?;
            commands::cmd_statements(&db, &user)
        }
        Commands::Status => commands::cmd_status(&cli.db, config_dir).await,
    }
}
