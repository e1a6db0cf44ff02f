//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Budgetlens - Turn bank statements into budgets
#[derive(Parser)]
#[command(name = "budgetlens")]
#[command(about = "Statement-to-insight personal budgeting pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "budgetlens.db", global = true)]
    pub db: PathBuf,

    /// Directory with pipeline.toml / categories.toml overrides
    ///
    /// Defaults to ~/.local/share/budgetlens/config. Missing files fall back
    /// to the built-in defaults.
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Ingest a statement (PDF or plain text)
    ///
    /// Requires an AI backend: set OLLAMA_HOST, OPENAI_COMPATIBLE_HOST, or
    /// AI_BACKEND=mock for `date | description | amount` text files.
    Ingest {
        /// User the statement belongs to
        #[arg(short, long)]
        user: String,

        /// Statement file
        #[arg(short, long)]
        file: PathBuf,

        /// First day of the statement period (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day of the statement period (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// ISO currency code of the statement
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Account kind: checking, savings, credit-card
        #[arg(short, long, default_value = "checking")]
        account: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a user's spending profile for a period
    Profile {
        #[arg(short, long)]
        user: String,

        /// Period (YYYY-MM); defaults to the latest profile
        #[arg(short, long)]
        period: Option<String>,
    },

    /// List, accept or reject budget suggestions
    Budgets {
        #[command(subcommand)]
        action: BudgetsAction,
    },

    /// Show insights for a period
    Insights {
        #[arg(short, long)]
        user: String,

        /// Period (YYYY-MM); defaults to the latest profile
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Inspect the category taxonomy and rules
    Categories {
        #[command(subcommand)]
        action: Option<CategoriesAction>,
    },

    /// List ingested statements
    Statements {
        #[arg(short, long)]
        user: String,
    },

    /// Show database, config and AI backend status
    Status,
}

#[derive(Subcommand)]
pub enum BudgetsAction {
    /// List suggestions for a period
    List {
        #[arg(short, long)]
        user: String,

        /// Period (YYYY-MM); defaults to the latest profile
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Accept a suggestion; it becomes the active budget for its category
    Accept {
        #[arg(short, long)]
        user: String,

        /// Category name
        category: String,

        /// Period (YYYY-MM)
        #[arg(short, long)]
        period: String,
    },

    /// Reject a suggestion
    Reject {
        #[arg(short, long)]
        user: String,

        /// Category name
        category: String,

        /// Period (YYYY-MM)
        #[arg(short, long)]
        period: String,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List categories and rules
    List,

    /// Show how a description would be categorized
    Test {
        /// Transaction description
        description: String,

        /// Category the model suggested
        #[arg(short, long)]
        suggested: Option<String>,
    },
}
