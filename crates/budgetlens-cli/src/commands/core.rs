//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` / `load_categorizer` - Layered config loading
//! - `resolve_period` - Period argument handling
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use budgetlens_core::{
    config::default_config_dir,
    db::Database,
    models::{Period, UserId},
    Categorizer, PipelineConfig,
};
use chrono::Datelike;

pub fn open_db(db_path: &Path) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    Database::new(path_str).context("Failed to open database")
}

pub fn load_config(config_dir: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load_from(config_dir).context("Failed to load pipeline config")
}

pub fn load_categorizer(config_dir: Option<&Path>) -> Result<Categorizer> {
    Categorizer::load_from(config_dir).context("Failed to load category taxonomy")
}

/// Explicit `YYYY-MM`, else the user's latest profile, else the current month
pub fn resolve_period(db: &Database, user_id: &UserId, period: Option<&str>) -> Result<Period> {
    if let Some(period) = period {
        return period.parse().map_err(|e: String| anyhow::anyhow!(e));
    }

    if let Some(latest) = db.list_profile_periods(user_id)?.into_iter().next() {
        return Ok(latest);
    }

    let today = chrono::Local::now().date_naive();
    Period::new(today.year(), today.month()).context("Invalid current date")
}

pub fn cmd_init(db_path: &Path) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path)?;
    drop(db);

    println!("✅ Database initialized successfully!");
    println!();
    if let Some(dir) = default_config_dir() {
        println!("Config overrides: {}", dir.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Point at a model: export OLLAMA_HOST=http://localhost:11434");
    println!("  2. Ingest a statement:");
    println!("     budgetlens ingest -u me -f statement.pdf --from 2024-03-01 --to 2024-03-31");
    println!("  3. Review budgets: budgetlens budgets list -u me");

    Ok(())
}
