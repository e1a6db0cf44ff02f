//! Statement ingestion command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use budgetlens_core::{
    models::{AccountKind, Currency, StatementContext, StatementPeriod, UserId},
    AIClient, IngestionResult, IngestionStatus, LlmBackend, Pipeline, PromptLibrary,
};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use super::{load_categorizer, load_config, open_db, truncate};

/// Parsed `ingest` arguments
#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub user_id: UserId,
    pub context: StatementContext,
}

impl IngestArgs {
    pub fn parse(user: &str, from: &str, to: &str, currency: &str, account: &str) -> Result<Self> {
        let user = user.trim();
        if user.is_empty() {
            anyhow::bail!("--user must not be empty");
        }

        let from = NaiveDate::parse_from_str(from, "%Y-%m-%d")
            .context("Invalid --from date format (use YYYY-MM-DD)")?;
        let to = NaiveDate::parse_from_str(to, "%Y-%m-%d")
            .context("Invalid --to date format (use YYYY-MM-DD)")?;
        let period = StatementPeriod::new(from, to)
            .ok_or_else(|| anyhow::anyhow!("--to ({}) is before --from ({})", to, from))?;

        let currency: Currency = currency.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        let account: AccountKind = account.parse().map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(Self {
            user_id: UserId::new(user),
            context: StatementContext::new(period)
                .with_currency(currency)
                .with_account_kind(account),
        })
    }
}

pub async fn cmd_ingest(
    db_path: &Path,
    config_dir: Option<&Path>,
    file: &Path,
    args: &IngestArgs,
    json: bool,
) -> Result<()> {
    let client = AIClient::from_env().ok_or_else(|| {
        anyhow::anyhow!(
            "No AI backend configured.\n\
             Set OLLAMA_HOST, OPENAI_COMPATIBLE_HOST, or AI_BACKEND=mock"
        )
    })?;

    let config = load_config(config_dir)?;
    let categorizer = load_categorizer(config_dir)?;
    let db = Arc::new(open_db(db_path)?);
    let pipeline = Pipeline::new(db, client, &mut PromptLibrary::new(), categorizer, config)
        .context("Failed to load prompts")?;

    if !json {
        println!(
            "📥 Ingesting {} for {} ({} to {}, model {})...",
            file.display(),
            args.user_id,
            args.context.period.start,
            args.context.period.end,
            pipeline.client().model()
        );
    }

    let result = ingest_file(&pipeline, file, args).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, &args.user_id);
    }

    match result.status {
        IngestionStatus::Failed { reason, .. } => Err(anyhow::anyhow!(reason.message())),
        _ => Ok(()),
    }
}

/// Read the file and run it through the pipeline; Ctrl-C cancels the run
pub async fn ingest_file(
    pipeline: &Pipeline,
    file: &Path,
    args: &IngestArgs,
) -> Result<IngestionResult> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read statement: {}", file.display()))?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling ingestion");
                cancel.cancel();
            }
        })
    };

    let result = pipeline
        .ingest_statement(&args.user_id, &bytes, &args.context, &cancel)
        .await;
    watcher.abort();

    Ok(result)
}

fn print_result(result: &IngestionResult, user_id: &UserId) {
    println!();
    match result.status {
        IngestionStatus::Completed => println!("✅ Statement ingested"),
        IngestionStatus::CompletedWithRejections => {
            println!("✅ Statement ingested (some lines rejected)")
        }
        IngestionStatus::AlreadyProcessed => {
            println!("⏭️  Statement already ingested, nothing changed");
            return;
        }
        IngestionStatus::InProgress => {
            println!("⏳ Statement is being ingested by another run");
            return;
        }
        IngestionStatus::Failed { stage, reason } => {
            println!("❌ Ingestion failed at {}: {}", stage, reason.message());
            return;
        }
    }

    println!("   Transactions: {}", result.transactions_created);
    println!("   Insights: {}", result.insights_generated);
    if !result.periods.is_empty() {
        let periods: Vec<String> = result.periods.iter().map(ToString::to_string).collect();
        println!("   Periods: {}", periods.join(", "));
    }

    if result.rejected_count > 0 {
        println!();
        println!("   Rejected: {}", result.rejected_count);
        for rejection in &result.rejected {
            let amount = rejection.candidate.amount.trim();
            println!(
                "   • {:<18} {:<12} {:<32} {}",
                rejection.reason.as_str(),
                truncate(rejection.candidate.date.trim(), 12),
                truncate(rejection.candidate.description.trim(), 32),
                truncate(amount, 16)
            );
        }
    }

    println!();
    println!("Next: budgetlens insights -u {}", user_id);
}
