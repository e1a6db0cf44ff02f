//! Statement ingestion orchestrator
//!
//! One run moves a statement through
//! `Received → Extracted → Validated → Categorized → Aggregated → Completed`.
//! Every write of a run is committed through `LedgerStore::commit_ingestion`
//! in one transaction, so a failed run leaves nothing behind.

mod locks;
mod state;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::fold;
use crate::ai::AIClient;
use crate::budget::suggest as suggest_budgets;
use crate::categorize::Categorizer;
use crate::config::PipelineConfig;
use crate::error::{Error, ExtractionFailure, Result};
use crate::extract::Extractor;
use crate::insights::generate as generate_insights;
use crate::models::{
    CandidateTransaction, Currency, Fingerprint, Period, StatementContext, StatementId,
    Transaction, TransactionId, UserId,
};
use crate::normalize::{normalize, NormalizedTransaction};
use crate::prompts::{PromptId, PromptLibrary};
use crate::store::{IngestionBatch, LedgerStore, PeriodUpdate, StatementRecord};
use crate::text;

pub use locks::{InFlight, InFlightGuard, KeyedLocks};
pub use state::{FailureReason, IngestionResult, IngestionStatus, RunStage, StageEvent};

use state::RunTrace;

/// How the aggregate-and-commit step ended
enum CommitOutcome {
    Committed { periods: Vec<Period>, insights: usize },
    /// Another run committed the same statement first
    AlreadyProcessed,
}

type StepFailure = (RunStage, FailureReason);

pub struct Pipeline {
    store: Arc<dyn LedgerStore>,
    extractor: Extractor,
    categorizer: Categorizer,
    config: PipelineConfig,
    period_locks: KeyedLocks<(UserId, Period)>,
    in_flight: InFlight<(UserId, Fingerprint)>,
}

impl Pipeline {
    /// Prompts come from `prompts`, so overrides in its directory apply
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: AIClient,
        prompts: &mut PromptLibrary,
        categorizer: Categorizer,
        config: PipelineConfig,
    ) -> Result<Self> {
        let extract_prompt = prompts.get(PromptId::ExtractTransactions)?.clone();
        let mut extractor = Extractor::new(
            client,
            extract_prompt,
            config.extraction.clone(),
            categorizer.taxonomy().names_joined(),
        );
        if config.cleaning.enabled {
            let clean_prompt = prompts.get(PromptId::CleanStatement)?.clone();
            extractor = extractor.with_cleaning(clean_prompt, &config.cleaning);
        }
        Ok(Self {
            store,
            extractor,
            categorizer,
            config,
            period_locks: KeyedLocks::new(),
            in_flight: InFlight::new(),
        })
    }

    /// Pipeline with the embedded config, taxonomy and prompt
    pub fn with_defaults(store: Arc<dyn LedgerStore>, client: AIClient) -> Result<Self> {
        Self::with_config(store, client, PipelineConfig::embedded()?)
    }

    /// Embedded taxonomy and prompt with the given tunables
    pub fn with_config(
        store: Arc<dyn LedgerStore>,
        client: AIClient,
        config: PipelineConfig,
    ) -> Result<Self> {
        Self::new(
            store,
            client,
            &mut PromptLibrary::embedded_only(),
            Categorizer::embedded()?,
            config,
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    pub fn client(&self) -> &AIClient {
        self.extractor.client()
    }

    /// Ingest one statement for a user
    ///
    /// Never returns an error: every failure is reported through
    /// `IngestionStatus::Failed` with the stage the run was trying to reach.
    pub async fn ingest_statement(
        &self,
        user_id: &UserId,
        statement_bytes: &[u8],
        declared: &StatementContext,
        cancel: &CancellationToken,
    ) -> IngestionResult {
        let mut run = RunTrace::start();
        info!(
            user_id = %user_id,
            bytes = statement_bytes.len(),
            period = %declared.period,
            account = declared.account_kind.as_str(),
            "Ingesting statement"
        );

        // Received → text
        let source = text::for_bytes(statement_bytes);
        let statement_text = match source.extract_text(statement_bytes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(user_id = %user_id, source = source.name(), error = %e, "Statement text unreadable");
                return run.fail(RunStage::Received, FailureReason::UnreadableStatement);
            }
        };

        let fingerprint = Fingerprint::of_text(&statement_text);
        let statement_id = StatementId::derive(user_id, &fingerprint);
        run.result.statement_id = Some(statement_id.clone());

        let Some(_claim) = self
            .in_flight
            .try_acquire((user_id.clone(), fingerprint.clone()))
        else {
            info!(user_id = %user_id, fingerprint = fingerprint.short(), "Statement already in progress");
            return run.finish(IngestionStatus::InProgress);
        };

        match self.store.find_statement(user_id, &fingerprint) {
            Ok(Some(existing)) => {
                info!(
                    user_id = %user_id,
                    fingerprint = fingerprint.short(),
                    ingested_at = %existing.ingested_at,
                    "Statement already processed"
                );
                return run.finish(IngestionStatus::AlreadyProcessed);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Duplicate statement lookup failed");
                return run.fail(RunStage::Received, FailureReason::StorageError);
            }
        }

        // Extracted
        let candidates = match self.extract_with_retry(&statement_text, declared, cancel).await {
            Ok(candidates) => candidates,
            Err(failure) => return run.fail(RunStage::Extracted, FailureReason::from(&failure)),
        };
        drop(statement_text);
        run.reached(RunStage::Extracted, format!("{} candidates", candidates.len()));

        // Validated
        let outcome = normalize(candidates, declared, &self.config.validation);
        let detail = format!("{} valid, {} rejected", outcome.valid.len(), outcome.rejected.len());
        run.result.rejected_count = outcome.rejected.len();
        run.result.rejected = outcome.rejected;
        run.reached(RunStage::Validated, detail);

        // Categorized
        let transactions = self.categorize(user_id, &statement_id, &declared.currency, outcome.valid);
        run.reached(RunStage::Categorized, format!("{} transactions", transactions.len()));

        // Aggregated, then committed
        let record = StatementRecord {
            id: statement_id,
            user_id: user_id.clone(),
            fingerprint,
            period: declared.period,
            currency: declared.currency.clone(),
            account_kind: declared.account_kind,
            transaction_count: transactions.len() as u64,
            rejected_count: run.result.rejected_count as u64,
            ingested_at: chrono::Utc::now(),
        };
        let created = transactions.len();

        match self
            .aggregate_and_commit(&record, &transactions, &declared.currency)
            .await
        {
            Ok(CommitOutcome::Committed { periods, insights }) => {
                run.reached(RunStage::Aggregated, format!("{} periods", periods.len()));
                run.result.transactions_created = created;
                run.result.insights_generated = insights;
                run.result.periods = periods;
            }
            Ok(CommitOutcome::AlreadyProcessed) => {
                return run.finish(IngestionStatus::AlreadyProcessed);
            }
            Err((stage, reason)) => return run.fail(stage, reason),
        }

        run.reached(RunStage::Completed, String::new());
        info!(
            user_id = %user_id,
            fingerprint = record.fingerprint.short(),
            transactions = created,
            rejected = run.result.rejected_count,
            insights = run.result.insights_generated,
            "Statement ingested"
        );

        let status = if run.result.rejected_count > 0 {
            IngestionStatus::CompletedWithRejections
        } else {
            IngestionStatus::Completed
        };
        run.finish(status)
    }

    /// Extraction with bounded retries and exponential backoff
    ///
    /// Cancellation is never retried.
    async fn extract_with_retry(
        &self,
        statement_text: &str,
        declared: &StatementContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<CandidateTransaction>, ExtractionFailure> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            let failure = match self.extractor.extract(statement_text, declared, cancel).await {
                Ok(candidates) => return Ok(candidates),
                Err(Error::Extraction(failure)) => failure,
                Err(other) => ExtractionFailure::Upstream(other.to_string()),
            };

            if !failure.is_retryable() || attempt >= retry.max_upstream_retries {
                warn!(
                    reason = failure.as_str(),
                    attempts = attempt + 1,
                    error = %failure,
                    "Extraction failed"
                );
                return Err(failure);
            }

            attempt += 1;
            let delay = retry.backoff_for(attempt);
            debug!(
                reason = failure.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying extraction"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExtractionFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn categorize(
        &self,
        user_id: &UserId,
        statement_id: &StatementId,
        currency: &Currency,
        valid: Vec<NormalizedTransaction>,
    ) -> Vec<Transaction> {
        valid
            .into_iter()
            .map(|n| {
                let categorization = self
                    .categorizer
                    .categorize(&n.description, n.suggested_category.as_deref());
                let id = TransactionId::derive(
                    statement_id,
                    n.date,
                    n.amount_minor_units,
                    &n.description,
                );
                Transaction {
                    id,
                    user_id: user_id.clone(),
                    statement_id: statement_id.clone(),
                    date: n.date,
                    description: n.description,
                    amount_minor_units: n.amount_minor_units,
                    currency: currency.clone(),
                    category: categorization.category,
                    source_confidence: n.confidence * categorization.source.confidence_factor(),
                }
            })
            .collect()
    }

    /// Fold, suggest and commit under the per-period locks
    ///
    /// A version conflict re-reads and re-folds, up to `max_conflict_retries`.
    async fn aggregate_and_commit(
        &self,
        record: &StatementRecord,
        transactions: &[Transaction],
        currency: &Currency,
    ) -> std::result::Result<CommitOutcome, StepFailure> {
        let user_id = &record.user_id;
        let periods: BTreeSet<Period> = transactions.iter().map(Transaction::period).collect();
        let _locks = self
            .period_locks
            .lock_all(periods.iter().map(|p| (user_id.clone(), *p)))
            .await;

        let max_retries = self.config.retry.max_conflict_retries;
        let mut attempt = 0;

        loop {
            let batch = self
                .build_batch(record, transactions, &periods, currency)
                .map_err(|e| {
                    warn!(user_id = %user_id, error = %e, "Aggregation failed");
                    (RunStage::Aggregated, failure_reason(&e))
                })?;

            let detail = match self.store.commit_ingestion(&batch) {
                Ok(()) => {
                    let insights = batch.periods.iter().map(|p| p.insights.len()).sum();
                    return Ok(CommitOutcome::Committed {
                        periods: periods.into_iter().collect(),
                        insights,
                    });
                }
                Err(Error::Conflict(detail)) => detail,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Ingestion commit failed");
                    return Err((RunStage::Completed, FailureReason::StorageError));
                }
            };

            // The conflict may be the same statement committed by another process
            match self.store.find_statement(user_id, &record.fingerprint) {
                Ok(Some(_)) => return Ok(CommitOutcome::AlreadyProcessed),
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Duplicate statement lookup failed");
                    return Err((RunStage::Aggregated, FailureReason::StorageError));
                }
            }

            if attempt >= max_retries {
                warn!(user_id = %user_id, attempts = attempt + 1, detail = %detail, "Giving up after profile conflicts");
                return Err((RunStage::Aggregated, FailureReason::Conflict));
            }
            attempt += 1;
            debug!(user_id = %user_id, attempt, detail = %detail, "Profile conflict, re-folding");
        }
    }

    /// Read current profiles and build every write of the run
    fn build_batch(
        &self,
        record: &StatementRecord,
        transactions: &[Transaction],
        periods: &BTreeSet<Period>,
        currency: &Currency,
    ) -> Result<IngestionBatch> {
        let user_id = &record.user_id;
        let lookback = self
            .config
            .budget
            .weights
            .len()
            .saturating_sub(1)
            .max(self.config.insights.trend_lookback);

        let mut updates: Vec<PeriodUpdate> = Vec::with_capacity(periods.len());
        for period in periods {
            let stored = self.store.load_profile(user_id, *period)?;
            let folded = self.store.folded_transaction_ids(user_id, *period)?;
            let new: Vec<Transaction> = transactions
                .iter()
                .filter(|t| t.period() == *period && !folded.contains(&t.id))
                .cloned()
                .collect();
            let profile = fold(&stored, &new)?;

            let mut history = self.store.load_profile_history(user_id, *period, lookback)?;
            // Earlier periods of this statement are folded but not stored yet
            for earlier in &updates {
                history.retain(|h| h.period != earlier.profile.period);
                history.push(earlier.profile.clone());
            }

            let accepted = self.store.accepted_budgets(user_id, *period)?;
            let suggestions = suggest_budgets(&profile, &history, &accepted, &self.config.budget);
            let insights = generate_insights(
                &profile,
                &accepted,
                &history,
                &self.config.insights,
                currency,
            );

            debug!(
                user_id = %user_id,
                period = %period,
                new = new.len(),
                version = stored.version,
                suggestions = suggestions.len(),
                insights = insights.len(),
                "Folded period"
            );

            updates.push(PeriodUpdate {
                profile,
                expected_version: stored.version,
                folded: new.iter().map(|t| t.id.clone()).collect(),
                suggestions,
                insights,
            });
        }

        Ok(IngestionBatch {
            statement: record.clone(),
            transactions: transactions.to_vec(),
            periods: updates,
        })
    }
}

fn failure_reason(error: &Error) -> FailureReason {
    match error {
        Error::InvalidData(_) => FailureReason::InvalidInput,
        Error::Conflict(_) => FailureReason::Conflict,
        _ => FailureReason::StorageError,
    }
}
