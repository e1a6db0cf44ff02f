//! Persistence seam for the pipeline
//!
//! The orchestrator only talks to a `LedgerStore`. `db::Database` is the SQLite
//! implementation; tests wrap it to inject faults.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    AccountKind, BudgetSuggestion, Currency, Fingerprint, Insight, Period, SpendingProfile,
    StatementId, StatementPeriod, Transaction, TransactionId, UserId,
};

/// A statement that completed ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRecord {
    pub id: StatementId,
    pub user_id: UserId,
    pub fingerprint: Fingerprint,
    pub period: StatementPeriod,
    pub currency: Currency,
    pub account_kind: AccountKind,
    pub transaction_count: u64,
    pub rejected_count: u64,
    pub ingested_at: DateTime<Utc>,
}

/// Everything a run writes for one (user, period)
#[derive(Debug, Clone)]
pub struct PeriodUpdate {
    /// Folded profile; stored with `version = expected_version + 1`
    pub profile: SpendingProfile,
    /// Version the fold was computed from (0 = no stored profile)
    pub expected_version: u64,
    pub folded: Vec<TransactionId>,
    /// Replaces the period's proposed suggestions; accepted and rejected rows stay
    pub suggestions: Vec<BudgetSuggestion>,
    /// Replaces all insights for the period
    pub insights: Vec<Insight>,
}

/// All writes of one ingestion run, committed atomically
#[derive(Debug, Clone)]
pub struct IngestionBatch {
    pub statement: StatementRecord,
    pub transactions: Vec<Transaction>,
    pub periods: Vec<PeriodUpdate>,
}

pub trait LedgerStore: Send + Sync {
    fn find_statement(
        &self,
        user_id: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StatementRecord>>;

    /// Stored profile, or an empty one at version 0
    fn load_profile(&self, user_id: &UserId, period: Period) -> Result<SpendingProfile>;

    /// Up to `limit` stored profiles before `before`, most recent first
    fn load_profile_history(
        &self,
        user_id: &UserId,
        before: Period,
        limit: usize,
    ) -> Result<Vec<SpendingProfile>>;

    fn folded_transaction_ids(
        &self,
        user_id: &UserId,
        period: Period,
    ) -> Result<HashSet<TransactionId>>;

    /// Accepted budgets for periods up to and including `upto`
    fn accepted_budgets(&self, user_id: &UserId, upto: Period) -> Result<Vec<BudgetSuggestion>>;

    /// Commit a run in one transaction
    ///
    /// Fails with `Error::Conflict` and writes nothing when a profile version
    /// moved since it was read, or the statement was committed concurrently.
    fn commit_ingestion(&self, batch: &IngestionBatch) -> Result<()>;
}
