//! `LedgerStore` implementation and the atomic ingestion commit

use std::collections::HashSet;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{BudgetSuggestion, Fingerprint, Period, SpendingProfile, TransactionId, UserId};
use crate::store::{IngestionBatch, LedgerStore, StatementRecord};

impl Database {
    /// Write every row of an ingestion run in one SQLite transaction
    ///
    /// Any failure, including a profile version conflict, rolls the whole run back.
    pub fn commit_ingestion_batch(&self, batch: &IngestionBatch) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if !Self::insert_statement_tx(&tx, &batch.statement)? {
            return Err(Error::Conflict(format!(
                "Statement {} was committed concurrently",
                batch.statement.fingerprint.short()
            )));
        }

        let inserted = Self::insert_transactions_tx(&tx, &batch.transactions)?;

        for update in &batch.periods {
            let profile = &update.profile;
            Self::write_profile_tx(&tx, profile, update.expected_version, &update.folded)?;
            Self::replace_proposed_budgets_tx(&tx, &profile.user_id, profile.period, &update.suggestions)?;
            Self::replace_insights_tx(&tx, &profile.user_id, profile.period, &update.insights)?;
        }

        tx.commit()?;

        tracing::debug!(
            user_id = %batch.statement.user_id,
            statement_id = %batch.statement.id,
            transactions = inserted,
            periods = batch.periods.len(),
            "Committed ingestion"
        );
        Ok(())
    }
}

impl LedgerStore for Database {
    fn find_statement(
        &self,
        user_id: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StatementRecord>> {
        self.get_statement_by_fingerprint(user_id, fingerprint)
    }

    fn load_profile(&self, user_id: &UserId, period: Period) -> Result<SpendingProfile> {
        self.get_profile(user_id, period)
    }

    fn load_profile_history(
        &self,
        user_id: &UserId,
        before: Period,
        limit: usize,
    ) -> Result<Vec<SpendingProfile>> {
        self.list_profiles_before(user_id, before, limit)
    }

    fn folded_transaction_ids(
        &self,
        user_id: &UserId,
        period: Period,
    ) -> Result<HashSet<TransactionId>> {
        self.get_folded_transaction_ids(user_id, period)
    }

    fn accepted_budgets(&self, user_id: &UserId, upto: Period) -> Result<Vec<BudgetSuggestion>> {
        self.list_accepted_budgets(user_id, upto)
    }

    fn commit_ingestion(&self, batch: &IngestionBatch) -> Result<()> {
        self.commit_ingestion_batch(batch)
    }
}
