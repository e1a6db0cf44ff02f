//! Budget suggestion storage
//!
//! The pipeline only writes `proposed` rows. Moving a suggestion to
//! `accepted` or `rejected` is the user's explicit action (`set_budget_status`).

use rusqlite::{params, Connection, Row};

use super::{parse_column, parse_period, Database};
use crate::error::{Error, Result};
use crate::models::{BudgetStatus, BudgetSuggestion, Category, Period, UserId};

const BUDGET_COLUMNS: &str =
    "user_id, category, period, suggested_limit_minor_units, basis, status";

impl Database {
    /// Suggestions for one period, sorted by category
    pub fn list_budget_suggestions(
        &self,
        user_id: &UserId,
        period: Period,
    ) -> Result<Vec<BudgetSuggestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM budget_suggestions WHERE user_id = ? AND period = ? ORDER BY category",
            BUDGET_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id.as_str(), period.to_string()], RawBudget::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawBudget::into_suggestion).collect()
    }

    /// Accepted budgets for periods up to and including `upto`
    pub fn list_accepted_budgets(&self, user_id: &UserId, upto: Period) -> Result<Vec<BudgetSuggestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM budget_suggestions WHERE user_id = ? AND status = 'accepted' AND period <= ? ORDER BY period, category",
            BUDGET_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id.as_str(), upto.to_string()], RawBudget::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawBudget::into_suggestion).collect()
    }

    /// Accept or reject a suggestion
    ///
    /// Returns `Error::NotFound` when no suggestion exists for the key.
    pub fn set_budget_status(
        &self,
        user_id: &UserId,
        category: &str,
        period: Period,
        status: BudgetStatus,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE budget_suggestions
            SET status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ? AND category = ? AND period = ?
            "#,
            params![status.as_str(), user_id.as_str(), category, period.to_string()],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!(
                "No budget suggestion for {} in {} ({})",
                category, period, user_id
            )));
        }

        tracing::info!(
            user_id = %user_id,
            category,
            period = %period,
            status = status.as_str(),
            "Budget suggestion updated"
        );
        Ok(())
    }

    /// Insert or update a suggestion directly (e.g. one written by another collaborator)
    pub fn upsert_budget_suggestion(&self, suggestion: &BudgetSuggestion) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO budget_suggestions (user_id, category, period, suggested_limit_minor_units, basis, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, period, category) DO UPDATE SET
                suggested_limit_minor_units = excluded.suggested_limit_minor_units,
                basis = excluded.basis,
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                suggestion.user_id.as_str(),
                suggestion.category.as_str(),
                suggestion.period.to_string(),
                suggestion.suggested_limit_minor_units,
                suggestion.basis.as_str(),
                suggestion.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Replace the period's proposed suggestions inside an open transaction
    ///
    /// Accepted and rejected rows are kept; a new proposal for their category
    /// is dropped.
    pub(crate) fn replace_proposed_budgets_tx(
        conn: &Connection,
        user_id: &UserId,
        period: Period,
        suggestions: &[BudgetSuggestion],
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM budget_suggestions WHERE user_id = ? AND period = ? AND status = 'proposed'",
            params![user_id.as_str(), period.to_string()],
        )?;

        let mut stmt = conn.prepare(
            r#"
            INSERT INTO budget_suggestions (user_id, category, period, suggested_limit_minor_units, basis, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )?;
        for s in suggestions {
            stmt.execute(params![
                s.user_id.as_str(),
                s.category.as_str(),
                s.period.to_string(),
                s.suggested_limit_minor_units,
                s.basis.as_str(),
                s.status.as_str(),
            ])?;
        }
        Ok(())
    }
}

struct RawBudget {
    user_id: String,
    category: String,
    period: String,
    limit: i64,
    basis: String,
    status: String,
}

impl RawBudget {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            category: row.get(1)?,
            period: row.get(2)?,
            limit: row.get(3)?,
            basis: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_suggestion(self) -> Result<BudgetSuggestion> {
        Ok(BudgetSuggestion {
            user_id: UserId::new(self.user_id),
            category: Category::new(self.category),
            period: parse_period(&self.period)?,
            suggested_limit_minor_units: self.limit,
            basis: parse_column(&self.basis, "basis")?,
            status: parse_column(&self.status, "status")?,
        })
    }
}
