//! Ingested statement records

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_datetime, parse_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Fingerprint, StatementId, StatementPeriod, UserId};
use crate::store::StatementRecord;

const STATEMENT_COLUMNS: &str = "id, user_id, fingerprint, period_start, period_end, currency, \
     account_kind, transaction_count, rejected_count, ingested_at";

impl Database {
    /// Look up a completed statement by its fingerprint
    pub fn get_statement_by_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StatementRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM statements WHERE user_id = ? AND fingerprint = ?",
                    STATEMENT_COLUMNS
                ),
                params![user_id.as_str(), fingerprint.as_str()],
                RawStatement::from_row,
            )
            .optional()?;
        raw.map(RawStatement::into_record).transpose()
    }

    /// Statements for a user, newest first
    pub fn list_statements(&self, user_id: &UserId) -> Result<Vec<StatementRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statements WHERE user_id = ? ORDER BY ingested_at DESC, id",
            STATEMENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id.as_str()], RawStatement::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawStatement::into_record).collect()
    }

    /// Insert a statement record inside an open transaction
    ///
    /// Returns false when the (user, fingerprint) pair already exists.
    pub(crate) fn insert_statement_tx(conn: &Connection, record: &StatementRecord) -> Result<bool> {
        let inserted = conn.execute(
            r#"
            INSERT INTO statements (
                id, user_id, fingerprint, period_start, period_end, currency,
                account_kind, transaction_count, rejected_count, ingested_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
            params![
                record.id.as_str(),
                record.user_id.as_str(),
                record.fingerprint.as_str(),
                record.period.start.to_string(),
                record.period.end.to_string(),
                record.currency.code(),
                record.account_kind.as_str(),
                record.transaction_count as i64,
                record.rejected_count as i64,
                format_datetime(&record.ingested_at),
            ],
        )?;
        Ok(inserted > 0)
    }
}

/// Row as stored, before the typed fields are parsed
struct RawStatement {
    id: String,
    user_id: String,
    fingerprint: String,
    period_start: String,
    period_end: String,
    currency: String,
    account_kind: String,
    transaction_count: i64,
    rejected_count: i64,
    ingested_at: String,
}

impl RawStatement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            fingerprint: row.get(2)?,
            period_start: row.get(3)?,
            period_end: row.get(4)?,
            currency: row.get(5)?,
            account_kind: row.get(6)?,
            transaction_count: row.get(7)?,
            rejected_count: row.get(8)?,
            ingested_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<StatementRecord> {
        let start = parse_date(&self.period_start)?;
        let end = parse_date(&self.period_end)?;
        let period = StatementPeriod::new(start, end).ok_or_else(|| {
            Error::InvalidData(format!("Statement {} has an inverted period", self.id))
        })?;

        Ok(StatementRecord {
            id: StatementId::from_stored(self.id),
            user_id: UserId::new(self.user_id),
            fingerprint: Fingerprint::from_stored(self.fingerprint),
            period,
            currency: parse_column(&self.currency, "currency")?,
            account_kind: parse_column(&self.account_kind, "account_kind")?,
            transaction_count: self.transaction_count.max(0) as u64,
            rejected_count: self.rejected_count.max(0) as u64,
            ingested_at: parse_datetime(&self.ingested_at),
        })
    }
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidData(format!("Stored date {}: {}", s, e)))
}
