//! Transaction storage

use rusqlite::{params, Connection, Row};

use super::statements::parse_date;
use super::{parse_column, Database};
use crate::error::Result;
use crate::models::{Category, Period, StatementId, Transaction, TransactionId, UserId};

const TRANSACTION_COLUMNS: &str = "id, user_id, statement_id, date, description, \
     amount_minor_units, currency, category, source_confidence";

impl Database {
    /// Transactions of one statement in date order
    pub fn list_statement_transactions(&self, statement_id: &StatementId) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE statement_id = ? ORDER BY date, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![statement_id.as_str()], RawTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    /// Transactions of a user dated in `period`
    pub fn list_period_transactions(&self, user_id: &UserId, period: Period) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? AND period = ? ORDER BY date, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![user_id.as_str(), period.to_string()],
                RawTransaction::from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    pub fn count_transactions(&self, user_id: &UserId) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub(crate) fn insert_transactions_tx(conn: &Connection, transactions: &[Transaction]) -> Result<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT OR IGNORE INTO transactions (
                id, user_id, statement_id, date, period, description,
                amount_minor_units, currency, category, source_confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )?;

        let mut inserted = 0;
        for txn in transactions {
            inserted += stmt.execute(params![
                txn.id.as_str(),
                txn.user_id.as_str(),
                txn.statement_id.as_str(),
                txn.date.to_string(),
                txn.period().to_string(),
                txn.description,
                txn.amount_minor_units,
                txn.currency.code(),
                txn.category.as_str(),
                txn.source_confidence,
            ])?;
        }
        Ok(inserted)
    }
}

struct RawTransaction {
    id: String,
    user_id: String,
    statement_id: String,
    date: String,
    description: String,
    amount_minor_units: i64,
    currency: String,
    category: String,
    source_confidence: f64,
}

impl RawTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            statement_id: row.get(2)?,
            date: row.get(3)?,
            description: row.get(4)?,
            amount_minor_units: row.get(5)?,
            currency: row.get(6)?,
            category: row.get(7)?,
            source_confidence: row.get(8)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: TransactionId::from_stored(self.id),
            user_id: UserId::new(self.user_id),
            statement_id: StatementId::from_stored(self.statement_id),
            date: parse_date(&self.date)?,
            description: self.description,
            amount_minor_units: self.amount_minor_units,
            currency: parse_column(&self.currency, "currency")?,
            category: Category::new(self.category),
            source_confidence: self.source_confidence,
        })
    }
}
