//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `statements` - Ingested statement records
//! - `transactions` - Normalized, categorized transactions
//! - `profiles` - Spending profiles, totals and folded transaction markers
//! - `budgets` - Budget suggestions and the accept/reject action
//! - `insights` - Per-period insights
//! - `ledger` - `LedgerStore` implementation and the atomic ingestion commit

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::Period;

mod budgets;
mod insights;
mod ledger;
mod profiles;
mod statements;
mod transactions;

#[cfg(test)]
mod tests;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a stored "YYYY-MM" period
pub(crate) fn parse_period(s: &str) -> Result<Period> {
    s.parse()
        .map_err(|e: String| Error::InvalidData(format!("Stored period: {}", e)))
}

/// Map a stored enum string, reporting the column on failure
pub(crate) fn parse_column<T: std::str::FromStr<Err = String>>(
    value: &str,
    column: &str,
) -> Result<T> {
    value
        .parse()
        .map_err(|e| Error::InvalidData(format!("Stored {}: {}", column, e)))
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) a database file and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            // Per-connection settings; journal mode is persisted by migrations
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every pooled
    /// connection would otherwise get its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "budgetlens_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().into_owned();

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block the ingestion writer
            -- Note: creates -wal and -shm sidecar files alongside the database
            PRAGMA journal_mode = WAL;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory
            PRAGMA temp_store = MEMORY;

            -- Ingested statements, one per (user, fingerprint)
            CREATE TABLE IF NOT EXISTS statements (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                currency TEXT NOT NULL,
                account_kind TEXT NOT NULL,
                transaction_count INTEGER NOT NULL DEFAULT 0,
                rejected_count INTEGER NOT NULL DEFAULT 0,
                ingested_at DATETIME NOT NULL,
                UNIQUE(user_id, fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_statements_user ON statements(user_id, ingested_at);

            -- Normalized transactions (amounts in signed minor units, negative = outflow)
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                statement_id TEXT NOT NULL REFERENCES statements(id),
                date DATE NOT NULL,
                period TEXT NOT NULL,
                description TEXT NOT NULL,
                amount_minor_units INTEGER NOT NULL,
                currency TEXT NOT NULL,
                category TEXT NOT NULL,
                source_confidence REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_statement ON transactions(statement_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_user_period ON transactions(user_id, period);

            -- Spending profiles, one per (user, period); version is the CAS token
            CREATE TABLE IF NOT EXISTS spending_profiles (
                user_id TEXT NOT NULL,
                period TEXT NOT NULL,
                income_minor_units INTEGER NOT NULL DEFAULT 0,
                transaction_count INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, period)
            );

            CREATE TABLE IF NOT EXISTS profile_totals (
                user_id TEXT NOT NULL,
                period TEXT NOT NULL,
                category TEXT NOT NULL,
                total_minor_units INTEGER NOT NULL,
                PRIMARY KEY (user_id, period, category),
                FOREIGN KEY (user_id, period) REFERENCES spending_profiles(user_id, period)
            );

            -- Transactions already folded into a profile
            CREATE TABLE IF NOT EXISTS folded_transactions (
                user_id TEXT NOT NULL,
                period TEXT NOT NULL,
                transaction_id TEXT NOT NULL REFERENCES transactions(id),
                PRIMARY KEY (user_id, period, transaction_id)
            );

            -- Budget suggestions; status changes only through an explicit user action
            CREATE TABLE IF NOT EXISTS budget_suggestions (
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                period TEXT NOT NULL,
                suggested_limit_minor_units INTEGER NOT NULL,
                basis TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'proposed',
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, period, category)
            );

            CREATE INDEX IF NOT EXISTS idx_budget_suggestions_status ON budget_suggestions(user_id, status, period);

            -- Insights, replaced wholesale per (user, period)
            CREATE TABLE IF NOT EXISTS insights (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                period TEXT NOT NULL,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL,
                category TEXT,
                severity REAL NOT NULL,
                message TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_insights_user_period ON insights(user_id, period, position);
            "#,
        )?;

        info!(path = %self.db_path, "Database migrations complete");
        Ok(())
    }
}
