//! Spending profiles
//!
//! Each (user, period) row carries a `version` used as a compare-and-swap
//! token; per-category totals live in `profile_totals`.

use std::collections::{BTreeMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_period, Database};
use crate::error::{Error, Result};
use crate::models::{Category, Period, SpendingProfile, TransactionId, UserId};

impl Database {
    /// Stored profile, or an empty one at version 0
    pub fn get_profile(&self, user_id: &UserId, period: Period) -> Result<SpendingProfile> {
        let conn = self.conn()?;
        let header: Option<(i64, i64, i64)> = conn
            .query_row(
                "SELECT income_minor_units, transaction_count, version FROM spending_profiles WHERE user_id = ? AND period = ?",
                params![user_id.as_str(), period.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let mut profile = SpendingProfile::empty(user_id.clone(), period);
        let Some((income, count, version)) = header else {
            return Ok(profile);
        };
        profile.income_minor_units = income;
        profile.transaction_count = count.max(0) as u64;
        profile.version = version.max(0) as u64;
        profile.totals_by_category = load_totals(&conn, user_id, period)?;
        Ok(profile)
    }

    /// Stored profiles before `before`, most recent first
    pub fn list_profiles_before(
        &self,
        user_id: &UserId,
        before: Period,
        limit: usize,
    ) -> Result<Vec<SpendingProfile>> {
        let rows: Vec<String> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT period FROM spending_profiles WHERE user_id = ? AND period < ? ORDER BY period DESC LIMIT ?",
            )?;
            let rows = stmt
                .query_map(
                    params![user_id.as_str(), before.to_string(), limit as i64],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.iter()
            .map(|s| parse_period(s).and_then(|period| self.get_profile(user_id, period)))
            .collect()
    }

    /// Periods with a stored profile for a user, most recent first
    pub fn list_profile_periods(&self, user_id: &UserId) -> Result<Vec<Period>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT period FROM spending_profiles WHERE user_id = ? ORDER BY period DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter().map(|s| parse_period(s)).collect()
    }

    pub fn get_folded_transaction_ids(
        &self,
        user_id: &UserId,
        period: Period,
    ) -> Result<HashSet<TransactionId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT transaction_id FROM folded_transactions WHERE user_id = ? AND period = ?",
        )?;
        let ids = stmt
            .query_map(params![user_id.as_str(), period.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .map(|r| r.map(TransactionId::from_stored))
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Compare-and-swap write of a folded profile inside an open transaction
    ///
    /// The stored version must still equal `expected_version`; the new row gets
    /// `expected_version + 1`.
    pub(crate) fn write_profile_tx(
        conn: &Connection,
        profile: &SpendingProfile,
        expected_version: u64,
        folded: &[TransactionId],
    ) -> Result<()> {
        let user_id = profile.user_id.as_str();
        let period = profile.period.to_string();
        let new_version = (expected_version + 1) as i64;

        let written = if expected_version == 0 {
            conn.execute(
                r#"
                INSERT INTO spending_profiles (user_id, period, income_minor_units, transaction_count, version)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
                params![
                    user_id,
                    period,
                    profile.income_minor_units,
                    profile.transaction_count as i64,
                    new_version
                ],
            )?
        } else {
            conn.execute(
                r#"
                UPDATE spending_profiles
                SET income_minor_units = ?, transaction_count = ?, version = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE user_id = ? AND period = ? AND version = ?
                "#,
                params![
                    profile.income_minor_units,
                    profile.transaction_count as i64,
                    new_version,
                    user_id,
                    period,
                    expected_version as i64
                ],
            )?
        };

        if written == 0 {
            return Err(Error::Conflict(format!(
                "Profile {} {} changed since version {}",
                user_id, period, expected_version
            )));
        }

        conn.execute(
            "DELETE FROM profile_totals WHERE user_id = ? AND period = ?",
            params![user_id, period],
        )?;
        let mut insert_total = conn.prepare(
            "INSERT INTO profile_totals (user_id, period, category, total_minor_units) VALUES (?, ?, ?, ?)",
        )?;
        for (category, total) in &profile.totals_by_category {
            insert_total.execute(params![user_id, period, category.as_str(), total])?;
        }

        let mut insert_folded = conn.prepare(
            "INSERT OR IGNORE INTO folded_transactions (user_id, period, transaction_id) VALUES (?, ?, ?)",
        )?;
        for id in folded {
            insert_folded.execute(params![user_id, period, id.as_str()])?;
        }

        Ok(())
    }
}

fn load_totals(conn: &Connection, user_id: &UserId, period: Period) -> Result<BTreeMap<Category, i64>> {
    let mut stmt = conn.prepare(
        "SELECT category, total_minor_units FROM profile_totals WHERE user_id = ? AND period = ?",
    )?;
    let totals = stmt
        .query_map(params![user_id.as_str(), period.to_string()], |row| {
            Ok((Category::new(row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(totals)
}
