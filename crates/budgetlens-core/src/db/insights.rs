//! Insight storage
//!
//! Insights are derived data: each run replaces the full set for a period.

use rusqlite::{params, Connection};

use super::{parse_column, parse_period, Database};
use crate::error::Result;
use crate::models::{Category, Insight, Period, UserId};

impl Database {
    /// Insights for one period in generation order
    pub fn list_insights(&self, user_id: &UserId, period: Period) -> Result<Vec<Insight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, period, kind, category, severity, message
            FROM insights
            WHERE user_id = ? AND period = ?
            ORDER BY position
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id.as_str(), period.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user, period, kind, category, severity, message)| {
                Ok(Insight {
                    user_id: UserId::new(user),
                    period: parse_period(&period)?,
                    kind: parse_column(&kind, "kind")?,
                    category: category.map(Category::new),
                    severity,
                    message,
                })
            })
            .collect()
    }

    pub(crate) fn replace_insights_tx(
        conn: &Connection,
        user_id: &UserId,
        period: Period,
        insights: &[Insight],
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM insights WHERE user_id = ? AND period = ?",
            params![user_id.as_str(), period.to_string()],
        )?;

        let mut stmt = conn.prepare(
            r#"
            INSERT INTO insights (user_id, period, position, kind, category, severity, message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )?;
        for (position, insight) in insights.iter().enumerate() {
            stmt.execute(params![
                user_id.as_str(),
                period.to_string(),
                position as i64,
                insight.kind.as_str(),
                insight.category.as_ref().map(|c| c.as_str()),
                insight.severity,
                insight.message,
            ])?;
        }
        Ok(())
    }
}
