//! Spending profile aggregation
//!
//! `fold` is pure. Deciding which transactions are new for a profile is the
//! orchestrator's job (it tracks folded transaction ids per user and period).

use crate::error::{Error, Result};
use crate::models::{SpendingProfile, Transaction};

/// Fold new transactions into an existing profile
///
/// Outflows add their magnitude to the category total, inflows add to income.
/// Totals never decrease. The returned profile keeps the existing `version`;
/// the store bumps it when the fold is committed.
pub fn fold(existing: &SpendingProfile, new_transactions: &[Transaction]) -> Result<SpendingProfile> {
    let mut profile = existing.clone();
    let overflow = || {
        Error::InvalidData(format!(
            "Spending totals overflow for {} in {}",
            existing.user_id, existing.period
        ))
    };

    for txn in new_transactions {
        if txn.user_id != profile.user_id {
            return Err(Error::InvalidData(format!(
                "Transaction {} belongs to user {}, not {}",
                txn.id, txn.user_id, profile.user_id
            )));
        }
        if txn.period() != profile.period {
            return Err(Error::InvalidData(format!(
                "Transaction {} dated {} is outside period {}",
                txn.id, txn.date, profile.period
            )));
        }

        if txn.amount_minor_units < 0 {
            let total = profile
                .totals_by_category
                .entry(txn.category.clone())
                .or_insert(0);
            *total = total
                .checked_add(txn.spend_minor_units())
                .ok_or_else(overflow)?;
        } else {
            profile.income_minor_units = profile
                .income_minor_units
                .checked_add(txn.amount_minor_units)
                .ok_or_else(overflow)?;
        }
        profile.transaction_count += 1;
    }

    Ok(profile)
}
