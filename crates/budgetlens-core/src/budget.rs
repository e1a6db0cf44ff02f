//! Budget suggestion engine
//!
//! Suggests a monthly limit per category from a weighted trailing average of
//! spend. All arithmetic is integer so a higher spend never yields a lower
//! suggestion.

use std::collections::BTreeMap;

use crate::config::BudgetConfig;
use crate::models::{
    BudgetBasis, BudgetStatus, BudgetSuggestion, Category, Period, SpendingProfile, UserId,
};

const BPS_SCALE: u128 = 10_000;

/// The accepted budget in force for each category at `period`
///
/// An accepted budget stays active for later periods until a newer one is
/// accepted for the same category.
pub fn active_budgets<'a>(
    accepted: &'a [BudgetSuggestion],
    user_id: &UserId,
    period: Period,
) -> BTreeMap<&'a Category, &'a BudgetSuggestion> {
    let mut active: BTreeMap<&Category, &BudgetSuggestion> = BTreeMap::new();
    for budget in accepted {
        if budget.status != BudgetStatus::Accepted
            || &budget.user_id != user_id
            || budget.period > period
        {
            continue;
        }
        match active.get(&budget.category) {
            Some(current) if current.period >= budget.period => {}
            _ => {
                active.insert(&budget.category, budget);
            }
        }
    }
    active
}

/// Previous periods of the same user, most recent first
pub(crate) fn prior_profiles<'a>(
    profile: &SpendingProfile,
    history: &'a [SpendingProfile],
    limit: usize,
) -> Vec<&'a SpendingProfile> {
    let mut prior: Vec<&SpendingProfile> = history
        .iter()
        .filter(|h| h.user_id == profile.user_id && h.period < profile.period)
        .collect();
    prior.sort_by(|a, b| b.period.cmp(&a.period));
    prior.dedup_by_key(|h| h.period);
    prior.truncate(limit);
    prior
}

/// Propose budgets for the profile's period
///
/// Skips categories without spend and categories that already have an active
/// accepted budget. Output is sorted by category name.
pub fn suggest(
    profile: &SpendingProfile,
    history: &[SpendingProfile],
    accepted: &[BudgetSuggestion],
    config: &BudgetConfig,
) -> Vec<BudgetSuggestion> {
    let active = active_budgets(accepted, &profile.user_id, profile.period);
    let prior = prior_profiles(profile, history, config.weights.len().saturating_sub(1));

    let suggestions: Vec<BudgetSuggestion> = profile
        .totals_by_category
        .iter()
        .filter(|(category, total)| **total > 0 && !active.contains_key(category))
        .map(|(category, total)| {
            let series = std::iter::once(*total).chain(prior.iter().map(|p| p.total_for(category)));
            BudgetSuggestion {
                user_id: profile.user_id.clone(),
                category: category.clone(),
                period: profile.period,
                suggested_limit_minor_units: smoothed_limit(series, config),
                basis: BudgetBasis::ProfileDerived,
                status: BudgetStatus::Proposed,
            }
        })
        .collect();

    tracing::debug!(
        user_id = %profile.user_id,
        period = %profile.period,
        history = prior.len(),
        suggested = suggestions.len(),
        skipped_active = active.len(),
        "Suggested budgets"
    );

    suggestions
}

/// Weighted average (ceiling), plus headroom (ceiling), rounded up
///
/// `totals` is most recent first and pairs with `config.weights`.
fn smoothed_limit(totals: impl Iterator<Item = i64>, config: &BudgetConfig) -> i64 {
    let mut weighted: u128 = 0;
    let mut weight_sum: u128 = 0;
    for (total, weight) in totals.zip(config.weights.iter()) {
        weighted += total.max(0) as u128 * *weight as u128;
        weight_sum += *weight as u128;
    }
    if weight_sum == 0 {
        return 0;
    }

    let average = weighted.div_ceil(weight_sum);
    let with_headroom = (average * (BPS_SCALE + config.headroom_bps as u128)).div_ceil(BPS_SCALE);
    let step = config.rounding_minor_units.max(1) as u128;
    let rounded = with_headroom.div_ceil(step) * step;

    i64::try_from(rounded).unwrap_or(i64::MAX)
}
