//! Insight generation
//!
//! Compares a period's spending profile against accepted budgets and recent
//! history. Pure; the orchestrator persists the output, replacing whatever was
//! stored for the period.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::budget::{active_budgets, prior_profiles};
use crate::config::InsightConfig;
use crate::models::{
    format_minor_units, BudgetSuggestion, Category, Currency, Insight, InsightKind,
    SpendingProfile,
};

/// Generate insights for one (user, period)
///
/// Sorted by severity (highest first), then category name with the
/// category-less compatibility insight first, then kind.
pub fn generate(
    profile: &SpendingProfile,
    accepted: &[BudgetSuggestion],
    history: &[SpendingProfile],
    config: &InsightConfig,
    currency: &Currency,
) -> Vec<Insight> {
    let mut insights = Vec::new();
    let active = active_budgets(accepted, &profile.user_id, profile.period);

    // Overspend
    for (category, budget) in &active {
        let limit = budget.suggested_limit_minor_units;
        let total = profile.total_for(category);
        if limit > 0 && total > limit {
            let ratio = total as f64 / limit as f64;
            insights.push(insight(
                profile,
                InsightKind::Overspend,
                Some((*category).clone()),
                ratio,
                format!(
                    "Spent {} {} on {} against a budget of {} ({:.0}% of budget)",
                    format_minor_units(total, currency),
                    currency,
                    category,
                    format_minor_units(limit, currency),
                    ratio * 100.0
                ),
            ));
        }
    }

    // Trends against the trailing average
    let prior = prior_profiles(profile, history, config.trend_lookback);
    if !prior.is_empty() {
        let categories: BTreeSet<&Category> = profile
            .totals_by_category
            .keys()
            .chain(prior.iter().flat_map(|p| p.totals_by_category.keys()))
            .collect();

        for category in categories {
            // i128 cannot overflow on a handful of i64 totals
            let baseline_sum: i128 = prior
                .iter()
                .map(|p| i128::from(p.total_for(category)))
                .sum();
            let baseline = baseline_sum as f64 / prior.len() as f64;
            if baseline < config.min_baseline_minor_units as f64 || baseline <= 0.0 {
                continue;
            }

            let current = profile.total_for(category);
            let change = (current as f64 - baseline) / baseline;
            if change.abs() <= config.trend_threshold {
                continue;
            }

            let (kind, direction) = if change > 0.0 {
                (InsightKind::TrendUp, "up")
            } else {
                (InsightKind::TrendDown, "down")
            };
            insights.push(insight(
                profile,
                kind,
                Some(category.clone()),
                change.abs(),
                format!(
                    "{} spending is {} {:.0}% versus the {}-month average ({} vs {} {})",
                    category,
                    direction,
                    change.abs() * 100.0,
                    prior.len(),
                    format_minor_units(current, currency),
                    format_minor_units(baseline.round() as i64, currency),
                    currency
                ),
            ));
        }
    }

    // How well the period fits the accepted budgets
    if !active.is_empty() {
        let within = active
            .iter()
            .filter(|(category, budget)| {
                profile.total_for(category) <= budget.suggested_limit_minor_units
            })
            .count();
        let score = within as f64 / active.len() as f64;
        insights.push(insight(
            profile,
            InsightKind::Compatibility,
            None,
            1.0 - score,
            format!(
                "{:.0}% budget compatibility: {} of {} budgeted categories within limit",
                score * 100.0,
                within,
                active.len()
            ),
        ));
    }

    insights.sort_by(compare);

    tracing::debug!(
        user_id = %profile.user_id,
        period = %profile.period,
        count = insights.len(),
        "Generated insights"
    );

    insights
}

fn insight(
    profile: &SpendingProfile,
    kind: InsightKind,
    category: Option<Category>,
    severity: f64,
    message: String,
) -> Insight {
    Insight {
        user_id: profile.user_id.clone(),
        period: profile.period,
        kind,
        category,
        severity,
        message,
    }
}

/// Severity desc, then category asc (none first), then kind
pub(crate) fn compare(a: &Insight, b: &Insight) -> Ordering {
    b.severity
        .total_cmp(&a.severity)
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.kind.cmp(&b.kind))
}
