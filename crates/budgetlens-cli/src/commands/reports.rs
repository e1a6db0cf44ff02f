//! Report command implementations (profile, budgets, insights, statements)

use anyhow::Result;
use budgetlens_core::{
    db::Database,
    models::{format_minor_units, BudgetStatus, Currency, InsightKind, Period, UserId},
    Error,
};

use super::{resolve_period, truncate};

/// Currency of the user's most recent statement
fn display_currency(db: &Database, user_id: &UserId) -> Result<Currency> {
    Ok(db
        .list_statements(user_id)?
        .into_iter()
        .next()
        .map(|s| s.currency)
        .unwrap_or_else(Currency::usd))
}

pub fn cmd_profile(db: &Database, user: &str, period: Option<&str>) -> Result<()> {
    let user_id = UserId::new(user);
    let period = resolve_period(db, &user_id, period)?;
    let currency = display_currency(db, &user_id)?;
    let profile = db.get_profile(&user_id, period)?;

    if profile.version == 0 {
        println!("No spending profile for {} in {}.", user_id, period);
        return Ok(());
    }

    let total = profile.total_spend();

    println!();
    println!("📊 Spending for {} in {}", user_id, period);
    println!("   ─────────────────────────────────────────────────────────────");
    for (category, amount) in &profile.totals_by_category {
        let share = if total > 0 {
            *amount as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        println!(
            "   {:<20} {:>14}  {:>5.1}%",
            category.as_str(),
            format_minor_units(*amount, &currency),
            share
        );
    }
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:<20} {:>14}",
        "Total spend",
        format_minor_units(total, &currency)
    );
    println!(
        "   {:<20} {:>14}",
        "Income",
        format_minor_units(profile.income_minor_units, &currency)
    );
    println!("   Transactions: {}", profile.transaction_count);

    Ok(())
}

pub fn cmd_budgets_list(db: &Database, user: &str, period: Option<&str>) -> Result<()> {
    let user_id = UserId::new(user);
    let period = resolve_period(db, &user_id, period)?;
    let currency = display_currency(db, &user_id)?;
    let suggestions = db.list_budget_suggestions(&user_id, period)?;

    if suggestions.is_empty() {
        println!("No budget suggestions for {} in {}.", user_id, period);
        return Ok(());
    }

    let profile = db.get_profile(&user_id, period)?;

    println!();
    println!("💰 Budgets for {} in {}", user_id, period);
    println!(
        "   {:<20} {:>14} {:>14}  {:<16} {}",
        "CATEGORY", "LIMIT", "SPENT", "BASIS", "STATUS"
    );
    println!("   {}", "─".repeat(78));

    for suggestion in &suggestions {
        let status = match suggestion.status {
            BudgetStatus::Proposed => "proposed",
            BudgetStatus::Accepted => "✓ accepted",
            BudgetStatus::Rejected => "✗ rejected",
        };
        println!(
            "   {:<20} {:>14} {:>14}  {:<16} {}",
            truncate(suggestion.category.as_str(), 20),
            format_minor_units(suggestion.suggested_limit_minor_units, &currency),
            format_minor_units(profile.total_for(&suggestion.category), &currency),
            suggestion.basis.as_str(),
            status
        );
    }

    let proposed = suggestions
        .iter()
        .filter(|s| s.status == BudgetStatus::Proposed)
        .count();
    if proposed > 0 {
        println!();
        println!(
            "   Accept with: budgetlens budgets accept -u {} -p {} <category>",
            user_id, period
        );
    }

    Ok(())
}

pub fn cmd_budgets_set(
    db: &Database,
    user: &str,
    category: &str,
    period: &str,
    status: BudgetStatus,
) -> Result<()> {
    let user_id = UserId::new(user);
    let period: Period = period.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    match db.set_budget_status(&user_id, category, period, status) {
        Ok(()) => {
            println!(
                "✅ {} budget for {} in {} marked {}",
                category, user_id, period, status
            );
            Ok(())
        }
        Err(Error::NotFound(_)) => Err(anyhow::anyhow!(
            "No budget suggestion for '{}' in {}. Run 'budgetlens budgets list -u {} -p {}'.",
            category,
            period,
            user_id,
            period
        )),
        Err(e) => Err(e.into()),
    }
}

pub fn cmd_insights(db: &Database, user: &str, period: Option<&str>) -> Result<()> {
    let user_id = UserId::new(user);
    let period = resolve_period(db, &user_id, period)?;
    let insights = db.list_insights(&user_id, period)?;

    if insights.is_empty() {
        println!("No insights for {} in {}.", user_id, period);
        return Ok(());
    }

    println!();
    println!("💡 Insights for {} in {}", user_id, period);
    println!("   ─────────────────────────────────────────────────────────────");
    for insight in &insights {
        let icon = match insight.kind {
            InsightKind::Overspend => "🚨",
            InsightKind::TrendUp => "📈",
            InsightKind::TrendDown => "📉",
            InsightKind::Compatibility => "🎯",
        };
        println!("   {} {}", icon, insight.message);
    }

    Ok(())
}

pub fn cmd_statements(db: &Database, user: &str) -> Result<()> {
    let user_id = UserId::new(user);
    let statements = db.list_statements(&user_id)?;

    if statements.is_empty() {
        println!("No statements ingested for {}.", user_id);
        return Ok(());
    }

    println!();
    println!("🧾 Statements for {}", user_id);
    println!(
        "   {:<12} {:<23} {:<12} {:>5} {:>8}  {}",
        "FINGERPRINT", "PERIOD", "ACCOUNT", "TXNS", "REJECTED", "INGESTED"
    );
    println!("   {}", "─".repeat(85));
    for statement in &statements {
        println!(
            "   {:<12} {} → {} {:<12} {:>5} {:>8}  {}",
            statement.fingerprint.short(),
            statement.period.start,
            statement.period.end,
            statement.account_kind.as_str(),
            statement.transaction_count,
            statement.rejected_count,
            statement.ingested_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}
