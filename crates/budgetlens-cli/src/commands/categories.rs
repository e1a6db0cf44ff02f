//! Category taxonomy and rule commands

use anyhow::Result;
use budgetlens_core::{categorize::CategoryRule, Categorizer};

use super::truncate;

pub fn cmd_categories_list(categorizer: &Categorizer) -> Result<()> {
    let taxonomy = categorizer.taxonomy();

    println!();
    println!("🏷️  Categories ({})", taxonomy.len());
    println!("   ─────────────────────────────────────────────────────────────");
    for category in taxonomy.categories() {
        let marker = if category == taxonomy.fallback() {
            " (fallback)"
        } else {
            ""
        };
        match taxonomy.description(category) {
            Some(description) => println!("   • {}{} - {}", category, marker, description),
            None => println!("   • {}{}", category, marker),
        }
    }

    let rules = categorizer.rules();
    if !rules.is_empty() {
        println!();
        println!("📐 Rules ({}, highest priority first)", rules.len());
        println!("   ─────────────────────────────────────────────────────────────");
        for rule in rules {
            print_rule(rule);
        }
    }

    Ok(())
}

pub fn cmd_categories_test(
    categorizer: &Categorizer,
    description: &str,
    suggested: Option<&str>,
) -> Result<()> {
    let result = categorizer.categorize(description, suggested);

    println!();
    println!("🔍 \"{}\"", description);
    println!(
        "   → {} (via {}, confidence ×{:.1})",
        result.category,
        result.source,
        result.source.confidence_factor()
    );

    let matching: Vec<&CategoryRule> = categorizer
        .rules()
        .iter()
        .filter(|r| r.matches(description))
        .collect();
    if matching.is_empty() {
        println!("   No rules match");
    } else {
        println!("   Matching rules:");
        for rule in matching {
            print_rule(rule);
        }
    }

    Ok(())
}

fn print_rule(rule: &CategoryRule) {
    println!(
        "   [{:>3}] {:<14} {:<8} {}",
        rule.priority,
        rule.category.as_str(),
        rule.pattern_type.as_str(),
        truncate(&rule.pattern, 60)
    );
}
