//! Database tests

use chrono::{NaiveDate, Utc};

use super::*;
use crate::models::*;
use crate::store::{IngestionBatch, LedgerStore, PeriodUpdate, StatementRecord};

fn march() -> Period {
    Period::new(2024, 3).unwrap()
}

fn statement(user: &str, text: &str) -> StatementRecord {
    let user_id = UserId::new(user);
    let fingerprint = Fingerprint::of_text(text);
    StatementRecord {
        id: StatementId::derive(&user_id, &fingerprint),
        user_id,
        fingerprint,
        period: StatementPeriod::month(march()),
        currency: Currency::usd(),
        account_kind: AccountKind::Checking,
        transaction_count: 1,
        rejected_count: 0,
        ingested_at: Utc::now(),
    }
}

fn transaction(record: &StatementRecord, day: u32, amount: i64, category: &str) -> Transaction {
    let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
    Transaction {
        id: TransactionId::derive(&record.id, date, amount, category),
        user_id: record.user_id.clone(),
        statement_id: record.id.clone(),
        date,
        description: category.to_uppercase(),
        amount_minor_units: amount,
        currency: Currency::usd(),
        category: Category::new(category),
        source_confidence: 1.0,
    }
}

fn batch(
    record: StatementRecord,
    transactions: Vec<Transaction>,
    base: &SpendingProfile,
    suggestions: Vec<BudgetSuggestion>,
    insights: Vec<Insight>,
) -> IngestionBatch {
    let profile = crate::aggregate::fold(base, &transactions).unwrap();
    let folded = transactions.iter().map(|t| t.id.clone()).collect();
    IngestionBatch {
        statement: record,
        transactions,
        periods: vec![PeriodUpdate {
            profile,
            expected_version: base.version,
            folded,
            suggestions,
            insights,
        }],
    }
}

fn proposal(user: &str, category: &str, limit: i64) -> BudgetSuggestion {
    BudgetSuggestion {
        user_id: UserId::new(user),
        category: Category::new(category),
        period: march(),
        suggested_limit_minor_units: limit,
        basis: BudgetBasis::ProfileDerived,
        status: BudgetStatus::Proposed,
    }
}

#[test]
fn test_in_memory_db() {
    let db = Database::in_memory().unwrap();
    let user = UserId::new("alice");
    assert!(db.list_statements(&user).unwrap().is_empty());
    assert_eq!(db.get_profile(&user, march()).unwrap().version, 0);
}

#[test]
fn test_schema_tables_exist() {
    let db = Database::in_memory().unwrap();
    let conn = db.conn().unwrap();
    for table in [
        "statements",
        "transactions",
        "folded_transactions",
        "spending_profiles",
        "profile_totals",
        "budget_suggestions",
        "insights",
    ] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1, "missing table {}", table);
    }
}

#[test]
fn test_commit_ingestion_roundtrip() {
    let db = Database::in_memory().unwrap();
    let record = statement("alice", "statement one");
    let txns = vec![
        transaction(&record, 1, -575, "dining"),
        transaction(&record, 2, -575, "dining"),
        transaction(&record, 15, 250000, "income"),
    ];
    let base = db.load_profile(&record.user_id, march()).unwrap();
    let insight = Insight {
        user_id: record.user_id.clone(),
        period: march(),
        kind: InsightKind::Compatibility,
        category: None,
        severity: 0.0,
        message: "100% budget compatibility".into(),
    };
    db.commit_ingestion(&batch(
        record.clone(),
        txns,
        &base,
        vec![proposal("alice", "dining", 1500)],
        vec![insight.clone()],
    ))
    .unwrap();

    let found = db
        .find_statement(&record.user_id, &record.fingerprint)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, record.id);
    assert_eq!(found.period, record.period);

    let stored = db.list_statement_transactions(&record.id).unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].amount_minor_units, -575);
    assert_eq!(stored[2].category.as_str(), "income");

    let profile = db.load_profile(&record.user_id, march()).unwrap();
    assert_eq!(profile.version, 1);
    assert_eq!(profile.total_for(&Category::new("dining")), 1150);
    assert_eq!(profile.income_minor_units, 250000);
    assert_eq!(profile.transaction_count, 3);

    assert_eq!(
        db.folded_transaction_ids(&record.user_id, march()).unwrap().len(),
        3
    );
    assert_eq!(db.list_budget_suggestions(&record.user_id, march()).unwrap().len(), 1);
    assert_eq!(db.list_insights(&record.user_id, march()).unwrap(), vec![insight]);
}

#[test]
fn test_stale_version_conflicts_and_rolls_back() {
    let db = Database::in_memory().unwrap();
    let first = statement("alice", "first");
    let base = db.load_profile(&first.user_id, march()).unwrap();
    db.commit_ingestion(&batch(
        first.clone(),
        vec![transaction(&first, 1, -100, "dining")],
        &base,
        vec![],
        vec![],
    ))
    .unwrap();

    // Folded from the stale version 0 profile
    let second = statement("alice", "second");
    let err = db
        .commit_ingestion(&batch(
            second.clone(),
            vec![transaction(&second, 2, -200, "dining")],
            &base,
            vec![],
            vec![],
        ))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Nothing from the failed run is visible
    assert!(db
        .find_statement(&second.user_id, &second.fingerprint)
        .unwrap()
        .is_none());
    assert!(db.list_statement_transactions(&second.id).unwrap().is_empty());
    let profile = db.load_profile(&first.user_id, march()).unwrap();
    assert_eq!(profile.total_for(&Category::new("dining")), 100);
    assert_eq!(profile.version, 1);

    // Re-fold from the fresh version succeeds
    let fresh = db.load_profile(&first.user_id, march()).unwrap();
    db.commit_ingestion(&batch(
        second.clone(),
        vec![transaction(&second, 2, -200, "dining")],
        &fresh,
        vec![],
        vec![],
    ))
    .unwrap();
    let profile = db.load_profile(&first.user_id, march()).unwrap();
    assert_eq!(profile.total_for(&Category::new("dining")), 300);
    assert_eq!(profile.version, 2);
}

#[test]
fn test_duplicate_statement_commit_conflicts() {
    let db = Database::in_memory().unwrap();
    let record = statement("alice", "same text");
    let base = db.load_profile(&record.user_id, march()).unwrap();
    db.commit_ingestion(&batch(record.clone(), vec![], &base, vec![], vec![]))
        .unwrap();

    let fresh = db.load_profile(&record.user_id, march()).unwrap();
    let err = db
        .commit_ingestion(&batch(record, vec![], &fresh, vec![], vec![]))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_profile_history_order_and_isolation() {
    let db = Database::in_memory().unwrap();
    for (user, month, text) in [
        ("alice", 1, "a1"),
        ("alice", 2, "a2"),
        ("alice", 3, "a3"),
        ("bob", 2, "b2"),
    ] {
        let period = Period::new(2024, month).unwrap();
        let mut record = statement(user, text);
        record.period = StatementPeriod::month(period);
        let mut profile = SpendingProfile::empty(UserId::new(user), period);
        profile
            .totals_by_category
            .insert(Category::new("dining"), month as i64 * 1000);
        db.commit_ingestion(&IngestionBatch {
            statement: record,
            transactions: vec![],
            periods: vec![PeriodUpdate {
                profile,
                expected_version: 0,
                folded: vec![],
                suggestions: vec![],
                insights: vec![],
            }],
        })
        .unwrap();
    }

    let alice = UserId::new("alice");
    let history = db.load_profile_history(&alice, march(), 5).unwrap();
    let periods: Vec<String> = history.iter().map(|p| p.period.to_string()).collect();
    assert_eq!(periods, vec!["2024-02", "2024-01"]);
    assert_eq!(history[0].total_for(&Category::new("dining")), 2000);

    assert_eq!(db.load_profile_history(&alice, march(), 1).unwrap().len(), 1);
    assert_eq!(db.list_profile_periods(&alice).unwrap().len(), 3);
    assert!(db
        .load_profile(&UserId::new("carol"), march())
        .unwrap()
        .totals_by_category
        .is_empty());
}

#[test]
fn test_budget_status_and_accepted_listing() {
    let db = Database::in_memory().unwrap();
    let user = UserId::new("alice");
    db.upsert_budget_suggestion(&proposal("alice", "dining", 5000))
        .unwrap();
    db.upsert_budget_suggestion(&proposal("alice", "groceries", 20000))
        .unwrap();

    db.set_budget_status(&user, "groceries", march(), BudgetStatus::Accepted)
        .unwrap();
    db.set_budget_status(&user, "dining", march(), BudgetStatus::Rejected)
        .unwrap();

    let accepted = db.accepted_budgets(&user, march()).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].category.as_str(), "groceries");
    assert!(db
        .accepted_budgets(&user, Period::new(2024, 2).unwrap())
        .unwrap()
        .is_empty());

    let err = db
        .set_budget_status(&user, "travel", march(), BudgetStatus::Accepted)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_proposals_do_not_overwrite_user_decisions() {
    let db = Database::in_memory().unwrap();
    let user = UserId::new("alice");
    db.upsert_budget_suggestion(&proposal("alice", "groceries", 20000))
        .unwrap();
    db.set_budget_status(&user, "groceries", march(), BudgetStatus::Accepted)
        .unwrap();

    let record = statement("alice", "later upload");
    let base = db.load_profile(&user, march()).unwrap();
    db.commit_ingestion(&batch(
        record,
        vec![],
        &base,
        vec![proposal("alice", "groceries", 99999), proposal("alice", "dining", 1500)],
        vec![],
    ))
    .unwrap();

    let stored = db.list_budget_suggestions(&user, march()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].category.as_str(), "dining");
    assert_eq!(stored[0].status, BudgetStatus::Proposed);
    assert_eq!(stored[1].suggested_limit_minor_units, 20000);
    assert_eq!(stored[1].status, BudgetStatus::Accepted);
}

#[test]
fn test_insights_replaced_per_period() {
    let db = Database::in_memory().unwrap();
    let user = UserId::new("alice");
    let make = |message: &str| Insight {
        user_id: user.clone(),
        period: march(),
        kind: InsightKind::Overspend,
        category: Some(Category::new("dining")),
        severity: 1.5,
        message: message.to_string(),
    };

    let conn = db.conn().unwrap();
    Database::replace_insights_tx(&conn, &user, march(), &[make("first"), make("second")]).unwrap();
    Database::replace_insights_tx(&conn, &user, march(), &[make("third")]).unwrap();
    drop(conn);

    let stored = db.list_insights(&user, march()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message, "third");
}
