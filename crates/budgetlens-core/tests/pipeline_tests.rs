//! Integration tests for the ingestion pipeline
//!
//! These drive whole runs against an in-memory ledger and a mock model that
//! reads `date | description | amount` lines back out of the prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use budgetlens_core::{
    error::{Error, Result},
    models::{
        AccountKind, BudgetBasis, BudgetStatus, BudgetSuggestion, Category, Fingerprint,
        InsightKind, Period, SpendingProfile, StatementContext, StatementPeriod, TransactionId,
        UserId,
    },
    AIClient, Categorizer, Database, FailureReason, IngestionBatch, IngestionResult,
    IngestionStatus, LedgerStore, MockBackend, Pipeline, PipelineConfig, RejectionReason,
    RunStage, StatementRecord,
};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

fn march() -> Period {
    Period::new(2024, 3).unwrap()
}

fn march_statement() -> StatementContext {
    StatementContext::new(StatementPeriod::month(march()))
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.backoff = Duration::from_millis(1);
    config
}

fn pipeline_with(store: Arc<dyn LedgerStore>, mock: &MockBackend, config: PipelineConfig) -> Pipeline {
    Pipeline::with_config(store, AIClient::Mock(mock.clone()), config).unwrap()
}

fn setup(mock: &MockBackend) -> (Arc<Database>, Pipeline) {
    let db = Arc::new(Database::in_memory().expect("Failed to create in-memory database"));
    let pipeline = pipeline_with(db.clone(), mock, test_config());
    (db, pipeline)
}

fn dining() -> Category {
    Categorizer::embedded()
        .unwrap()
        .taxonomy()
        .get("dining")
        .unwrap()
        .clone()
}

async fn ingest(pipeline: &Pipeline, user: &UserId, text: &str) -> IngestionResult {
    pipeline
        .ingest_statement(user, text.as_bytes(), &march_statement(), &CancellationToken::new())
        .await
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_ingest_statement_end_to_end() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let text = "ACME BANK CHECKING\n\
                2024-03-01 | STARBUCKS #1234 | -5.75\n\
                2024-03-08 | STARBUCKS #1234 | -5.75\n\
                2024-03-15 | ACME PAYROLL | 2,500.00\n";
    let result = ingest(&pipeline, &user, text).await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.transactions_created, 3);
    assert_eq!(result.rejected_count, 0);
    assert_eq!(result.periods, vec![march()]);
    assert_eq!(mock.call_count(), 1);

    let stages: Vec<RunStage> = result.trace.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            RunStage::Received,
            RunStage::Extracted,
            RunStage::Validated,
            RunStage::Categorized,
            RunStage::Aggregated,
            RunStage::Completed,
        ]
    );

    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.version, 1);
    assert_eq!(profile.total_for(&dining()), 1150);
    assert_eq!(profile.income_minor_units, 250000);
    assert_eq!(profile.transaction_count, 3);

    let statement_id = result.statement_id.unwrap();
    let stored = db.list_statement_transactions(&statement_id).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|t| t.statement_id == statement_id));
    let payroll = stored.iter().find(|t| t.amount_minor_units > 0).unwrap();
    assert_eq!(payroll.category.as_str(), "income");

    // 1150 + 10% headroom = 1265, rounded up to 1500
    let suggestions = db.list_budget_suggestions(&user, march()).unwrap();
    let dining_budget = suggestions
        .iter()
        .find(|s| s.category == dining())
        .unwrap();
    assert_eq!(dining_budget.suggested_limit_minor_units, 1500);
    assert_eq!(dining_budget.status, BudgetStatus::Proposed);
    assert_eq!(dining_budget.basis, BudgetBasis::ProfileDerived);
}

#[tokio::test]
async fn test_duplicate_lines_are_rejected_not_counted() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let text = "2024-03-01 | STARBUCKS #1234 | -5.75\n\
                2024-03-01 | STARBUCKS #1234 | -5.75\n\
                not a date | MYSTERY | -1.00\n";
    let result = ingest(&pipeline, &user, text).await;

    assert_eq!(result.status, IngestionStatus::CompletedWithRejections);
    assert_eq!(result.transactions_created, 1);
    assert_eq!(result.rejected_count, 2);
    let reasons: Vec<RejectionReason> = result.rejected.iter().map(|r| r.reason).collect();
    assert!(reasons.contains(&RejectionReason::Duplicate));
    assert!(reasons.contains(&RejectionReason::BadDate));

    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.total_for(&dining()), 575);
    assert_eq!(profile.transaction_count, 1);
}

#[tokio::test]
async fn test_lines_differing_only_in_case_are_both_kept() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let text = "2024-03-01 | Starbucks | -5.75\n\
                2024-03-01 | STARBUCKS | -5.75\n";
    let result = ingest(&pipeline, &user, text).await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.transactions_created, 2);
    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.total_for(&dining()), 1150);
    assert_eq!(profile.transaction_count, 2);
}

#[tokio::test]
async fn test_reingest_is_already_processed() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let text = "2024-03-01 | STARBUCKS | -5.75\n";

    let first = ingest(&pipeline, &user, text).await;
    assert_eq!(first.status, IngestionStatus::Completed);

    let second = ingest(&pipeline, &user, text).await;
    assert_eq!(second.status, IngestionStatus::AlreadyProcessed);
    assert_eq!(second.transactions_created, 0);
    assert_eq!(second.statement_id, first.statement_id);

    // No second model call, no second fold
    assert_eq!(mock.call_count(), 1);
    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.version, 1);
    assert_eq!(profile.total_for(&dining()), 575);
    assert_eq!(db.count_transactions(&user).unwrap(), 1);
}

#[tokio::test]
async fn test_same_statement_different_users_is_independent() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let text = "2024-03-01 | STARBUCKS | -5.75\n";

    let alice = ingest(&pipeline, &UserId::new("alice"), text).await;
    let bob = ingest(&pipeline, &UserId::new("bob"), text).await;

    assert_eq!(alice.status, IngestionStatus::Completed);
    assert_eq!(bob.status, IngestionStatus::Completed);
    assert_ne!(alice.statement_id, bob.statement_id);
    assert_eq!(
        db.load_profile(&UserId::new("bob"), march())
            .unwrap()
            .total_for(&dining()),
        575
    );
}

#[tokio::test]
async fn test_credit_card_signs() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let context = march_statement().with_account_kind(AccountKind::CreditCard);

    let text = "03/03/2024 | STARBUCKS | 5.75\n\
                03/10/2024 | PAYMENT THANK YOU | 500.00 CR\n";
    let result = pipeline
        .ingest_statement(&user, text.as_bytes(), &context, &CancellationToken::new())
        .await;
    assert_eq!(result.status, IngestionStatus::Completed);

    let stored = db
        .list_statement_transactions(result.statement_id.as_ref().unwrap())
        .unwrap();
    let coffee = stored.iter().find(|t| t.description == "STARBUCKS").unwrap();
    assert_eq!(coffee.amount_minor_units, -575);
    let payment = stored
        .iter()
        .find(|t| t.description == "PAYMENT THANK YOU")
        .unwrap();
    assert_eq!(payment.amount_minor_units, 50000);
    assert_eq!(payment.category.as_str(), "transfers");

    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.total_for(&dining()), 575);
}

#[tokio::test]
async fn test_statement_spanning_two_months_updates_both_periods() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let context = StatementContext::new(
        StatementPeriod::new(
            NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
        )
        .unwrap(),
    );

    let text = "2024-02-20 | STARBUCKS | -10.00\n\
                2024-03-05 | STARBUCKS | -30.00\n";
    let result = pipeline
        .ingest_statement(&user, text.as_bytes(), &context, &CancellationToken::new())
        .await;

    let february = Period::new(2024, 2).unwrap();
    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.periods, vec![february, march()]);
    assert_eq!(
        db.load_profile(&user, february).unwrap().total_for(&dining()),
        1000
    );
    assert_eq!(db.load_profile(&user, march()).unwrap().total_for(&dining()), 3000);

    // February counts as March's history within the same run
    let insights = db.list_insights(&user, march()).unwrap();
    assert!(insights
        .iter()
        .any(|i| i.kind == InsightKind::TrendUp && i.category.as_ref() == Some(&dining())));
}

#[tokio::test]
async fn test_empty_statement_still_recorded() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "No activity this period\n").await;
    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.transactions_created, 0);
    assert!(result.periods.is_empty());
    assert_eq!(db.list_statements(&user).unwrap().len(), 1);

    let again = ingest(&pipeline, &user, "No activity this period\n").await;
    assert_eq!(again.status, IngestionStatus::AlreadyProcessed);
}

// =============================================================================
// Budgets and insights
// =============================================================================

#[tokio::test]
async fn test_overspend_against_accepted_budget() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let groceries = Categorizer::embedded()
        .unwrap()
        .taxonomy()
        .get("groceries")
        .unwrap()
        .clone();

    db.upsert_budget_suggestion(&BudgetSuggestion {
        user_id: user.clone(),
        category: groceries.clone(),
        period: march(),
        suggested_limit_minor_units: 20000,
        basis: BudgetBasis::ProfileDerived,
        status: BudgetStatus::Proposed,
    })
    .unwrap();
    db.set_budget_status(&user, "groceries", march(), BudgetStatus::Accepted)
        .unwrap();

    let result = ingest(&pipeline, &user, "2024-03-05 | WHOLE FOODS MARKET | -250.00\n").await;
    assert_eq!(result.status, IngestionStatus::Completed);
    assert!(result.insights_generated >= 2);

    let insights = db.list_insights(&user, march()).unwrap();
    let first = &insights[0];
    assert_eq!(first.kind, InsightKind::Overspend);
    assert_eq!(first.category.as_ref(), Some(&groceries));
    assert!((first.severity - 1.25).abs() < 1e-9);

    let compatibility = insights
        .iter()
        .find(|i| i.kind == InsightKind::Compatibility)
        .unwrap();
    assert!((compatibility.severity - 1.0).abs() < 1e-9);

    // The accepted budget is neither re-proposed nor overwritten
    let budgets = db.list_budget_suggestions(&user, march()).unwrap();
    assert_eq!(budgets.len(), 1);
    assert_eq!(budgets[0].status, BudgetStatus::Accepted);
    assert_eq!(budgets[0].suggested_limit_minor_units, 20000);
}

#[tokio::test]
async fn test_month_over_month_trend() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let february = StatementContext::new(StatementPeriod::month(Period::new(2024, 2).unwrap()));

    let feb = pipeline
        .ingest_statement(
            &user,
            b"2024-02-10 | STARBUCKS | -100.00\n",
            &february,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(feb.status, IngestionStatus::Completed);

    let mar = ingest(&pipeline, &user, "2024-03-10 | STARBUCKS | -200.00\n").await;
    assert_eq!(mar.status, IngestionStatus::Completed);

    let insights = db.list_insights(&user, march()).unwrap();
    let trend = insights
        .iter()
        .find(|i| i.kind == InsightKind::TrendUp)
        .unwrap();
    assert_eq!(trend.category.as_ref(), Some(&dining()));
    assert!((trend.severity - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_insight_order_is_deterministic() {
    let text = "2024-03-01 | STARBUCKS | -50.00\n\
                2024-03-02 | WHOLE FOODS | -80.00\n\
                2024-03-03 | SHELL OIL | -40.00\n";

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mock = MockBackend::new();
        let (db, pipeline) = setup(&mock);
        let user = UserId::new("alice");
        let february = StatementContext::new(StatementPeriod::month(Period::new(2024, 2).unwrap()));
        pipeline
            .ingest_statement(
                &user,
                b"2024-02-01 | STARBUCKS | -20.00\n2024-02-02 | WHOLE FOODS | -20.00\n2024-02-03 | SHELL OIL | -20.00\n",
                &february,
                &CancellationToken::new(),
            )
            .await;
        ingest(&pipeline, &user, text).await;
        runs.push(db.list_insights(&user, march()).unwrap());
    }

    assert!(!runs[0].is_empty());
    assert_eq!(runs[0], runs[1]);
    for pair in runs[0].windows(2) {
        assert!(pair[0].severity >= pair[1].severity);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_same_statement_runs_once() {
    let mock = MockBackend::new().with_delay(Duration::from_millis(100));
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let text = "2024-03-01 | STARBUCKS | -5.75\n";

    let (a, b) = tokio::join!(ingest(&pipeline, &user, text), ingest(&pipeline, &user, text));

    let mut statuses = vec![a.status, b.status];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(
        statuses,
        vec![IngestionStatus::Completed, IngestionStatus::InProgress]
    );
    assert_eq!(mock.call_count(), 1);
    assert_eq!(db.load_profile(&user, march()).unwrap().total_for(&dining()), 575);
}

#[tokio::test]
async fn test_concurrent_statements_same_period_both_fold() {
    let mock = MockBackend::new().with_delay(Duration::from_millis(50));
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let (a, b) = tokio::join!(
        ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n"),
        ingest(&pipeline, &user, "2024-03-02 | CHIPOTLE | -12.25\n"),
    );
    assert_eq!(a.status, IngestionStatus::Completed);
    assert_eq!(b.status, IngestionStatus::Completed);

    let profile = db.load_profile(&user, march()).unwrap();
    assert_eq!(profile.total_for(&dining()), 1800);
    assert_eq!(profile.transaction_count, 2);
    assert_eq!(profile.version, 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline
        .ingest_statement(
            &user,
            b"2024-03-01 | STARBUCKS | -5.75\n",
            &march_statement(),
            &cancel,
        )
        .await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Extracted,
            reason: FailureReason::Timeout,
        }
    );
    assert_eq!(result.transactions_created, 0);
    assert!(db.list_statements(&user).unwrap().is_empty());
    assert_eq!(db.load_profile(&user, march()).unwrap().version, 0);
}

#[tokio::test]
async fn test_model_timeout_retries_then_fails() {
    let mock = MockBackend::new().with_delay(Duration::from_millis(500));
    let db = Arc::new(Database::in_memory().unwrap());
    let mut config = test_config();
    config.extraction.timeout = Duration::from_millis(20);
    let pipeline = pipeline_with(db.clone(), &mock, config.clone());
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Extracted,
            reason: FailureReason::Timeout,
        }
    );
    assert_eq!(
        mock.call_count(),
        config.retry.max_upstream_retries as usize + 1
    );
    assert!(db.list_statements(&user).unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_upstream_failure_is_retried() {
    let mock = MockBackend::failing_first(1);
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(mock.call_count(), 2);
    assert_eq!(db.load_profile(&user, march()).unwrap().total_for(&dining()), 575);
}

#[tokio::test]
async fn test_persistent_upstream_failure() {
    let mock = MockBackend::failing("connection refused");
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Extracted,
            reason: FailureReason::UpstreamError,
        }
    );
    assert_eq!(mock.call_count(), 3);
    assert!(db.list_statements(&user).unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_responses_fail_extraction() {
    let mock = MockBackend::scripted(["not json", "still not json", "Sorry, I can't help"]);
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Extracted,
            reason: FailureReason::MalformedResponse,
        }
    );
    assert_eq!(
        result.status.to_string(),
        "failed at extracted (malformed-response)"
    );
    assert!(db.list_statements(&user).unwrap().is_empty());
}

#[tokio::test]
async fn test_unreadable_pdf_fails_before_extraction() {
    let mock = MockBackend::new();
    let (db, pipeline) = setup(&mock);
    let user = UserId::new("alice");

    let result = pipeline
        .ingest_statement(
            &user,
            b"%PDF-1.4 this is not really a pdf",
            &march_statement(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Received,
            reason: FailureReason::UnreadableStatement,
        }
    );
    assert_eq!(mock.call_count(), 0);
    assert!(db.list_statements(&user).unwrap().is_empty());
}

/// Ledger that reports a version conflict on the first `conflicts` commits
struct FaultyStore {
    inner: Arc<Database>,
    conflicts: usize,
    broken_lookup: bool,
    commits: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: Arc<Database>, conflicts: usize) -> Self {
        Self {
            inner,
            conflicts,
            broken_lookup: false,
            commits: AtomicUsize::new(0),
        }
    }

    fn with_broken_lookup(inner: Arc<Database>) -> Self {
        Self {
            broken_lookup: true,
            ..Self::new(inner, 0)
        }
    }
}

impl LedgerStore for FaultyStore {
    fn find_statement(
        &self,
        user_id: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StatementRecord>> {
        if self.broken_lookup {
            return Err(Error::InvalidData("database is locked".into()));
        }
        self.inner.find_statement(user_id, fingerprint)
    }

    fn load_profile(&self, user_id: &UserId, period: Period) -> Result<SpendingProfile> {
        self.inner.load_profile(user_id, period)
    }

    fn load_profile_history(
        &self,
        user_id: &UserId,
        before: Period,
        limit: usize,
    ) -> Result<Vec<SpendingProfile>> {
        self.inner.load_profile_history(user_id, before, limit)
    }

    fn folded_transaction_ids(
        &self,
        user_id: &UserId,
        period: Period,
    ) -> Result<std::collections::HashSet<TransactionId>> {
        self.inner.folded_transaction_ids(user_id, period)
    }

    fn accepted_budgets(&self, user_id: &UserId, upto: Period) -> Result<Vec<BudgetSuggestion>> {
        self.inner.accepted_budgets(user_id, upto)
    }

    fn commit_ingestion(&self, batch: &IngestionBatch) -> Result<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst);
        if n < self.conflicts {
            return Err(Error::Conflict("profile version changed".into()));
        }
        self.inner.commit_ingestion(batch)
    }
}

#[tokio::test]
async fn test_profile_conflict_is_retried() {
    let mock = MockBackend::new();
    let db = Arc::new(Database::in_memory().unwrap());
    let store = Arc::new(FaultyStore::new(db.clone(), 1));
    let pipeline = pipeline_with(store.clone(), &mock, test_config());
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(store.commits.load(Ordering::SeqCst), 2);
    // Extraction is not repeated for a storage conflict
    assert_eq!(mock.call_count(), 1);
    assert_eq!(db.load_profile(&user, march()).unwrap().total_for(&dining()), 575);
}

#[tokio::test]
async fn test_profile_conflict_gives_up() {
    let mock = MockBackend::new();
    let db = Arc::new(Database::in_memory().unwrap());
    let store = Arc::new(FaultyStore::new(db.clone(), usize::MAX));
    let config = test_config();
    let pipeline = pipeline_with(store.clone(), &mock, config.clone());
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Aggregated,
            reason: FailureReason::Conflict,
        }
    );
    assert_eq!(
        store.commits.load(Ordering::SeqCst),
        config.retry.max_conflict_retries as usize + 1
    );
    assert!(db.list_statements(&user).unwrap().is_empty());
    assert_eq!(db.load_profile(&user, march()).unwrap().version, 0);
}

#[tokio::test]
async fn test_storage_error_before_extraction_fails_at_received() {
    let mock = MockBackend::new();
    let db = Arc::new(Database::in_memory().unwrap());
    let store = Arc::new(FaultyStore::with_broken_lookup(db.clone()));
    let pipeline = pipeline_with(store, &mock, test_config());
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(
        result.status,
        IngestionStatus::Failed {
            stage: RunStage::Received,
            reason: FailureReason::StorageError,
        }
    );
    assert_eq!(mock.call_count(), 0);
    assert!(db.list_statements(&user).unwrap().is_empty());
}

// =============================================================================
// Cleaning pre-pass
// =============================================================================

#[tokio::test]
async fn test_cleaning_pass_runs_before_extraction() {
    let mock = MockBackend::new();
    let db = Arc::new(Database::in_memory().unwrap());
    let mut config = test_config();
    config.cleaning.enabled = true;
    config.cleaning.model = Some("llama3.2:3b".into());
    let pipeline = pipeline_with(db.clone(), &mock, config);
    let user = UserId::new("alice");

    let result = ingest(&pipeline, &user, "2024-03-01 | STARBUCKS #1234 | -5.75\n").await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.transactions_created, 1);
    // One cleaning call and one extraction call
    assert_eq!(mock.call_count(), 2);
    assert_eq!(db.load_profile(&user, march()).unwrap().total_for(&dining()), 575);
}

#[tokio::test]
async fn test_failed_cleaning_does_not_fail_the_run() {
    let mock = MockBackend::with_handler(|prompt| {
        if prompt.contains("<raw_statement>") {
            Err(Error::InvalidData("cleaning model unavailable".into()))
        } else {
            Ok(r#"[{"date": "2024-03-01", "description": "STARBUCKS", "amount": "-5.75"}]"#.into())
        }
    });
    let db = Arc::new(Database::in_memory().unwrap());
    let mut config = test_config();
    config.cleaning.enabled = true;
    let pipeline = pipeline_with(db.clone(), &mock, config);

    let result = ingest(&pipeline, &UserId::new("alice"), "2024-03-01 | STARBUCKS | -5.75\n").await;

    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.transactions_created, 1);
    assert_eq!(mock.call_count(), 2);
}
