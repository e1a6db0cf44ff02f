//! Budgetlens Core Library
//!
//! Statement-to-insight pipeline for personal budgeting:
//! - Statement text sources (PDF, plain text)
//! - LLM transaction extraction behind pluggable backends
//! - Validation and normalization of extracted candidates
//! - Rule-based categorization over a configurable taxonomy
//! - Spending profiles, budget suggestions and insights
//! - SQLite ledger with atomic per-run commits
//! - Ingestion orchestrator with retries, cancellation and per-period locking

pub mod aggregate;
pub mod ai;
pub mod budget;
pub mod categorize;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod insights;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod store;
pub mod text;

/// Test utilities including a mock LLM server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIClient, LlmBackend, MockBackend, OllamaBackend, OpenAICompatibleBackend};
pub use categorize::{Categorization, Categorizer, CategorySource, Taxonomy};
pub use config::{
    BudgetConfig, CleaningConfig, ExtractionConfig, InsightConfig, PipelineConfig, RetryConfig,
    ValidationConfig,
};
pub use db::Database;
pub use error::{Error, ExtractionFailure, Result};
pub use extract::Extractor;
pub use normalize::{NormalizeOutcome, Rejection, RejectionReason};
pub use pipeline::{FailureReason, IngestionResult, IngestionStatus, Pipeline, RunStage};
pub use prompts::{Prompt, PromptId, PromptLibrary};
pub use store::{IngestionBatch, LedgerStore, PeriodUpdate, StatementRecord};
