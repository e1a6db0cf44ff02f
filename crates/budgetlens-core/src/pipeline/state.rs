//! Run states and caller-visible outcomes

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::error::ExtractionFailure;
use crate::models::{Period, StatementId};
use crate::normalize::Rejection;

/// Stages of one ingestion run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Received,
    Extracted,
    Validated,
    Categorized,
    Aggregated,
    Completed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Extracted => "extracted",
            Self::Validated => "validated",
            Self::Categorized => "categorized",
            Self::Aggregated => "aggregated",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a run failed
///
/// Closed set with fixed messages; upstream error text is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    UnreadableStatement,
    Timeout,
    MalformedResponse,
    UpstreamError,
    Conflict,
    StorageError,
    InvalidInput,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnreadableStatement => "unreadable-statement",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed-response",
            Self::UpstreamError => "upstream-error",
            Self::Conflict => "conflict",
            Self::StorageError => "storage-error",
            Self::InvalidInput => "invalid-input",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::UnreadableStatement => {
                "The statement could not be read. It may be encrypted, corrupt or image-only."
            }
            Self::Timeout => "Transaction extraction timed out or was cancelled.",
            Self::MalformedResponse => "The extraction model did not return usable output.",
            Self::UpstreamError => "The extraction service is unavailable.",
            Self::Conflict => "The spending profile kept changing during the update. Try again.",
            Self::StorageError => "The ledger could not be updated.",
            Self::InvalidInput => "The statement produced inconsistent data.",
        }
    }
}

impl From<&ExtractionFailure> for FailureReason {
    fn from(failure: &ExtractionFailure) -> Self {
        match failure {
            ExtractionFailure::Timeout | ExtractionFailure::Cancelled => Self::Timeout,
            ExtractionFailure::MalformedResponse(_) => Self::MalformedResponse,
            ExtractionFailure::Upstream(_) => Self::UpstreamError,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-visible outcome of an ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestionStatus {
    Completed,
    CompletedWithRejections,
    /// Same statement already ingested for this user; nothing written
    AlreadyProcessed,
    /// Same statement is being ingested by another run
    InProgress,
    Failed {
        stage: RunStage,
        reason: FailureReason,
    },
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithRejections => "completed_with_rejections",
            Self::AlreadyProcessed => "already_processed",
            Self::InProgress => "in_progress",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithRejections)
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { stage, reason } => write!(f, "failed at {} ({})", stage, reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One stage transition in a run's trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub stage: RunStage,
    pub elapsed_ms: u64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub status: IngestionStatus,
    pub statement_id: Option<StatementId>,
    pub transactions_created: usize,
    pub insights_generated: usize,
    pub rejected_count: usize,
    pub rejected: Vec<Rejection>,
    /// Periods whose profiles were updated
    pub periods: Vec<Period>,
    pub trace: Vec<StageEvent>,
}

/// Accumulates a run's trace and counts
pub(crate) struct RunTrace {
    started: Instant,
    pub(crate) result: IngestionResult,
}

impl RunTrace {
    pub(crate) fn start() -> Self {
        let mut run = Self {
            started: Instant::now(),
            result: IngestionResult {
                status: IngestionStatus::InProgress,
                statement_id: None,
                transactions_created: 0,
                insights_generated: 0,
                rejected_count: 0,
                rejected: Vec::new(),
                periods: Vec::new(),
                trace: Vec::new(),
            },
        };
        run.reached(RunStage::Received, String::new());
        run
    }

    pub(crate) fn reached(&mut self, stage: RunStage, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(stage = stage.as_str(), detail = %detail, "Run stage reached");
        self.result.trace.push(StageEvent {
            stage,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            detail,
        });
    }

    pub(crate) fn finish(mut self, status: IngestionStatus) -> IngestionResult {
        self.result.status = status;
        self.result
    }

    /// Failed runs report no created rows
    pub(crate) fn fail(mut self, stage: RunStage, reason: FailureReason) -> IngestionResult {
        tracing::warn!(
            stage = stage.as_str(),
            reason = reason.as_str(),
            "Ingestion failed"
        );
        self.result.transactions_created = 0;
        self.result.insights_generated = 0;
        self.result.periods.clear();
        self.finish(IngestionStatus::Failed { stage, reason })
    }
}
