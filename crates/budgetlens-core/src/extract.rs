//! Extraction adapter
//!
//! Sends statement text to the model and parses what comes back into untrusted
//! `CandidateTransaction`s. Long statements are cut into page-aligned segments
//! that fit the model's context budget; segments run concurrently (bounded) and
//! their results are concatenated in document order. Any failing segment fails
//! the whole extraction.
//!
//! With cleaning enabled each segment first goes through a cheaper model that
//! strips boilerplate. A failed, timed out or empty cleaning answer keeps the
//! raw segment; cleaning never fails an extraction.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ai::parsing::parse_candidates;
use crate::ai::{AIClient, LlmBackend};
use crate::config::{CleaningConfig, ExtractionConfig};
use crate::error::{Error, ExtractionFailure, Result};
use crate::models::{CandidateTransaction, StatementContext};
use crate::prompts::Prompt;
use crate::text::PAGE_MARKER_PREFIX;

/// JSON schema for one candidate record
pub fn candidate_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "date": {"type": "string"},
            "description": {"type": "string"},
            "amount": {"type": "string"},
            "suggested_category": {"type": ["string", "null"]}
        },
        "required": ["date", "description", "amount"]
    })
}

/// JSON schema for the whole response, sent to backends as a decoding hint
pub fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "transactions": {"type": "array", "items": candidate_schema()}
        },
        "required": ["transactions"]
    })
}

/// Pre-extraction cleaning pass, routed to its own model
struct Cleaner {
    client: AIClient,
    prompt: Prompt,
    timeout: Duration,
}

impl Cleaner {
    async fn clean<'a>(&self, index: usize, segment: &'a str) -> Cow<'a, str> {
        let mut vars = HashMap::new();
        vars.insert("statement", segment);
        let prompt = self.prompt.render_combined(&vars);

        match tokio::time::timeout(self.timeout, self.client.complete(&prompt, None)).await {
            Ok(Ok(cleaned)) if !cleaned.trim().is_empty() => {
                debug!(
                    segment = index,
                    model = self.client.model(),
                    raw_chars = segment.len(),
                    cleaned_chars = cleaned.len(),
                    "Segment cleaned"
                );
                Cow::Owned(cleaned)
            }
            Ok(Ok(_)) => {
                warn!(segment = index, "Empty cleaning response, using raw text");
                Cow::Borrowed(segment)
            }
            Ok(Err(e)) => {
                warn!(segment = index, error = %e, "Cleaning failed, using raw text");
                Cow::Borrowed(segment)
            }
            Err(_) => {
                warn!(
                    segment = index,
                    timeout_secs = self.timeout.as_secs(),
                    "Cleaning timed out, using raw text"
                );
                Cow::Borrowed(segment)
            }
        }
    }
}

pub struct Extractor {
    client: AIClient,
    prompt: Prompt,
    cleaner: Option<Cleaner>,
    config: ExtractionConfig,
    /// Comma-separated taxonomy names offered to the model
    categories: String,
    item_schema: String,
    response_schema: serde_json::Value,
}

impl Extractor {
    pub fn new(client: AIClient, prompt: Prompt, config: ExtractionConfig, categories: String) -> Self {
        let item_schema = serde_json::to_string_pretty(&candidate_schema()).unwrap_or_default();
        Self {
            client,
            prompt,
            cleaner: None,
            config,
            categories,
            item_schema,
            response_schema: response_schema(),
        }
    }

    /// Run `prompt` on each segment before extraction when `cleaning.enabled`
    ///
    /// `cleaning.model` routes the pass to another model on the same backend.
    pub fn with_cleaning(mut self, prompt: Prompt, cleaning: &CleaningConfig) -> Self {
        if !cleaning.enabled {
            self.cleaner = None;
            return self;
        }
        let client = match &cleaning.model {
            Some(model) => self.client.with_model(model),
            None => self.client.clone(),
        };
        self.cleaner = Some(Cleaner {
            client,
            prompt,
            timeout: cleaning.timeout,
        });
        self
    }

    pub fn client(&self) -> &AIClient {
        &self.client
    }

    pub fn cleans(&self) -> bool {
        self.cleaner.is_some()
    }

    /// Max characters of statement text per model call
    pub fn segment_chars(&self) -> usize {
        self.config.token_budget.saturating_mul(self.config.chars_per_token)
    }

    /// Extract candidate transactions from statement text
    ///
    /// Fails with `Error::Extraction`; `cancel` aborts in-flight calls.
    pub async fn extract(
        &self,
        statement_text: &str,
        context: &StatementContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateTransaction>> {
        let segments = segment_text(statement_text, self.segment_chars());
        let total = segments.len();
        debug!(
            segments = total,
            chars = statement_text.len(),
            est_tokens = estimate_tokens(statement_text, self.config.chars_per_token),
            model = self.client.model(),
            "Extracting transactions"
        );

        let calls = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| self.extract_segment(index, total, segment, context));

        let work = stream::iter(calls)
            .buffered(self.config.max_concurrent_segments.max(1))
            .try_collect::<Vec<Vec<CandidateTransaction>>>();

        let per_segment = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ExtractionFailure::Cancelled.into());
            }
            result = work => result?,
        };

        Ok(per_segment.into_iter().flatten().collect())
    }

    async fn extract_segment(
        &self,
        index: usize,
        total: usize,
        segment: &str,
        context: &StatementContext,
    ) -> Result<Vec<CandidateTransaction>> {
        let segment = match &self.cleaner {
            Some(cleaner) => cleaner.clean(index, segment).await,
            None => Cow::Borrowed(segment),
        };
        let prompt = self.render(index, total, &segment, context);

        let call = self.client.complete(&prompt, Some(&self.response_schema));
        let response = match tokio::time::timeout(self.config.timeout, call).await {
            Err(_) => {
                warn!(segment = index, timeout_secs = self.config.timeout.as_secs(), "Model call timed out");
                return Err(ExtractionFailure::Timeout.into());
            }
            Ok(Err(Error::Extraction(failure))) => return Err(failure.into()),
            Ok(Err(e)) => {
                warn!(segment = index, error = %e, "Model call failed");
                return Err(ExtractionFailure::Upstream(e.to_string()).into());
            }
            Ok(Ok(response)) => response,
        };

        let candidates = parse_candidates(&response).inspect_err(|e| {
            warn!(segment = index, error = %e, "Unparseable model response");
        })?;
        debug!(segment = index, candidates = candidates.len(), "Segment extracted");
        Ok(candidates)
    }

    fn render(
        &self,
        index: usize,
        total: usize,
        segment: &str,
        context: &StatementContext,
    ) -> String {
        let start = context.period.start.to_string();
        let end = context.period.end.to_string();
        let part = if total > 1 {
            format!("{} of {}", index + 1, total)
        } else {
            String::new()
        };

        let mut vars = HashMap::new();
        vars.insert("statement", segment);
        vars.insert("period_start", start.as_str());
        vars.insert("period_end", end.as_str());
        vars.insert("currency", context.currency.code());
        vars.insert("segment", part.as_str());
        vars.insert("categories", self.categories.as_str());
        vars.insert("schema", self.item_schema.as_str());
        self.prompt.render_combined(&vars)
    }
}

/// Approximate token count: `ceil(chars / chars_per_token)`
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Cut statement text into non-overlapping segments of at most `max_chars`
///
/// Whole pages are packed greedily. A page larger than `max_chars` is split on
/// line boundaries; a single line larger than `max_chars` becomes its own
/// segment.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();

    for page in split_pages(text) {
        let page_len = page.chars().count();
        if page_len > max_chars {
            flush(&mut segments, &mut current);
            split_lines_into(&page, max_chars, &mut segments);
            continue;
        }
        if current.chars().count() + page_len > max_chars {
            flush(&mut segments, &mut current);
        }
        current.push_str(&page);
    }
    flush(&mut segments, &mut current);

    segments
}

fn flush(segments: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        segments.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Pages including their marker line; text before the first marker is its own page
fn split_pages(text: &str) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if line.starts_with(PAGE_MARKER_PREFIX) && !current.is_empty() {
            pages.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

fn split_lines_into(page: &str, max_chars: usize, segments: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0;
    for line in page.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            flush(segments, &mut current);
            current_len = 0;
        }
        current.push_str(line);
        current_len += line_len;
    }
    flush(segments, &mut current);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::ai::MockBackend;
    use crate::models::StatementPeriod;
    use crate::prompts::{PromptId, PromptLibrary};

    fn context() -> StatementContext {
        StatementContext::new(
            StatementPeriod::new(
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .unwrap(),
        )
    }

    fn extractor(mock: MockBackend, config: ExtractionConfig) -> Extractor {
        let prompt = PromptLibrary::embedded_only()
            .get(PromptId::ExtractTransactions)
            .unwrap()
            .clone();
        Extractor::new(AIClient::Mock(mock), prompt, config, "dining, groceries".into())
    }

    fn page(n: usize, rows: &[&str]) -> String {
        let mut s = format!("--- PAGE {} ---\n", n);
        for r in rows {
            s.push_str(r);
            s.push('\n');
        }
        s
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abcd", 4), 1);
        assert_eq!(estimate_tokens("abcde", 4), 2);
    }

    #[test]
    fn test_small_text_is_one_segment() {
        let text = format!("{}{}", page(1, &["a"]), page(2, &["b"]));
        assert_eq!(segment_text(&text, 1000), vec![text.clone()]);
    }

    #[test]
    fn test_segments_are_page_aligned() {
        let p1 = page(1, &["2024-03-01 | A | -1.00"; 3]);
        let p2 = page(2, &["2024-03-02 | B | -2.00"; 3]);
        let p3 = page(3, &["2024-03-03 | C | -3.00"; 3]);
        let text = format!("{}{}{}", p1, p2, p3);

        // Room for two pages but not three
        let max = p1.len() + p2.len();
        let segments = segment_text(&text, max);
        assert_eq!(segments, vec![format!("{}{}", p1, p2), p3.clone()]);
        // Non-overlapping and complete
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn test_oversized_page_splits_on_lines() {
        let rows: Vec<String> = (1..=10)
            .map(|i| format!("2024-03-{:02} | ROW {} | -1.00", i, i))
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let text = page(1, &refs);

        let segments = segment_text(&text, 80);
        assert!(segments.len() > 1);
        assert_eq!(segments.concat(), text);
        for segment in &segments {
            assert!(segment.chars().count() <= 80);
            assert!(segment.ends_with('\n'));
        }
    }

    #[tokio::test]
    async fn test_extract_concatenates_in_document_order() {
        let p1 = page(1, &["2024-03-01 | FIRST | -1.00"]);
        let p2 = page(2, &["2024-03-02 | SECOND | -2.00"]);
        let p3 = page(3, &["2024-03-03 | THIRD | -3.00"]);
        let text = format!("{}{}{}", p1, p2, p3);

        let mock = MockBackend::new().with_delay(Duration::from_millis(10));
        // One page per segment
        let config = ExtractionConfig {
            token_budget: p2.len(),
            chars_per_token: 1,
            max_concurrent_segments: 3,
            ..Default::default()
        };
        let extractor = extractor(mock.clone(), config);

        let out = extractor
            .extract(&text, &context(), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = out.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(names, vec!["FIRST", "SECOND", "THIRD"]);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_any_failing_segment_fails_extraction() {
        let p1 = page(1, &["2024-03-01 | FIRST | -1.00"]);
        let p2 = page(2, &["2024-03-02 | SECOND | -2.00"]);
        let text = format!("{}{}", p1, p2);

        let mock = MockBackend::scripted(["[]", "sorry, I can't do that"]);
        let config = ExtractionConfig {
            token_budget: p1.len().max(p2.len()),
            chars_per_token: 1,
            max_concurrent_segments: 1,
            ..Default::default()
        };
        let err = extractor(mock, config)
            .extract(&text, &context(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Extraction(ExtractionFailure::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_upstream_error_is_classified() {
        let err = extractor(MockBackend::failing("connection refused"), ExtractionConfig::default())
            .extract("2024-03-01 | A | -1.00", &context(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::Extraction(ExtractionFailure::Upstream(msg)) => {
                assert!(msg.contains("connection refused"))
            }
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = ExtractionConfig {
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let mock = MockBackend::new().with_delay(Duration::from_secs(5));
        let err = extractor(mock, config)
            .extract("2024-03-01 | A | -1.00", &context(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(ExtractionFailure::Timeout)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let mock = MockBackend::new().with_delay(Duration::from_secs(5));
        let extractor = extractor(mock, ExtractionConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = extractor
            .extract("2024-03-01 | A | -1.00", &context(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(ExtractionFailure::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    fn cleaning(model: Option<&str>) -> CleaningConfig {
        CleaningConfig {
            enabled: true,
            model: model.map(str::to_string),
            timeout: Duration::from_millis(200),
        }
    }

    fn cleaning_extractor(mock: MockBackend, cleaning: &CleaningConfig) -> Extractor {
        let prompt = PromptLibrary::embedded_only()
            .get(PromptId::CleanStatement)
            .unwrap()
            .clone();
        extractor(mock, ExtractionConfig::default()).with_cleaning(prompt, cleaning)
    }

    const STATEMENT_WITH_BOILERPLATE: &str = "If you think there is an error on your statement, write to us | on a separate sheet | -1.00\n\
         2024-03-01 | STARBUCKS | -5.75\n";

    #[tokio::test]
    async fn test_cleaned_text_is_extracted() {
        let mock = MockBackend::with_handler(|prompt| {
            if prompt.contains("<raw_statement>") {
                assert!(prompt.contains("write to us"));
                Ok("2024-03-01 | STARBUCKS | -5.75\n".to_string())
            } else {
                assert!(!prompt.contains("write to us"));
                Ok(crate::ai::mock::lines_to_json(prompt))
            }
        });
        let extractor = cleaning_extractor(mock.clone(), &cleaning(Some("llama3.2:3b")));
        assert!(extractor.cleans());

        let out = extractor
            .extract(STATEMENT_WITH_BOILERPLATE, &context(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].description, "STARBUCKS");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cleaning_failure_keeps_raw_text() {
        let mock = MockBackend::with_handler(|prompt| {
            if prompt.contains("<raw_statement>") {
                Err(Error::InvalidData("model not found".into()))
            } else {
                Ok(crate::ai::mock::lines_to_json(prompt))
            }
        });
        let out = cleaning_extractor(mock, &cleaning(None))
            .extract(STATEMENT_WITH_BOILERPLATE, &context(), &CancellationToken::new())
            .await
            .unwrap();
        // The boilerplate row survives because cleaning did not run
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_cleaning_answer_keeps_raw_text() {
        let mock = MockBackend::with_handler(|prompt| {
            if prompt.contains("<raw_statement>") {
                Ok("  \n".to_string())
            } else {
                Ok(crate::ai::mock::lines_to_json(prompt))
            }
        });
        let out = cleaning_extractor(mock, &cleaning(None))
            .extract("2024-03-01 | STARBUCKS | -5.75\n", &context(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_cleaning_times_out_to_raw_text() {
        let mock = MockBackend::new().with_delay(Duration::from_millis(300));
        let extractor = cleaning_extractor(mock.clone(), &cleaning(None));
        let out = extractor
            .extract("2024-03-01 | STARBUCKS | -5.75\n", &context(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_cleaning_disabled_by_config() {
        let disabled = CleaningConfig::default();
        let extractor = cleaning_extractor(MockBackend::new(), &disabled);
        assert!(!extractor.cleans());
    }

    #[tokio::test]
    async fn test_prompt_carries_period_and_taxonomy() {
        let mock = MockBackend::with_handler(|prompt| {
            assert!(prompt.contains("2024-03-01 to 2024-03-31"));
            assert!(prompt.contains("one of [dining, groceries]"));
            assert!(prompt.contains("\"suggested_category\""));
            Ok("[]".to_string())
        });
        let out = extractor(mock, ExtractionConfig::default())
            .extract("nothing here", &context(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
