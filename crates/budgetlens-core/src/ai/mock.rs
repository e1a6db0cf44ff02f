//! Mock backend for testing
//!
//! By default it answers extraction prompts by reading the statement text
//! between `<statement>` tags, one `date | description | amount [| category]`
//! line per transaction, and answers cleaning prompts by echoing the text
//! between `<raw_statement>` tags. Tests can instead script responses, install
//! a handler, add latency, or make every call fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::LlmBackend;

type Handler = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

#[derive(Clone)]
enum Mode {
    LineParser,
    /// Queued responses; `Err` entries become upstream errors. Falls back to the
    /// line parser once drained.
    Scripted(Arc<Mutex<VecDeque<std::result::Result<String, String>>>>),
    Handler(Handler),
    Failing(String),
}

/// Mock LLM backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    mode: Mode,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy, line parser)
    pub fn new() -> Self {
        Self {
            healthy: true,
            mode: Mode::LineParser,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// Return the given responses in order, then fall back to the line parser
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = responses.into_iter().map(|r| Ok(r.into())).collect();
        Self {
            mode: Mode::Scripted(Arc::new(Mutex::new(queue))),
            ..Self::new()
        }
    }

    /// Fail the next `n` calls with an upstream error, then parse lines
    pub fn failing_first(n: usize) -> Self {
        let queue = (0..n)
            .map(|i| Err(format!("mock upstream failure {}", i + 1)))
            .collect();
        Self {
            mode: Mode::Scripted(Arc::new(Mutex::new(queue))),
            ..Self::new()
        }
    }

    /// Answer every call with `handler(prompt)`
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            mode: Mode::Handler(Arc::new(handler)),
            ..Self::new()
        }
    }

    /// Fail every call with an upstream error
    pub fn failing(message: &str) -> Self {
        Self {
            mode: Mode::Failing(message.to_string()),
            ..Self::new()
        }
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Create a new instance with a different model (no-op for mock)
    pub fn with_model(&self, _model: &str) -> Self {
        self.clone()
    }

    /// Number of `complete` calls made so far (shared between clones)
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(
        &self,
        prompt: &str,
        _schema_hint: Option<&serde_json::Value>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.mode {
            Mode::LineParser => Ok(answer(prompt)),
            Mode::Scripted(queue) => {
                let next = queue
                    .lock()
                    .map_err(|_| Error::InvalidData("Mock response queue poisoned".into()))?
                    .pop_front();
                match next {
                    Some(Ok(response)) => Ok(response),
                    Some(Err(message)) => Err(Error::InvalidData(message)),
                    None => Ok(answer(prompt)),
                }
            }
            Mode::Handler(handler) => handler(prompt),
            Mode::Failing(message) => Err(Error::InvalidData(message.clone())),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

fn answer(prompt: &str) -> String {
    match tagged_block(prompt, "<raw_statement>", "</raw_statement>") {
        Some(raw) => raw.trim_matches('\n').to_string(),
        None => lines_to_json(prompt),
    }
}

/// Turn `date | description | amount [| category]` lines inside the prompt's
/// `<statement>` block into a JSON array of candidate records
///
/// Lines with fewer than three fields are skipped, like headers a model would
/// ignore. Field values are passed through untouched.
pub(crate) fn lines_to_json(prompt: &str) -> String {
    let body = statement_block(prompt);
    let records: Vec<serde_json::Value> = body
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').map(str::trim).collect();
            if fields.len() < 3 {
                return None;
            }
            let category = fields
                .get(3)
                .filter(|c| !c.is_empty())
                .map(|c| serde_json::Value::String(c.to_string()))
                .unwrap_or(serde_json::Value::Null);
            Some(serde_json::json!({
                "date": fields[0],
                "description": fields[1],
                "amount": fields[2],
                "suggested_category": category,
            }))
        })
        .collect();

    serde_json::Value::Array(records).to_string()
}

fn statement_block(prompt: &str) -> &str {
    tagged_block(prompt, "<statement>", "</statement>").unwrap_or(prompt)
}

fn tagged_block<'a>(prompt: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = prompt.find(open)?;
    let body = &prompt[start + open.len()..];
    Some(match body.find(close) {
        Some(end) => &body[..end],
        None => body,
    })
}
