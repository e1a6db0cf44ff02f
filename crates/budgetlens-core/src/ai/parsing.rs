//! JSON parsing helpers for model responses
//!
//! Models wrap JSON in prose or code fences, and sometimes return an object
//! wrapper instead of a bare array. These helpers locate the payload and turn
//! each element into a `CandidateTransaction` without judging field values;
//! that is the normalizer's job.

use serde_json::{Map, Value};

use crate::error::{Error, ExtractionFailure, Result};
use crate::models::CandidateTransaction;

const RAW_EXCERPT_CHARS: usize = 200;

/// Parse a model response into candidate transactions
///
/// Tried in order: the whole response as JSON, the first fenced code block, the
/// first balanced `[...]`, the first balanced `{...}`. The JSON must be an array
/// or an object with a `transactions` array.
pub fn parse_candidates(response: &str) -> Result<Vec<CandidateTransaction>> {
    let response = response.trim();

    let value = locate_json(response).ok_or_else(|| malformed("No JSON found", response))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("transactions") {
            Some(Value::Array(items)) => items,
            _ => return Err(malformed("JSON object has no transactions array", response)),
        },
        _ => return Err(malformed("JSON is not an array", response)),
    };

    Ok(items.iter().map(candidate_from_value).collect())
}

fn malformed(reason: &str, raw: &str) -> Error {
    let truncated: String = raw.chars().take(RAW_EXCERPT_CHARS).collect();
    let suffix = if raw.chars().count() > RAW_EXCERPT_CHARS {
        "..."
    } else {
        ""
    };
    Error::Extraction(ExtractionFailure::MalformedResponse(format!(
        "{} | Raw: {}{}",
        reason, truncated, suffix
    )))
}

fn locate_json(response: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response) {
        return Some(value);
    }

    if let Some(block) = fenced_block(response) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(slice) = balanced_slice(response, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(slice) {
                return Some(value);
            }
        }
    }

    None
}

/// Body of the first ``` fenced block (language tag stripped)
fn fenced_block(response: &str) -> Option<&str> {
    let start = response.find("```")?;
    let after = &response[start + 3..];
    // Skip an optional language tag such as `json`
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First `open ... close` span with balanced nesting, ignoring brackets inside strings
fn balanced_slice(response: &str, open: char, close: char) -> Option<&str> {
    let start = response.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in response[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

fn candidate_from_value(value: &Value) -> CandidateTransaction {
    let Value::Object(map) = value else {
        // Keep it so the normalizer reports it instead of dropping it silently
        return CandidateTransaction {
            description: field_text(Some(value)),
            ..Default::default()
        };
    };

    let suggested_category = pick(map, &["suggested_category", "category"])
        .map(|v| field_text(Some(v)))
        .filter(|s| !s.trim().is_empty());

    CandidateTransaction {
        date: field_text(pick(map, &["date", "transaction_date", "timestamp"])),
        description: field_text(pick(map, &["description", "merchant", "payee"])),
        amount: field_text(pick(map, &["amount"])),
        suggested_category,
    }
}

/// First non-null value among `keys` (field name aliases)
fn pick<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
