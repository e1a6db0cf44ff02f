//! Schema validation and normalization
//!
//! The boundary between untrusted model output and typed records. Each
//! candidate either becomes a `NormalizedTransaction` or a `Rejection` with a
//! reason; one bad record never fails the batch.
//!
//! Normalized amounts follow one sign convention: negative = money leaving the
//! user. Card statements print charges as positive numbers, so the declared
//! `AccountKind` decides how printed signs are read.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ValidationConfig;
use crate::models::{CandidateTransaction, StatementContext, StatementPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    BadDate,
    BadAmount,
    EmptyDescription,
    Duplicate,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadDate => "bad-date",
            Self::BadAmount => "bad-amount",
            Self::EmptyDescription => "empty-description",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub candidate: CandidateTransaction,
    pub reason: RejectionReason,
}

/// A candidate that passed validation, not yet categorized
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount_minor_units: i64,
    pub suggested_category: Option<String>,
    /// How sure we are the fields were read right (date format based)
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutcome {
    pub valid: Vec<NormalizedTransaction>,
    pub rejected: Vec<Rejection>,
}

/// Validate and normalize candidates against the declared statement
///
/// Duplicates (same date, amount and whitespace-collapsed description, case
/// preserved) keep the first occurrence.
pub fn normalize(
    candidates: Vec<CandidateTransaction>,
    statement: &StatementContext,
    config: &ValidationConfig,
) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    let mut seen: HashSet<(NaiveDate, i64, String)> = HashSet::new();
    let exponent = statement.currency.minor_exponent();

    for candidate in candidates {
        let Some((date, confidence)) =
            parse_date(&candidate.date, &statement.period, config.date_tolerance_days)
        else {
            reject(&mut outcome, candidate, RejectionReason::BadDate);
            continue;
        };

        let Some(printed) = parse_amount(&candidate.amount, exponent) else {
            reject(&mut outcome, candidate, RejectionReason::BadAmount);
            continue;
        };
        let amount_minor_units = printed.signed_for(statement.account_kind.charges_positive());

        let description = collapse_whitespace(&candidate.description);
        if description.is_empty() {
            reject(&mut outcome, candidate, RejectionReason::EmptyDescription);
            continue;
        }

        let key = (date, amount_minor_units, description.clone());
        if !seen.insert(key) {
            reject(&mut outcome, candidate, RejectionReason::Duplicate);
            continue;
        }

        outcome.valid.push(NormalizedTransaction {
            date,
            description,
            amount_minor_units,
            suggested_category: candidate.suggested_category.clone(),
            confidence,
        });
    }

    outcome
}

fn reject(outcome: &mut NormalizeOutcome, candidate: CandidateTransaction, reason: RejectionReason) {
    tracing::debug!(
        reason = reason.as_str(),
        date = %candidate.date,
        amount = %candidate.amount,
        "Rejected candidate"
    );
    outcome.rejected.push(Rejection { candidate, reason });
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

const CONFIDENCE_ISO: f64 = 1.0;
const CONFIDENCE_EXPLICIT_YEAR: f64 = 0.9;
const CONFIDENCE_INFERRED_YEAR: f64 = 0.8;

/// Formats carrying a year, tried in order; the first one landing inside the
/// statement window wins
const EXPLICIT_YEAR_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%m-%d-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%b %d %Y",
];

/// Year-less formats; the raw text is suffixed with a candidate year
const YEARLESS_FORMATS: &[(&str, &str)] = &[
    ("%m/%d/%Y", "/"),
    ("%m-%d-%Y", "-"),
    ("%d %b %Y", " "),
    ("%b %d %Y", " "),
];

/// Parse a printed date, returning it with a confidence
///
/// Only dates within the statement period widened by `tolerance_days` are
/// accepted.
pub fn parse_date(
    raw: &str,
    period: &StatementPeriod,
    tolerance_days: i64,
) -> Option<(NaiveDate, f64)> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let in_window = |d: &NaiveDate| period.contains_with_tolerance(*d, tolerance_days);

    // ISO date, or the date part of an ISO datetime
    let iso_part = match s.get(10..11) {
        Some("T") | Some(" ") => s.get(..10),
        _ => Some(s),
    };
    if let Some(date) = iso_part.and_then(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok()) {
        return in_window(&date).then_some((date, CONFIDENCE_ISO));
    }

    if let Some(date) = EXPLICIT_YEAR_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .find(in_window)
    {
        return Some((date, CONFIDENCE_EXPLICIT_YEAR));
    }

    for year in period.candidate_years(tolerance_days) {
        for (fmt, sep) in YEARLESS_FORMATS {
            let with_year = format!("{}{}{}", s, sep, year);
            if let Ok(date) = NaiveDate::parse_from_str(&with_year, fmt) {
                if in_window(&date) {
                    return Some((date, CONFIDENCE_INFERRED_YEAR));
                }
            }
        }
    }

    None
}

/// Direction marker printed after an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Credit,
    Debit,
}

/// An amount as printed on the statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintedAmount {
    /// Always positive
    pub magnitude: i64,
    pub negative: bool,
    marker: Option<Marker>,
}

impl PrintedAmount {
    /// Signed minor units under the negative = outflow convention
    ///
    /// `CR`/`DR` markers are unambiguous. Otherwise card statements
    /// (`charges_positive`) print charges as positive numbers and bank
    /// statements print them as negative numbers.
    pub fn signed_for(&self, charges_positive: bool) -> i64 {
        let outflow = match self.marker {
            Some(Marker::Credit) => false,
            Some(Marker::Debit) => true,
            None if charges_positive => !self.negative,
            None => self.negative,
        };
        if outflow {
            -self.magnitude
        } else {
            self.magnitude
        }
    }
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₩', '₹', '₽', '₺', '₪'];

/// Parse a printed amount into exact minor units
///
/// Accepts currency symbols and codes, thousands separators, a leading `-`/`+`,
/// a trailing `-`, parentheses for negatives and trailing `CR`/`DR` markers.
/// Rejects more fractional digits than `exponent`, overflow and zero.
pub fn parse_amount(raw: &str, exponent: u32) -> Option<PrintedAmount> {
    let mut s = raw.trim().to_uppercase();
    if s.is_empty() {
        return None;
    }

    let mut marker = None;
    for (suffix, m) in [("CR", Marker::Credit), ("DR", Marker::Debit)] {
        if let Some(rest) = s.strip_suffix(suffix) {
            marker = Some(m);
            s = rest.trim_end().to_string();
            break;
        }
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].trim().to_string();
    }

    // Drop symbols, codes, separators and whitespace, keeping signs, digits and the point
    let mut body: String = s
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    let code_len = body.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    if code_len == 3 {
        body.drain(..3);
    }
    let trailing_alpha = body.chars().rev().take_while(|c| c.is_ascii_alphabetic()).count();
    if trailing_alpha == 3 {
        body.truncate(body.len() - 3);
    }

    let mut signs = 0;
    if let Some(rest) = body.strip_suffix('-') {
        negative = true;
        signs += 1;
        body = rest.to_string();
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        signs += 1;
        body = rest.to_string();
    } else if let Some(rest) = body.strip_prefix('+') {
        signs += 1;
        body = rest.to_string();
    }
    if signs > 1 {
        return None;
    }

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body.as_str(), ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    if frac_part.len() > exponent as usize {
        return None;
    }

    let scale = 10i64.checked_pow(exponent)?;
    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let frac: i64 = if frac_part.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac_part, width = exponent as usize);
        padded.parse().ok()?
    };
    let magnitude = whole.checked_mul(scale)?.checked_add(frac)?;
    if magnitude == 0 {
        return None;
    }

    Some(PrintedAmount {
        magnitude,
        negative,
        marker,
    })
}
