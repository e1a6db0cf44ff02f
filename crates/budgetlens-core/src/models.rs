//! Data models for budgetlens

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque user identifier, supplied by the upload collaborator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable hash of a statement's raw text, used for duplicate statement detection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the extracted statement text
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }

    pub(crate) fn from_stored(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one ingested statement, derived from (user, fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatementId(String);

impl StatementId {
    pub fn derive(user_id: &UserId, fingerprint: &Fingerprint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_str().as_bytes());
        Self(format!("stmt_{}", &hex::encode(hasher.finalize())[..24]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_stored(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one transaction
///
/// Derived from the statement and the transaction's dedup key (date, amount and
/// whitespace-collapsed description), so re-running the same statement yields
/// the same ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn derive(
        statement_id: &StatementId,
        date: NaiveDate,
        amount_minor_units: i64,
        description: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(statement_id.as_str().as_bytes());
        hasher.update(date.to_string().as_bytes());
        hasher.update(amount_minor_units.to_be_bytes());
        hasher.update(description.as_bytes());
        Self(format!("txn_{}", &hex::encode(hasher.finalize())[..24]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_stored(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accounting period (calendar month)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("Invalid period (expected YYYY-MM): {}", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid period year: {}", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid period month: {}", s))?;
        Self::new(year, month).ok_or_else(|| format!("Invalid period month: {}", s))
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

/// Currencies without a minor unit
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["JPY", "KRW", "VND", "CLP", "ISK", "UGX"];

impl Currency {
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of fractional digits in one major unit (2 for USD, 0 for JPY)
    pub fn minor_exponent(&self) -> u32 {
        if ZERO_DECIMAL_CURRENCIES.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(format!("Invalid currency code: {}", s))
        }
    }
}

/// Kind of account a statement belongs to
///
/// Card issuers print charges as positive amounts; bank accounts print them as
/// negative amounts. The normalizer uses this to put every amount on one
/// convention (negative = money leaving the user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    #[default]
    Checking,
    Savings,
    CreditCard,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::CreditCard => "credit_card",
        }
    }

    /// Whether printed amounts use charges-are-positive
    pub fn charges_positive(&self) -> bool {
        matches!(self, Self::CreditCard)
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "checking" | "debit" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "credit_card" | "credit" | "card" => Ok(Self::CreditCard),
            _ => Err(format!("Unknown account kind: {}", s)),
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared statement period (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StatementPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Whole calendar month
    pub fn month(period: Period) -> Self {
        Self {
            start: period.first_day(),
            end: period.last_day(),
        }
    }

    /// Whether `date` falls inside the period widened by `tolerance_days` on both ends
    pub fn contains_with_tolerance(&self, date: NaiveDate, tolerance_days: i64) -> bool {
        let tol = Duration::days(tolerance_days);
        date >= self.start - tol && date <= self.end + tol
    }

    /// Years the (tolerance-widened) period touches, used for year-less dates
    pub fn candidate_years(&self, tolerance_days: i64) -> Vec<i32> {
        let tol = Duration::days(tolerance_days);
        let first = (self.start - tol).year();
        let last = (self.end + tol).year();
        (first..=last).collect()
    }
}

impl fmt::Display for StatementPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// What the upload collaborator declares about a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementContext {
    pub period: StatementPeriod,
    pub currency: Currency,
    pub account_kind: AccountKind,
}

impl StatementContext {
    pub fn new(period: StatementPeriod) -> Self {
        Self {
            period,
            currency: Currency::default(),
            account_kind: AccountKind::default(),
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_account_kind(mut self, kind: AccountKind) -> Self {
        self.account_kind = kind;
        self
    }
}

/// Untrusted transaction record as produced by the extraction model
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateTransaction {
    pub date: String,
    pub description: String,
    pub amount: String,
    pub suggested_category: Option<String>,
}

impl CandidateTransaction {
    pub fn new(
        date: impl Into<String>,
        description: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            description: description.into(),
            amount: amount.into(),
            suggested_category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.suggested_category = Some(category.into());
        self
    }
}

/// A member of the closed category taxonomy
///
/// Only `categorize::Taxonomy` hands these out, so a `Category` is never free text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Category(String);

impl Category {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated, categorized transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub statement_id: StatementId,
    pub date: NaiveDate,
    pub description: String,
    /// Signed minor units; negative = money leaving the user
    pub amount_minor_units: i64,
    pub currency: Currency,
    pub category: Category,
    pub source_confidence: f64,
}

impl Transaction {
    pub fn period(&self) -> Period {
        Period::of_date(self.date)
    }

    /// Spend magnitude (0 for inflows)
    pub fn spend_minor_units(&self) -> i64 {
        if self.amount_minor_units < 0 {
            -self.amount_minor_units
        } else {
            0
        }
    }
}

/// Per-user, per-period spending totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendingProfile {
    pub user_id: UserId,
    pub period: Period,
    /// Spend per category as positive minor units
    pub totals_by_category: BTreeMap<Category, i64>,
    /// Sum of inflows in minor units
    pub income_minor_units: i64,
    pub transaction_count: u64,
    /// Optimistic concurrency version (0 = never stored)
    pub version: u64,
}

impl SpendingProfile {
    pub fn empty(user_id: UserId, period: Period) -> Self {
        Self {
            user_id,
            period,
            totals_by_category: BTreeMap::new(),
            income_minor_units: 0,
            transaction_count: 0,
            version: 0,
        }
    }

    pub fn total_for(&self, category: &Category) -> i64 {
        self.totals_by_category.get(category).copied().unwrap_or(0)
    }

    pub fn total_spend(&self) -> i64 {
        self.totals_by_category.values().sum()
    }
}

/// Where a suggested limit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetBasis {
    ProfileDerived,
    LlmSuggested,
}

impl BudgetBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileDerived => "profile-derived",
            Self::LlmSuggested => "llm-suggested",
        }
    }
}

impl FromStr for BudgetBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile-derived" => Ok(Self::ProfileDerived),
            "llm-suggested" => Ok(Self::LlmSuggested),
            _ => Err(format!("Unknown budget basis: {}", s)),
        }
    }
}

impl fmt::Display for BudgetBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Proposed,
    Accepted,
    Rejected,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for BudgetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proposed" => Ok(Self::Proposed),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown budget status: {}", s)),
        }
    }
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSuggestion {
    pub user_id: UserId,
    pub category: Category,
    pub period: Period,
    pub suggested_limit_minor_units: i64,
    pub basis: BudgetBasis,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightKind {
    Overspend,
    TrendUp,
    TrendDown,
    Compatibility,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overspend => "overspend",
            Self::TrendUp => "trend-up",
            Self::TrendDown => "trend-down",
            Self::Compatibility => "compatibility",
        }
    }
}

impl FromStr for InsightKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overspend" => Ok(Self::Overspend),
            "trend-up" => Ok(Self::TrendUp),
            "trend-down" => Ok(Self::TrendDown),
            "compatibility" => Ok(Self::Compatibility),
            _ => Err(format!("Unknown insight kind: {}", s)),
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived, disposable view over transactions and budgets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub user_id: UserId,
    pub period: Period,
    pub kind: InsightKind,
    pub category: Option<Category>,
    pub severity: f64,
    pub message: String,
}

/// Format minor units as a major-unit amount string (e.g. 2500 USD → "25.00")
pub fn format_minor_units(amount: i64, currency: &Currency) -> String {
    let exponent = currency.minor_exponent();
    if exponent == 0 {
        return amount.to_string();
    }
    let scale = 10i64.pow(exponent);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale as u64,
        abs % scale as u64,
        width = exponent as usize
    )
}
