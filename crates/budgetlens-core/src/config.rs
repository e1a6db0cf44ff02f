//! Pipeline configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for an override file in the config dir (~/.local/share/budgetlens/config/
//!    or an explicit directory)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Override files may be partial; missing keys keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/pipeline.toml");

pub const PIPELINE_CONFIG_FILE: &str = "pipeline.toml";

/// Default config override directory
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("budgetlens").join("config"))
}

/// Read `file_name` from the override directory if present, else return `embedded`
///
/// Returns the content and the override path it came from (if any).
pub(crate) fn read_layered(
    file_name: &str,
    embedded: &'static str,
    config_dir: Option<&Path>,
) -> Result<(String, Option<PathBuf>)> {
    let dir = match config_dir {
        Some(dir) => Some(dir.to_path_buf()),
        None => default_config_dir(),
    };

    if let Some(dir) = dir {
        let path = dir.join(file_name);
        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            tracing::debug!(path = %path.display(), "Using config override");
            return Ok((content, Some(path)));
        }
    }

    Ok((embedded.to_string(), None))
}

/// Extraction adapter settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    pub token_budget: usize,
    pub chars_per_token: usize,
    pub max_concurrent_segments: usize,
    pub timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            token_budget: 3000,
            chars_per_token: 4,
            max_concurrent_segments: 2,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Optional cleaning pre-pass run on each segment before extraction
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningConfig {
    pub enabled: bool,
    /// Model for the pre-pass; `None` uses the extraction model
    pub model: Option<String>,
    pub timeout: Duration,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_upstream_retries: u32,
    pub backoff: Duration,
    pub max_conflict_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_upstream_retries: 2,
            backoff: Duration::from_millis(500),
            max_conflict_retries: 3,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub date_tolerance_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: 1,
        }
    }
}

/// Budget smoothing settings
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetConfig {
    /// Most recent period first
    pub weights: Vec<u64>,
    pub headroom_bps: u64,
    pub rounding_minor_units: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            weights: vec![4, 3, 2, 1],
            headroom_bps: 1000,
            rounding_minor_units: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightConfig {
    pub trend_lookback: usize,
    pub trend_threshold: f64,
    pub min_baseline_minor_units: i64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            trend_lookback: 3,
            trend_threshold: 0.25,
            min_baseline_minor_units: 1000,
        }
    }
}

/// All pipeline tunables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub cleaning: CleaningConfig,
    pub retry: RetryConfig,
    pub validation: ValidationConfig,
    pub budget: BudgetConfig,
    pub insights: InsightConfig,
}

impl PipelineConfig {
    /// Load from the default override location, else embedded defaults
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit override directory
    pub fn load_from(config_dir: Option<&Path>) -> Result<Self> {
        let (content, path) = read_layered(PIPELINE_CONFIG_FILE, DEFAULT_CONFIG, config_dir)?;
        parse_config(&content).map_err(|e| match path {
            Some(path) => Error::Config(format!("{}: {}", path.display(), e)),
            None => e,
        })
    }

    /// Embedded defaults only
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }

    fn validate(&self) -> Result<()> {
        let e = &self.extraction;
        if e.token_budget == 0 || e.chars_per_token == 0 || e.max_concurrent_segments == 0 {
            return Err(Error::Config(
                "extraction.token_budget, chars_per_token and max_concurrent_segments must be positive"
                    .into(),
            ));
        }
        if self
            .cleaning
            .model
            .as_deref()
            .is_some_and(|m| m.trim().is_empty())
        {
            return Err(Error::Config("cleaning.model must not be empty".into()));
        }
        if self.validation.date_tolerance_days < 0 {
            return Err(Error::Config(
                "validation.date_tolerance_days must not be negative".into(),
            ));
        }
        if self.budget.weights.is_empty() || self.budget.weights.iter().any(|w| *w == 0) {
            return Err(Error::Config(
                "budget.weights must be a non-empty list of positive integers".into(),
            ));
        }
        if self.budget.rounding_minor_units <= 0 {
            return Err(Error::Config(
                "budget.rounding_minor_units must be positive".into(),
            ));
        }
        if self.insights.trend_lookback == 0
            || !(self.insights.trend_threshold.is_finite() && self.insights.trend_threshold >= 0.0)
        {
            return Err(Error::Config(
                "insights.trend_lookback must be positive and trend_threshold non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    extraction: Option<RawExtraction>,
    cleaning: Option<RawCleaning>,
    retry: Option<RawRetry>,
    validation: Option<RawValidation>,
    budget: Option<RawBudget>,
    insights: Option<RawInsights>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtraction {
    token_budget: Option<usize>,
    chars_per_token: Option<usize>,
    max_concurrent_segments: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCleaning {
    enabled: Option<bool>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_upstream_retries: Option<u32>,
    backoff_ms: Option<u64>,
    max_conflict_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawValidation {
    date_tolerance_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBudget {
    weights: Option<Vec<u64>>,
    headroom_bps: Option<u64>,
    rounding_minor_units: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInsights {
    trend_lookback: Option<usize>,
    trend_threshold: Option<f64>,
    min_baseline_minor_units: Option<i64>,
}

/// Parse config from TOML content, merging over defaults
fn parse_config(content: &str) -> Result<PipelineConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid pipeline TOML: {}", e)))?;

    let mut config = PipelineConfig::default();

    if let Some(extraction) = raw.extraction {
        if let Some(v) = extraction.token_budget {
            config.extraction.token_budget = v;
        }
        if let Some(v) = extraction.chars_per_token {
            config.extraction.chars_per_token = v;
        }
        if let Some(v) = extraction.max_concurrent_segments {
            config.extraction.max_concurrent_segments = v;
        }
        if let Some(v) = extraction.timeout_secs {
            config.extraction.timeout = Duration::from_secs(v);
        }
    }

    if let Some(cleaning) = raw.cleaning {
        if let Some(v) = cleaning.enabled {
            config.cleaning.enabled = v;
        }
        if let Some(v) = cleaning.model {
            config.cleaning.model = Some(v);
        }
        if let Some(v) = cleaning.timeout_secs {
            config.cleaning.timeout = Duration::from_secs(v);
        }
    }

    if let Some(retry) = raw.retry {
        if let Some(v) = retry.max_upstream_retries {
            config.retry.max_upstream_retries = v;
        }
        if let Some(v) = retry.backoff_ms {
            config.retry.backoff = Duration::from_millis(v);
        }
        if let Some(v) = retry.max_conflict_retries {
            config.retry.max_conflict_retries = v;
        }
    }

    if let Some(validation) = raw.validation {
        if let Some(v) = validation.date_tolerance_days {
            config.validation.date_tolerance_days = v;
        }
    }

    if let Some(budget) = raw.budget {
        if let Some(v) = budget.weights {
            config.budget.weights = v;
        }
        if let Some(v) = budget.headroom_bps {
            config.budget.headroom_bps = v;
        }
        if let Some(v) = budget.rounding_minor_units {
            config.budget.rounding_minor_units = v;
        }
    }

    if let Some(insights) = raw.insights {
        if let Some(v) = insights.trend_lookback {
            config.insights.trend_lookback = v;
        }
        if let Some(v) = insights.trend_threshold {
            config.insights.trend_threshold = v;
        }
        if let Some(v) = insights.min_baseline_minor_units {
            config.insights.min_baseline_minor_units = v;
        }
    }

    config.validate()?;
    Ok(config)
}
