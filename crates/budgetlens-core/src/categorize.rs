//! Transaction categorization
//!
//! Priority order:
//! 1. Model suggestion, if it names a taxonomy category (case-insensitive)
//! 2. Keyword rules (priority desc, then declaration order)
//! 3. The designated fallback category
//!
//! The taxonomy and rules are data (`config/categories.toml`), never code.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;

use crate::config::read_layered;
use crate::error::{Error, Result};
use crate::models::Category;

const DEFAULT_CATEGORIES: &str = include_str!("../../../config/categories.toml");

pub const CATEGORIES_CONFIG_FILE: &str = "categories.toml";

/// Pattern matching type for keyword rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Case-insensitive substring match (supports | for OR)
    #[default]
    Contains,
    Regex,
    /// Exact string match (case-insensitive)
    Exact,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::Exact => "exact",
        }
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            "exact" => Ok(Self::Exact),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

/// How a category was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySource {
    Suggested,
    Rule,
    Fallback,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Rule => "rule",
            Self::Fallback => "fallback",
        }
    }

    /// Multiplier applied to the normalizer's confidence
    pub fn confidence_factor(&self) -> f64 {
        match self {
            Self::Suggested => 1.0,
            Self::Rule => 0.9,
            Self::Fallback => 0.5,
        }
    }
}

impl fmt::Display for CategorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categorization {
    pub category: Category,
    pub source: CategorySource,
}

/// The closed set of categories
#[derive(Debug, Clone)]
pub struct Taxonomy {
    /// Lowercased name → category, in sorted order
    members: BTreeMap<String, Category>,
    descriptions: BTreeMap<String, String>,
    fallback: Category,
}

impl Taxonomy {
    /// Look up a category by name, case-insensitively
    pub fn get(&self, name: &str) -> Option<&Category> {
        self.members.get(&name.trim().to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fallback(&self) -> &Category {
        &self.fallback
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.members.values()
    }

    pub fn description(&self, category: &Category) -> Option<&str> {
        self.descriptions
            .get(&category.as_str().to_lowercase())
            .map(String::as_str)
    }

    /// Comma-separated names, for prompts
    pub fn names_joined(&self) -> String {
        self.members
            .values()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A compiled keyword rule
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: Category,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub priority: i32,
    regex: Option<Regex>,
}

impl CategoryRule {
    pub fn matches(&self, description: &str) -> bool {
        let desc_upper = description.to_uppercase();

        match self.pattern_type {
            PatternType::Contains => self
                .pattern
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .any(|p| desc_upper.contains(&p.to_uppercase())),
            PatternType::Regex => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(description) || re.is_match(&desc_upper)),
            PatternType::Exact => desc_upper == self.pattern.trim().to_uppercase(),
        }
    }
}

/// Maps transactions onto the taxonomy
#[derive(Debug, Clone)]
pub struct Categorizer {
    taxonomy: Taxonomy,
    rules: Vec<CategoryRule>,
}

impl Categorizer {
    /// Load from the default override location, else embedded defaults
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit override directory
    pub fn load_from(config_dir: Option<&Path>) -> Result<Self> {
        let (content, path) = read_layered(CATEGORIES_CONFIG_FILE, DEFAULT_CATEGORIES, config_dir)?;
        Self::from_toml(&content).map_err(|e| match path {
            Some(path) => Error::Config(format!("{}: {}", path.display(), e)),
            None => e,
        })
    }

    pub fn embedded() -> Result<Self> {
        Self::from_toml(DEFAULT_CATEGORIES)
    }

    /// Parse and validate a taxonomy file
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawCategories = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid categories TOML: {}", e)))?;

        let mut members = BTreeMap::new();
        let mut descriptions = BTreeMap::new();
        for entry in raw.categories {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(Error::Config("Category name must not be empty".into()));
            }
            let key = name.to_lowercase();
            if members.contains_key(&key) {
                return Err(Error::Config(format!("Duplicate category: {}", name)));
            }
            if let Some(description) = entry.description {
                descriptions.insert(key.clone(), description);
            }
            members.insert(key, Category::new(name));
        }

        let fallback = members
            .get(&raw.fallback.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "Fallback category '{}' is not in the taxonomy",
                    raw.fallback
                ))
            })?;

        let mut rules = Vec::with_capacity(raw.rules.len());
        for rule in raw.rules {
            let category = members
                .get(&rule.category.trim().to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Rule '{}' targets unknown category '{}'",
                        rule.pattern, rule.category
                    ))
                })?;
            let regex = match rule.pattern_type {
                PatternType::Regex => Some(Regex::new(&rule.pattern)?),
                _ => None,
            };
            rules.push(CategoryRule {
                category,
                pattern: rule.pattern,
                pattern_type: rule.pattern_type,
                priority: rule.priority,
                regex,
            });
        }
        // Stable sort keeps declaration order within a priority
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            taxonomy: Taxonomy {
                members,
                descriptions,
                fallback,
            },
            rules,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Assign a category to a normalized description
    ///
    /// Always returns a taxonomy member.
    pub fn categorize(&self, description: &str, suggested: Option<&str>) -> Categorization {
        if let Some(category) = suggested.and_then(|s| self.taxonomy.get(s)) {
            return Categorization {
                category: category.clone(),
                source: CategorySource::Suggested,
            };
        }

        if let Some(rule) = self.rules.iter().find(|r| r.matches(description)) {
            return Categorization {
                category: rule.category.clone(),
                source: CategorySource::Rule,
            };
        }

        if let Some(s) = suggested {
            tracing::debug!(suggested = %s, "Suggested category not in taxonomy");
        }

        Categorization {
            category: self.taxonomy.fallback.clone(),
            source: CategorySource::Fallback,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCategories {
    fallback: String,
    #[serde(default)]
    categories: Vec<RawCategory>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    category: String,
    pattern: String,
    #[serde(default)]
    pattern_type: PatternType,
    #[serde(default)]
    priority: i32,
}
