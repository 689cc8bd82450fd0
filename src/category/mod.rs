//! Product type to marketplace category resolution.
//!
//! Rules are keyword tables with a priority. Matching is plain substring
//! containment on the lowercased, trimmed product type; the highest priority
//! candidate wins and equal priorities fall back to declaration order. A miss
//! is not an error, it resolves to the configured default category.

pub mod rules;

use crate::router::{self, Rule};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category_id: String,
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl Rule for CategoryRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn matches(&self, input: &str) -> bool {
        router::contains_any(input, &self.keywords)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("cannot read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rules file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("rules file defines no rules")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    default: Option<ClassificationResult>,
    rules: Vec<CategoryRule>,
}

static BUILTIN: Lazy<Classifier> =
    Lazy::new(|| Classifier::new(rules::builtin_rules(), rules::builtin_default()));

/// Immutable rule table plus the fallback category.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CategoryRule>,
    default: ClassificationResult,
}

impl Classifier {
    pub fn new(rules: Vec<CategoryRule>, default: ClassificationResult) -> Self {
        let rules = rules
            .into_iter()
            .map(|mut rule| {
                rule.keywords = rule
                    .keywords
                    .into_iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                rule
            })
            .collect();
        Self { rules, default }
    }

    pub fn builtin() -> &'static Classifier {
        &BUILTIN
    }

    /// Loads a YAML table of the shape `{default?: {id, name}, rules: [..]}`.
    pub fn from_yaml_str(raw: &str) -> Result<Self, RulesError> {
        let file: RulesFile = serde_yaml::from_str(raw)?;
        if file.rules.is_empty() {
            return Err(RulesError::Empty);
        }
        let default = file.default.unwrap_or_else(rules::builtin_default);
        Ok(Self::new(file.rules, default))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, RulesError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn classify(&self, product_type: Option<&str>) -> ClassificationResult {
        let Some(normalized) = router::normalize(product_type) else {
            return self.default.clone();
        };
        match router::select(&self.rules, &normalized) {
            Some(rule) => ClassificationResult {
                id: rule.category_id.clone(),
                name: rule.name.clone(),
            },
            None => self.default.clone(),
        }
    }

    pub fn default_category(&self) -> &ClassificationResult {
        &self.default
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
