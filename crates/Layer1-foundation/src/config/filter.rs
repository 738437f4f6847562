//! Content filter configuration
//!
//! Deterministic pattern heuristics per category. Patterns are regex source
//! strings compiled by the gate; each matching pattern adds its weight to the
//! category's confidence (capped at 1.0).

use crate::core::ContentCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_REDACTION: &str = "[REDACTED]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRule {
    pub pattern: String,
    pub weight: f64,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, weight: f64) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryRule {
    pub enabled: bool,
    /// Deny when confidence reaches this value
    pub threshold: f64,
    pub patterns: Vec<PatternRule>,
}

impl Default for CategoryRule {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
            patterns: Vec::new(),
        }
    }
}

impl CategoryRule {
    fn with(threshold: f64, patterns: &[(&str, f64)]) -> Self {
        Self {
            enabled: true,
            threshold,
            patterns: patterns
                .iter()
                .map(|(p, w)| PatternRule::new(*p, *w))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentFilterConfig {
    pub enabled: bool,
    /// When false, verdicts are computed and audited but never deny
    pub blocking_enabled: bool,
    pub audit_enabled: bool,
    pub redaction_enabled: bool,
    pub redaction_placeholder: String,
    /// Longer input is an analysis error (and therefore denied)
    pub max_content_length: usize,
    /// Case-insensitive substrings that deny outright
    pub block_list: Vec<String>,
    /// Case-insensitive substrings that allow outright (checked after the block list)
    pub allow_list: Vec<String>,
    pub categories: BTreeMap<ContentCategory, CategoryRule>,
}

impl Default for ContentFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocking_enabled: true,
            audit_enabled: true,
            redaction_enabled: true,
            redaction_placeholder: DEFAULT_REDACTION.to_string(),
            max_content_length: 1_000_000,
            block_list: Vec::new(),
            allow_list: Vec::new(),
            categories: default_categories(),
        }
    }
}

impl ContentFilterConfig {
    pub fn block(mut self, phrase: impl Into<String>) -> Self {
        self.block_list.push(phrase.into());
        self
    }

    pub fn allow(mut self, phrase: impl Into<String>) -> Self {
        self.allow_list.push(phrase.into());
        self
    }

    pub fn with_category(mut self, category: ContentCategory, rule: CategoryRule) -> Self {
        self.categories.insert(category, rule);
        self
    }
}

fn default_categories() -> BTreeMap<ContentCategory, CategoryRule> {
    use ContentCategory::*;

    let mut categories = BTreeMap::new();
    categories.insert(
        MaliciousCode,
        CategoryRule::with(
            0.8,
            &[
                (r"rm\s+-[a-zA-Z]*r[a-zA-Z]*f?[a-zA-Z]*\s+/(\s|$|\*)", 0.9),
                (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", 1.0),
                (r"(?i)\bmkfs(\.\w+)?\s", 0.8),
                (r"(?i)\bdd\s+if=/dev/(zero|random|urandom)\s+of=/dev/", 0.9),
                (r"(?i)\b(nc|ncat|netcat)\b[^\n]*\s-e\s", 0.8),
                (r"(?i)\bcurl\b[^\n|]*\|\s*(ba|z)?sh\b", 0.5),
                (r"(?i)\bwget\b[^\n|]*\|\s*(ba|z)?sh\b", 0.5),
                (r"(?i)base64\s+(-d|--decode)[^\n|]*\|\s*(ba|z)?sh\b", 0.8),
                (r"(?i)/etc/(passwd|shadow|sudoers)", 0.4),
                (r"(?i)\bchmod\s+(-R\s+)?[0-7]*777\s+/(\s|$)", 0.6),
            ],
        ),
    );
    categories.insert(
        PersonalInformation,
        CategoryRule::with(
            0.9,
            &[
                (r"\b\d{3}-\d{2}-\d{4}\b", 0.6),
                (r"\b(?:\d{4}[ -]?){3}\d{4}\b", 0.6),
                (r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b", 0.2),
                (r"(?i)\b(password|passwd|secret|api[_-]?key)\s*[:=]\s*\S+", 0.5),
            ],
        ),
    );
    categories.insert(
        Violence,
        CategoryRule::with(
            0.7,
            &[
                (r"(?i)\b(kill|murder|shoot|stab)\s+(you|him|her|them|everyone)\b", 0.7),
                (r"(?i)\bhow\s+to\s+(make|build)\s+(a\s+)?(bomb|explosive|pipe\s+bomb)\b", 0.9),
            ],
        ),
    );
    categories.insert(
        SelfHarm,
        CategoryRule::with(
            0.7,
            &[
                (r"(?i)\b(kill|hurt|harm)\s+myself\b", 0.8),
                (r"(?i)\bsuicide\s+(method|plan)s?\b", 0.8),
            ],
        ),
    );
    categories.insert(
        IllegalActivity,
        CategoryRule::with(
            0.7,
            &[
                (r"(?i)\b(buy|sell)\s+(cocaine|heroin|meth|fentanyl)\b", 0.8),
                (r"(?i)\b(credit\s+card|cc)\s+dumps?\b", 0.7),
                (r"(?i)\blaunder(ing)?\s+money\b", 0.6),
            ],
        ),
    );
    categories.insert(
        HateSpeech,
        CategoryRule::with(0.7, &[(r"(?i)\b(subhuman|vermin)\b", 0.5)]),
    );
    categories.insert(
        Harassment,
        CategoryRule::with(
            0.7,
            &[(r"(?i)\byou\s+(are|re)\s+(worthless|pathetic|disgusting)\b", 0.5)],
        ),
    );
    categories.insert(
        Sexual,
        CategoryRule::with(0.7, &[(r"(?i)\bexplicit\s+sexual\b", 0.6)]),
    );
    categories.insert(
        Spam,
        CategoryRule::with(
            0.9,
            &[
                (r"(?i)\b(buy\s+now|click\s+here|limited\s+time\s+offer)\b", 0.3),
                (r"(?i)\b(free\s+money|act\s+now|risk[-\s]free)\b", 0.3),
            ],
        ),
    );
    categories
}
