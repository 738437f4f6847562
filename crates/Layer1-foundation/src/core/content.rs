//! Content safety verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy categories the content filter scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    HateSpeech,
    Harassment,
    Violence,
    SelfHarm,
    Sexual,
    IllegalActivity,
    MaliciousCode,
    PersonalInformation,
    Spam,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 9] = [
        Self::HateSpeech,
        Self::Harassment,
        Self::Violence,
        Self::SelfHarm,
        Self::Sexual,
        Self::IllegalActivity,
        Self::MaliciousCode,
        Self::PersonalInformation,
        Self::Spam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HateSpeech => "hate_speech",
            Self::Harassment => "harassment",
            Self::Violence => "violence",
            Self::SelfHarm => "self_harm",
            Self::Sexual => "sexual",
            Self::IllegalActivity => "illegal_activity",
            Self::MaliciousCode => "malicious_code",
            Self::PersonalInformation => "personal_information",
            Self::Spam => "spam",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    pub category: ContentCategory,
    /// Always within `[0, 1]`
    pub confidence: f64,
}

/// Result of one content scan. Built fresh per scan and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSafetyResult {
    pub id: String,
    pub is_allowed: bool,
    pub categories: Vec<CategoryScore>,
    pub redacted_content: Option<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ContentSafetyResult {
    pub fn allowed(categories: Vec<CategoryScore>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            is_allowed: true,
            categories,
            redacted_content: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn blocked(categories: Vec<CategoryScore>, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            is_allowed: false,
            categories,
            redacted_content: None,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_redacted(mut self, redacted: impl Into<String>) -> Self {
        self.redacted_content = Some(redacted.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn score(&self, category: ContentCategory) -> f64 {
        self.categories
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.confidence)
            .unwrap_or(0.0)
    }
}
