//! Content filter
//!
//! Deterministic pattern heuristics, evaluated in this order:
//!
//! 1. block list substring (case-insensitive) → denied
//! 2. allow list substring (exact, case-sensitive) → allowed
//! 3. every enabled category: each matching pattern adds its weight once,
//!    confidence capped at 1.0; denied when any category reaches its
//!    threshold and blocking is enabled
//!
//! Matched spans are replaced by the redaction placeholder. Analysis errors
//! (oversized input) produce a denial, never an allow.

use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, warn};
use warden_foundation::{
    AuditCategory, AuditDecision, AuditEntry, AuditSink, CategoryScore, ContentCategory,
    ContentFilterConfig, ContentSafetyResult, Error, ModerationRecord, Result, Storage,
};

pub const BLOCK_LIST_REASON: &str = "Content matched block list";
pub const ALLOW_LIST_REASON: &str = "Content matched allow list";
pub const ANALYSIS_FAILED_REASON: &str = "Content analysis failed";

struct CompiledCategory {
    category: ContentCategory,
    threshold: f64,
    patterns: Vec<(Regex, f64)>,
}

pub struct ContentFilter {
    config: ContentFilterConfig,
    categories: Vec<CompiledCategory>,
    block_list: Vec<String>,
    allow_list: Vec<String>,
    audit: Option<Arc<dyn AuditSink>>,
    storage: Option<Storage>,
}

impl ContentFilter {
    /// Compiles every enabled category's patterns; an invalid pattern is a
    /// configuration error.
    pub fn new(config: ContentFilterConfig) -> Result<Self> {
        let mut categories = Vec::new();
        for (category, rule) in &config.categories {
            if !rule.enabled {
                continue;
            }
            let patterns = rule
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(&p.pattern)
                        .map(|re| (re, p.weight.max(0.0)))
                        .map_err(|e| {
                            Error::Config(format!(
                                "invalid {} pattern '{}': {}",
                                category, p.pattern, e
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            categories.push(CompiledCategory {
                category: *category,
                threshold: rule.threshold,
                patterns,
            });
        }

        let non_blank = |list: &[String]| -> Vec<String> {
            list.iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect()
        };

        // block list folds case; allow list matches as written
        let block_list = non_blank(&config.block_list)
            .iter()
            .map(|p| p.to_lowercase())
            .collect();

        Ok(Self {
            block_list,
            allow_list: non_blank(&config.allow_list),
            categories,
            config,
            audit: None,
            storage: None,
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Keep a moderation log of every verdict
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &ContentFilterConfig {
        &self.config
    }

    /// Pure verdict without side effects
    pub fn evaluate(&self, content: &str) -> Result<ContentSafetyResult> {
        if content.len() > self.config.max_content_length {
            return Err(Error::InvalidInput(format!(
                "content length {} exceeds {} bytes",
                content.len(),
                self.config.max_content_length
            )));
        }

        if !self.config.enabled {
            return Ok(ContentSafetyResult::allowed(Vec::new()));
        }

        let lowered = content.to_lowercase();
        if self.block_list.iter().any(|p| lowered.contains(p.as_str())) {
            return Ok(ContentSafetyResult::blocked(Vec::new(), BLOCK_LIST_REASON));
        }
        if self.allow_list.iter().any(|p| content.contains(p.as_str())) {
            return Ok(ContentSafetyResult::allowed(Vec::new()).with_reason(ALLOW_LIST_REASON));
        }

        let mut scores = Vec::new();
        let mut flagged = Vec::new();
        let mut spans = Vec::new();

        for compiled in &self.categories {
            let mut confidence = 0.0;
            for (re, weight) in &compiled.patterns {
                let mut matched = false;
                for m in re.find_iter(content) {
                    matched = true;
                    spans.push((m.start(), m.end()));
                }
                if matched {
                    confidence += weight;
                }
            }
            let confidence = confidence.min(1.0);
            if confidence > 0.0 {
                scores.push(CategoryScore {
                    category: compiled.category,
                    confidence,
                });
                if confidence >= compiled.threshold {
                    flagged.push(compiled.category.as_str());
                }
            }
        }

        let mut result = if flagged.is_empty() {
            ContentSafetyResult::allowed(scores)
        } else if self.config.blocking_enabled {
            ContentSafetyResult::blocked(scores, format!("Content flagged: {}", flagged.join(", ")))
        } else {
            ContentSafetyResult::allowed(scores).with_reason(format!(
                "Content flagged (blocking disabled): {}",
                flagged.join(", ")
            ))
        };

        if self.config.redaction_enabled && !spans.is_empty() {
            result = result.with_redacted(redact(
                content,
                spans,
                &self.config.redaction_placeholder,
            ));
        }

        Ok(result)
    }

    /// Verdict with audit and moderation log. Fails closed.
    pub async fn analyze_content(&self, principal: Option<&str>, content: &str) -> ContentSafetyResult {
        let result = match self.evaluate(content) {
            Ok(result) => result,
            Err(e) => {
                error!(user = principal.unwrap_or("-"), error = %e, "Content analysis failed");
                ContentSafetyResult::blocked(Vec::new(), ANALYSIS_FAILED_REASON)
            }
        };

        if result.is_allowed {
            debug!(scan = %result.id, user = principal.unwrap_or("-"), "Content allowed");
        } else {
            warn!(
                scan = %result.id,
                user = principal.unwrap_or("-"),
                reason = result.reason.as_deref().unwrap_or("-"),
                "Content blocked"
            );
        }

        self.record(principal, &result).await;
        result
    }

    async fn record(&self, principal: Option<&str>, result: &ContentSafetyResult) {
        if self.config.audit_enabled {
            if let Some(audit) = &self.audit {
                let decision = if result.is_allowed {
                    AuditDecision::Allowed
                } else {
                    AuditDecision::Denied
                };
                let mut entry = AuditEntry::new(AuditCategory::Content, "content_scan", decision)
                    .with_correlation(&result.id)
                    .with_data(serde_json::json!({ "categories": result.categories }));
                if let Some(principal) = principal {
                    entry = entry.with_principal(principal);
                }
                if let Some(reason) = &result.reason {
                    entry = entry.with_reason(reason);
                }
                if let Err(e) = audit.record(entry).await {
                    error!(scan = %result.id, error = %e, "Failed to audit content scan");
                }
            }
        }

        if let Some(storage) = &self.storage {
            let record = ModerationRecord {
                id: result.id.clone(),
                principal_id: principal.map(String::from),
                is_allowed: result.is_allowed,
                categories: result.categories.clone(),
                reason: result.reason.clone(),
                created_at: result.timestamp,
            };
            if let Err(e) = storage.save_moderation(&record) {
                error!(scan = %result.id, error = %e, "Failed to save moderation record");
            }
        }
    }
}

/// Replace byte spans (possibly overlapping) with `placeholder`
fn redact(content: &str, mut spans: Vec<(usize, usize)>, placeholder: &str) -> String {
    spans.sort_unstable();
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if end <= cursor {
            continue;
        }
        let start = start.max(cursor);
        out.push_str(&content[cursor..start]);
        out.push_str(placeholder);
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}
