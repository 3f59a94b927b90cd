//! Tag pattern matching
//!
//! Plan tags ("D-101", "W-3") are identified by prefix. Recognized text is
//! compared against the configured prefixes and the first hit wins.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A tag family and the schedule table its tags refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPattern {
    pub id: String,
    pub prefix: String,
    pub description: String,
    pub schedule_table: String,
    #[serde(default)]
    pub linked_annotations: Vec<String>,
}

impl TagPattern {
    pub fn new(id: impl Into<String>, prefix: impl Into<String>, schedule_table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prefix: prefix.into(),
            description: String::new(),
            schedule_table: schedule_table.into(),
            linked_annotations: Vec::new(),
        }
    }
}

/// Recognized text matched to a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPatternMatch {
    pub pattern: TagPattern,
    /// 0 - 100
    pub confidence: f32,
    /// Trimmed, upper-cased text that matched
    pub text: String,
}

/// Find the first pattern whose prefix starts `text`, case-insensitively
pub fn match_tag_pattern(text: &str, patterns: &[TagPattern]) -> Option<TagPatternMatch> {
    let clean = text.trim().to_uppercase();
    if clean.is_empty() {
        return None;
    }

    let found = patterns.iter().find_map(|pattern| {
        let prefix = pattern.prefix.trim().to_uppercase();
        if prefix.is_empty() || !clean.starts_with(&prefix) {
            return None;
        }
        Some(TagPatternMatch {
            pattern: pattern.clone(),
            confidence: match_confidence(&clean, &prefix),
            text: clean.clone(),
        })
    });

    if let Some(m) = &found {
        debug!(pattern = %m.pattern.id, confidence = m.confidence, "tag pattern matched");
    }
    found
}

/// Prefix coverage averaged with a penalty for very short text
fn match_confidence(text: &str, prefix: &str) -> f32 {
    let text_len = text.chars().count() as f32;
    let coverage = prefix.chars().count() as f32 / text_len * 100.0;
    let quality = if text_len > 2.0 { 100.0 } else { 50.0 };
    (coverage + quality) / 2.0
}
