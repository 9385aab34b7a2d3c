//! Pattern Recognizer (C11): tokenizes a message's variable shapes into a
//! template with placeholders, memoized in an LRU cache.
//!
//! Same `lru::LruCache` choice as the Search Cache (C4), applied here to
//! message→template memoization instead of query→results.

use crate::index::IndexEngine;
use crate::model::LogRecord;
use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});
static IP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bhttps?://[^\s]+").unwrap());
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?\b").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap());

/// A message rewritten with placeholders, plus the original values that
/// were collapsed into each placeholder, in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub template: String,
    pub captures: Vec<(String, String)>,
}

/// Fixed order matches spec.md's table: matching earlier patterns first
/// prevents e.g. a UUID's digits from also being swallowed by `{{NUMBER}}`.
const PASSES: &[(&str, &Lazy<Regex>)] = &[
    ("UUID", &UUID_RE),
    ("IP_ADDRESS", &IP_RE),
    ("EMAIL", &EMAIL_RE),
    ("URL", &URL_RE),
    ("TIMESTAMP", &TIMESTAMP_RE),
    ("NUMBER", &NUMBER_RE),
];

fn build_template(message: &str) -> Template {
    let mut result = message.to_string();
    let mut captures = Vec::new();
    for (name, re) in PASSES {
        let placeholder = format!("{{{{{name}}}}}");
        let mut next = String::with_capacity(result.len());
        let mut last = 0;
        for m in re.find_iter(&result) {
            next.push_str(&result[last..m.start()]);
            next.push_str(&placeholder);
            captures.push((name.to_string(), m.as_str().to_string()));
            last = m.end();
        }
        next.push_str(&result[last..]);
        result = next;
    }
    Template {
        template: result,
        captures,
    }
}

pub struct PatternRecognizer {
    cache: Mutex<LruCache<String, Template>>,
}

impl PatternRecognizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
        }
    }

    pub fn recognize(&self, message: &str) -> Template {
        let mut guard = self.cache.lock().unwrap();
        if let Some(hit) = guard.get(message) {
            return hit.clone();
        }
        let template = build_template(message);
        guard.put(message.to_string(), template.clone());
        template
    }

    /// Groups `records` by their recognized template and counts occurrences.
    pub fn tally(&self, records: &[LogRecord]) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for record in records {
            let template = self.recognize(&record.message).template;
            *counts.entry(template).or_insert(0) += 1;
        }
        counts
    }

    /// `mostCommonPatterns(timeRange, topN)`: searches the index for the
    /// time range, tallies templates, and returns the top `top_n` by count.
    pub async fn most_common_patterns(
        &self,
        index: &IndexEngine,
        start: Option<i64>,
        end: Option<i64>,
        top_n: usize,
    ) -> crate::error::Result<Vec<(String, u64)>> {
        let records = index.search("*", false, start, end).await?;
        let counts = self.tally(&records);
        let mut sorted: Vec<(String, u64)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(top_n);
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_uuid_and_number() {
        let recognizer = PatternRecognizer::new(100);
        let template = recognizer.recognize("user 550e8400-e29b-41d4-a716-446655440000 retried 3 times");
        assert_eq!(template.template, "user {{UUID}} retried {{NUMBER}} times");
    }

    #[test]
    fn repeated_matches_of_same_type_collapse_to_same_placeholder() {
        let recognizer = PatternRecognizer::new(100);
        let template = recognizer.recognize("from 10.0.0.1 to 10.0.0.2");
        assert_eq!(template.template, "from {{IP_ADDRESS}} to {{IP_ADDRESS}}");
        assert_eq!(template.captures.len(), 2);
    }

    #[test]
    fn recognizes_email_and_url() {
        let recognizer = PatternRecognizer::new(100);
        let template = recognizer.recognize("contact admin@example.com or visit https://example.com/help");
        assert_eq!(template.template, "contact {{EMAIL}} or visit {{URL}}");
    }

    #[test]
    fn cache_hit_returns_identical_template() {
        let recognizer = PatternRecognizer::new(2);
        let first = recognizer.recognize("request 42 failed");
        let second = recognizer.recognize("request 42 failed");
        assert_eq!(first, second);
    }

    #[test]
    fn tally_groups_by_template() {
        use crate::model::{LogLevel, LogRecord};
        let recognizer = PatternRecognizer::new(100);
        let records = vec![
            LogRecord::new(1, LogLevel::Info, "request 1 failed", "s", "request 1 failed"),
            LogRecord::new(2, LogLevel::Info, "request 2 failed", "s", "request 2 failed"),
        ];
        let counts = recognizer.tally(&records);
        assert_eq!(counts.get("request {{NUMBER}} failed"), Some(&2));
    }
}
