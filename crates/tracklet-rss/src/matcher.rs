//! Filter-rule matchers: compilation, validation and the per-rule cache.
//!
//! A regex that fails to compile is rejected when the rule is created,
//! never at evaluation time. Compiled matchers are cached keyed by
//! `(rule_id, updated_at)`, so editing a rule invalidates its entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracklet_core::model::MAX_PATTERN_LEN;
use tracklet_core::{FilterRule, MatchField, PatternType, TorrentItem};

/// Failures surfaced by rule validation and compilation.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The pattern is empty or exceeds the accepted length.
    #[error("pattern length {length} outside 1..={MAX_PATTERN_LEN}")]
    BadLength {
        /// Offending length.
        length: usize,
    },
    /// The regex did not compile.
    #[error("pattern does not compile: {message}")]
    BadPattern {
        /// Compiler error description.
        message: String,
    },
}

/// A compiled, immediately usable matcher.
#[derive(Debug)]
pub enum CompiledMatcher {
    /// Case-insensitive substring.
    Keyword(String),
    /// Anchored case-insensitive regex (also the compiled form of
    /// wildcards).
    Pattern(Regex),
}

impl CompiledMatcher {
    /// Whether the matcher accepts `text`.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Keyword(needle) => text.to_lowercase().contains(needle),
            Self::Pattern(regex) => regex.is_match(text),
        }
    }

    /// Whether the matcher accepts any of the rule's configured fields.
    #[must_use]
    pub fn matches_item(&self, field: MatchField, item: &TorrentItem, tag: Option<&str>) -> bool {
        let tag_text = tag.unwrap_or("");
        match field {
            MatchField::Title => self.matches(&item.title),
            MatchField::Tag => self.matches(tag_text),
            MatchField::Both => self.matches(&item.title) || self.matches(tag_text),
        }
    }
}

/// Validate a rule the way creation-time validation must: length bounds
/// plus a full compile.
///
/// # Errors
///
/// Returns [`MatcherError`] describing the first problem found.
pub fn validate_rule(rule: &FilterRule) -> Result<(), MatcherError> {
    compile(rule).map(|_| ())
}

/// Compile a rule's pattern.
///
/// # Errors
///
/// Returns [`MatcherError`] for empty, oversized or non-compiling patterns.
pub fn compile(rule: &FilterRule) -> Result<CompiledMatcher, MatcherError> {
    let pattern = rule.pattern.trim();
    if pattern.is_empty() || pattern.len() > MAX_PATTERN_LEN {
        return Err(MatcherError::BadLength {
            length: pattern.len(),
        });
    }

    match rule.pattern_type {
        PatternType::Keyword => Ok(CompiledMatcher::Keyword(pattern.to_lowercase())),
        PatternType::Wildcard => build_regex(&wildcard_to_regex(pattern)),
        PatternType::Regex => build_regex(pattern),
    }
}

fn build_regex(pattern: &str) -> Result<CompiledMatcher, MatcherError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(CompiledMatcher::Pattern)
        .map_err(|error| MatcherError::BadPattern {
            message: error.to_string(),
        })
}

/// Translate a `*`/`?` glob into an anchored regex.
#[must_use]
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}

/// Shared cache of compiled matchers keyed by `(rule_id, updated_at)`.
#[derive(Default)]
pub struct MatcherCache {
    entries: RwLock<HashMap<uuid::Uuid, (DateTime<Utc>, Arc<CompiledMatcher>)>>,
}

impl MatcherCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled form of a rule, compiling on miss or when the
    /// rule changed since the cached compile.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError`] when compilation fails; creation-time
    /// validation makes this unreachable for stored rules.
    pub fn get(&self, rule: &FilterRule) -> Result<Arc<CompiledMatcher>, MatcherError> {
        if let Ok(entries) = self.entries.read() {
            if let Some((version, matcher)) = entries.get(&rule.id) {
                if *version == rule.updated_at {
                    return Ok(Arc::clone(matcher));
                }
            }
        }

        let compiled = Arc::new(compile(rule)?);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(rule.id, (rule.updated_at, Arc::clone(&compiled)));
        }
        Ok(compiled)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn rule(pattern: &str, pattern_type: PatternType) -> FilterRule {
        let now = Utc::now();
        FilterRule {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            pattern: pattern.to_string(),
            pattern_type,
            match_field: MatchField::Title,
            require_free: false,
            priority: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn keyword_matches_are_case_insensitive_substrings() {
        let matcher = compile(&rule("game of thrones", PatternType::Keyword)).expect("compiles");
        assert!(matcher.matches("Game.Of.Thrones.S01E01 [GAME OF THRONES]"));
        assert!(matcher.matches("a game of thrones b"));
        assert!(!matcher.matches("The Office"));
    }

    #[test]
    fn wildcard_star_brackets_match_anything() {
        let matcher = compile(&rule("*movie*", PatternType::Wildcard)).expect("compiles");
        assert!(matcher.matches("Test.Movie.2025"));
        assert!(matcher.matches("movie"));
        assert!(!matcher.matches("film"));

        let exact = compile(&rule("S01E0?", PatternType::Wildcard)).expect("compiles");
        assert!(exact.matches("S01E01"));
        assert!(exact.matches("s01e09"));
        assert!(!exact.matches("S01E10x"));
    }

    #[test]
    fn wildcard_escapes_regex_metacharacters() {
        let matcher = compile(&rule("a.b*", PatternType::Wildcard)).expect("compiles");
        assert!(matcher.matches("a.b.c"));
        assert!(!matcher.matches("aXb"));
    }

    #[test]
    fn invalid_regex_is_a_creation_error() {
        let err = validate_rule(&rule("([unclosed", PatternType::Regex)).expect_err("rejected");
        assert!(matches!(err, MatcherError::BadPattern { .. }));

        let err = validate_rule(&rule("", PatternType::Keyword)).expect_err("empty");
        assert!(matches!(err, MatcherError::BadLength { .. }));

        let long = "x".repeat(MAX_PATTERN_LEN + 1);
        let err = validate_rule(&rule(&long, PatternType::Keyword)).expect_err("too long");
        assert!(matches!(err, MatcherError::BadLength { .. }));
    }

    #[test]
    fn cache_invalidates_on_rule_update() {
        let cache = MatcherCache::new();
        let mut keyword_rule = rule("office", PatternType::Keyword);

        let first = cache.get(&keyword_rule).expect("compiles");
        assert!(first.matches("The Office"));
        assert_eq!(cache.len(), 1);

        let again = cache.get(&keyword_rule).expect("cached");
        assert!(Arc::ptr_eq(&first, &again), "unchanged rule hits the cache");

        keyword_rule.pattern = "thrones".to_string();
        keyword_rule.updated_at = keyword_rule.updated_at + Duration::seconds(1);
        let recompiled = cache.get(&keyword_rule).expect("recompiles");
        assert!(!Arc::ptr_eq(&first, &recompiled));
        assert!(recompiled.matches("Game of Thrones"));
        assert_eq!(cache.len(), 1, "new version replaces the old entry");
    }

    #[test]
    fn match_fields_select_the_probed_text() {
        let matcher = compile(&rule("movies", PatternType::Keyword)).expect("compiles");
        let item = TorrentItem {
            title: "Some.Show".to_string(),
            ..TorrentItem::default()
        };
        assert!(!matcher.matches_item(MatchField::Title, &item, Some("movies")));
        assert!(matcher.matches_item(MatchField::Tag, &item, Some("movies")));
        assert!(matcher.matches_item(MatchField::Both, &item, Some("movies")));
    }
}
