//! Name-pattern criticality heuristic

use crate::error::OptimizeError;
use crate::record::Classification;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Patterns marking an asset as critical
pub const DEFAULT_CRITICAL_PATTERNS: &[&str] = &["main", "runtime", "vendor", "critical", "above-fold"];

static DEFAULT_CLASSIFIER: Lazy<Classifier> = Lazy::new(|| {
    Classifier::new(DEFAULT_CRITICAL_PATTERNS).expect("default critical patterns are valid")
});

/// Case-insensitive substring match against the URL path
#[derive(Debug, Clone)]
pub struct Classifier {
    pattern: Option<Regex>,
}

impl Classifier {
    /// Build from literal patterns
    ///
    /// Patterns are matched literally; an empty list classifies everything as
    /// non-critical.
    ///
    /// # Errors
    /// [`OptimizeError::Pattern`] if the combined expression is too large
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, OptimizeError> {
        let alternatives: Vec<String> = patterns
            .iter()
            .map(AsRef::as_ref)
            .filter(|pattern| !pattern.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Classifier over [`DEFAULT_CRITICAL_PATTERNS`]
    #[must_use]
    pub fn default_patterns() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }

    /// Classify `url`; query and fragment are ignored
    #[must_use]
    pub fn classify(&self, url: &str) -> Classification {
        let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
        match &self.pattern {
            Some(pattern) if pattern.is_match(path) => Classification::Critical,
            _ => Classification::NonCritical,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::default_patterns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("/css/main.css"), Classification::Critical);
        assert_eq!(classifier.classify("/js/Runtime.4f2a.js"), Classification::Critical);
        assert_eq!(classifier.classify("/img/above-fold-hero.jpg"), Classification::Critical);
        assert_eq!(classifier.classify("/js/analytics.js"), Classification::NonCritical);
    }

    #[test]
    fn query_does_not_count() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("/js/widget.js?entry=main"), Classification::NonCritical);
    }

    #[test]
    fn patterns_are_literal() {
        let classifier = Classifier::new(&["app.min", "(x)"]).unwrap();
        assert_eq!(classifier.classify("/app.min.js"), Classification::Critical);
        assert_eq!(classifier.classify("/appxmin.js"), Classification::NonCritical);
        assert_eq!(classifier.classify("/lib(x).js"), Classification::Critical);
    }

    #[test]
    fn empty_patterns_classify_nothing_as_critical() {
        let classifier = Classifier::new::<&str>(&[]).unwrap();
        assert_eq!(classifier.classify("/main.css"), Classification::NonCritical);
    }
}
