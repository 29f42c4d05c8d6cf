//! Keyword pattern matching against message bodies.

use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::config::{ConfigError, PatternConfig, PatternFlag};

/// A single compiled keyword pattern.
#[derive(Clone)]
pub struct CompiledPattern {
    source: String,
    flags: Vec<PatternFlag>,
    regex: Regex,
}

impl std::fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("source", &self.source)
            .field("flags", &self.flags)
            .finish()
    }
}

impl CompiledPattern {
    /// Compile a pattern that must match the whole subject.
    pub fn new(pattern: &str, flags: &[PatternFlag]) -> Result<Self, regex::Error> {
        // The text must stand on its own before it is wrapped, or an
        // unbalanced `)` could close the anchoring group early.
        builder(pattern, flags).build()?;

        // Anchors are absolute so multi-line mode cannot turn a full match
        // into a per-line one. In comments mode a trailing `#` comment would
        // swallow the closing group, so end the pattern on its own line.
        let anchored = if flags.contains(&PatternFlag::Comments) {
            format!("\\A(?:{pattern}\n)\\z")
        } else {
            format!(r"\A(?:{pattern})\z")
        };

        Ok(Self {
            source: pattern.to_string(),
            flags: flags.to_vec(),
            regex: builder(&anchored, flags).build()?,
        })
    }

    /// Check whether the entire subject matches.
    pub fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    /// Pattern text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn builder(pattern: &str, flags: &[PatternFlag]) -> RegexBuilder {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags {
        match flag {
            PatternFlag::CaseInsensitive => builder.case_insensitive(true),
            PatternFlag::MultiLine => builder.multi_line(true),
            PatternFlag::DotAll => builder.dot_matches_new_line(true),
            PatternFlag::Comments => builder.ignore_whitespace(true),
            // Unicode mode is always on for `&str` regexes, so case folding
            // already covers non-ASCII letters. Accepted for old configs.
            PatternFlag::UnicodeCase => &mut builder,
        };
    }
    builder
}

/// Ordered set of keyword patterns; the first full match wins.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    patterns: Vec<CompiledPattern>,
}

impl PatternMatcher {
    /// Compile every configured pattern, failing on the first bad one.
    pub fn compile(configs: &[PatternConfig]) -> Result<Self, ConfigError> {
        let patterns = configs
            .iter()
            .enumerate()
            .map(|(index, cfg)| {
                CompiledPattern::new(&cfg.pattern, &cfg.flags)
                    .map_err(|source| ConfigError::PatternCompile { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Index of the first pattern matching the whole body.
    pub fn match_body(&self, body: &str) -> Option<usize> {
        let found = self.patterns.iter().position(|p| p.matches(body));
        trace!(matched = ?found, patterns = self.patterns.len(), "pattern match");
        found
    }

    pub fn get(&self, index: usize) -> Option<&CompiledPattern> {
        self.patterns.get(index)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str, flags: &[PatternFlag]) -> PatternConfig {
        PatternConfig {
            pattern: p.to_string(),
            flags: flags.to_vec(),
        }
    }

    #[test]
    fn test_full_string_semantics() {
        let p = CompiledPattern::new("STOP", &[]).unwrap();
        assert!(p.matches("STOP"));
        assert!(!p.matches("STOP NOW"));
        assert!(!p.matches("PLEASE STOP"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let p = CompiledPattern::new("STOP|END", &[]).unwrap();
        assert!(p.matches("END"));
        assert!(!p.matches("STOPPED"));
        assert!(!p.matches("THE END"));
    }

    #[test]
    fn test_case_insensitive() {
        let p = CompiledPattern::new("stop", &[PatternFlag::CaseInsensitive]).unwrap();
        assert!(p.matches("StOp"));
        assert!(!CompiledPattern::new("stop", &[]).unwrap().matches("STOP"));
    }

    #[test]
    fn test_multi_line_keeps_full_match() {
        let p = CompiledPattern::new("^STOP$", &[PatternFlag::MultiLine]).unwrap();
        assert!(p.matches("STOP"));
        assert!(!p.matches("STOP\nextra"));
    }

    #[test]
    fn test_dot_all() {
        assert!(!CompiledPattern::new("STOP.*", &[]).unwrap().matches("STOP\nnow"));
        assert!(CompiledPattern::new("STOP.*", &[PatternFlag::DotAll])
            .unwrap()
            .matches("STOP\nnow"));
    }

    #[test]
    fn test_comments_flag() {
        let p = CompiledPattern::new("S T O P  # keyword", &[PatternFlag::Comments]).unwrap();
        assert!(p.matches("STOP"));
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = PatternMatcher::compile(&[
            pattern("HELP", &[]),
            pattern("STOP.*", &[]),
            pattern("STOP", &[]),
        ])
        .unwrap();

        assert_eq!(matcher.match_body("STOP"), Some(1));
        assert_eq!(matcher.match_body("HELP"), Some(0));
        assert_eq!(matcher.match_body("HELLO"), None);
    }

    #[test]
    fn test_empty_matcher() {
        let matcher = PatternMatcher::compile(&[]).unwrap();
        assert!(matcher.is_empty());
        assert_eq!(matcher.match_body("anything"), None);
    }

    #[test]
    fn test_compile_error_reports_index() {
        let result = PatternMatcher::compile(&[pattern("ok", &[]), pattern("(unclosed", &[])]);
        assert!(matches!(result, Err(ConfigError::PatternCompile { index: 1, .. })));
    }

    #[test]
    fn test_unbalanced_group_cannot_escape_anchors() {
        for text in ["a)|(b", "a)(?:b", "x)"] {
            assert!(CompiledPattern::new(text, &[]).is_err(), "{text} compiled");
        }

        let result = PatternMatcher::compile(&[pattern("a)|(b", &[])]);
        assert!(matches!(result, Err(ConfigError::PatternCompile { index: 0, .. })));
    }

    #[test]
    fn test_case_folding_is_unicode_aware() {
        let plain = CompiledPattern::new("café", &[PatternFlag::CaseInsensitive]).unwrap();
        let unicode = CompiledPattern::new(
            "café",
            &[PatternFlag::CaseInsensitive, PatternFlag::UnicodeCase],
        )
        .unwrap();

        assert!(plain.matches("CAFÉ"));
        assert!(unicode.matches("CAFÉ"));
        assert!(!CompiledPattern::new("café", &[PatternFlag::UnicodeCase])
            .unwrap()
            .matches("CAFÉ"));
    }
}
