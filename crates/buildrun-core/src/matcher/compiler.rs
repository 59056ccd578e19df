//! Compile raw matcher entries into executable [`MatchPattern`]s.

use std::collections::HashMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CompiledMatchers, FieldMap, MatchPattern};
use crate::config::{GroupRef, RawMatcher};
use crate::diagnostic::Severity;
use crate::error::PatternError;

/// Compiled configurations kept before the cache is flushed.
const CACHE_CAPACITY: usize = 32;

/// Compile `errorMatch` then `warningMatch` entries, in that order.
///
/// Entry indices in [`PatternError`]s count across both lists.
pub fn compile(error_match: &[RawMatcher], warning_match: &[RawMatcher]) -> CompiledMatchers {
    let entries = error_match
        .iter()
        .map(|m| (m, Severity::Error))
        .chain(warning_match.iter().map(|m| (m, Severity::Warning)));

    let mut compiled = CompiledMatchers::default();
    for (index, (raw, list_default)) in entries.enumerate() {
        match compile_one(index, raw, list_default) {
            Ok(pattern) => compiled.patterns.push(pattern),
            Err(err) => compiled.rejected.push(err),
        }
    }
    compiled
}

/// Whether some match of `source` could be zero-width.
///
/// Word boundaries and other look-arounds only match empty next to the right
/// characters, so the empty input alone does not decide it.
fn can_match_empty(source: &str, regex: &Regex) -> bool {
    let parsed = regex_syntax::ParserBuilder::new()
        .multi_line(true)
        .build()
        .parse(source);
    match parsed {
        Ok(hir) => hir.properties().minimum_len() == Some(0),
        Err(_) => regex.is_match(""),
    }
}

/// Compile one entry.
pub fn compile_one(
    index: usize,
    raw: &RawMatcher,
    list_default: Severity,
) -> Result<MatchPattern, PatternError> {
    let source = raw.pattern();
    let regex = RegexBuilder::new(source)
        .multi_line(true)
        .build()
        .map_err(|e| PatternError::InvalidRegex {
            index,
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;

    if can_match_empty(source, &regex) {
        return Err(PatternError::MatchesEmpty {
            index,
            pattern: source.to_string(),
        });
    }

    let (fields, default_severity) = match raw {
        RawMatcher::Pattern(_) => (named_fields(&regex), list_default),
        RawMatcher::Detailed(spec) => {
            let fields = FieldMap {
                file: resolve(index, &regex, "file", spec.file.as_ref())?,
                line: resolve(index, &regex, "line", spec.line.as_ref())?,
                column: resolve(index, &regex, "column", spec.column.as_ref())?,
                message: resolve(index, &regex, "message", spec.message.as_ref())?,
                severity: resolve(index, &regex, "type", spec.severity.as_ref())?,
            };
            let severity = match &spec.default_severity {
                Some(value) => {
                    Severity::from_label(value).ok_or_else(|| PatternError::UnknownSeverity {
                        index,
                        value: value.clone(),
                    })?
                }
                None => list_default,
            };
            (fields, severity)
        }
    };

    Ok(MatchPattern {
        regex,
        fields,
        default_severity,
    })
}

fn resolve(
    index: usize,
    regex: &Regex,
    field: &'static str,
    group: Option<&GroupRef>,
) -> Result<Option<usize>, PatternError> {
    let Some(group) = group else {
        return Ok(None);
    };

    let found = match group {
        GroupRef::Index(i) => (*i < regex.captures_len()).then_some(*i),
        GroupRef::Name(name) => group_index(regex, name),
    };

    found.map(Some).ok_or_else(|| PatternError::UnknownGroup {
        index,
        field,
        group: group.to_string(),
    })
}

fn group_index(regex: &Regex, name: &str) -> Option<usize> {
    regex.capture_names().position(|n| n == Some(name))
}

/// Field mapping for string matchers, taken from well-known group names.
fn named_fields(regex: &Regex) -> FieldMap {
    let find = |names: &[&str]| names.iter().find_map(|name| group_index(regex, name));
    FieldMap {
        file: find(&["file"]),
        line: find(&["line"]),
        column: find(&["col", "column"]),
        message: find(&["message"]),
        severity: find(&["type", "severity"]),
    }
}

/// Memoizes compiled matchers by a digest of their configuration.
#[derive(Debug, Default)]
pub struct PatternCache {
    entries: HashMap<String, Arc<CompiledMatchers>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the compiled form of the given lists, compiling on a miss.
    pub fn get_or_compile(
        &mut self,
        error_match: &[RawMatcher],
        warning_match: &[RawMatcher],
    ) -> Arc<CompiledMatchers> {
        let Some(key) = config_digest(error_match, warning_match) else {
            return Arc::new(compile(error_match, warning_match));
        };

        if let Some(hit) = self.entries.get(&key) {
            debug!(digest = %&key[..12], "Matcher cache hit");
            return Arc::clone(hit);
        }

        if self.entries.len() >= CACHE_CAPACITY {
            self.entries.clear();
        }

        let compiled = Arc::new(compile(error_match, warning_match));
        self.entries.insert(key, Arc::clone(&compiled));
        compiled
    }
}

/// SHA-256 over the serialized matcher lists.
fn config_digest(error_match: &[RawMatcher], warning_match: &[RawMatcher]) -> Option<String> {
    let bytes = serde_json::to_vec(&(error_match, warning_match)).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherSpec;

    fn detailed(pattern: &str) -> MatcherSpec {
        MatcherSpec {
            pattern: pattern.to_string(),
            ..MatcherSpec::default()
        }
    }

    #[test]
    fn test_compile_string_matcher_uses_named_groups() {
        let raw = RawMatcher::Pattern(
            r"(?P<file>[\w./]+):(?P<line>\d+):(?P<col>\d+): (?P<type>\w+): (?P<message>.+)"
                .to_string(),
        );
        let pattern = compile_one(0, &raw, Severity::Error).unwrap();
        assert_eq!(
            pattern.fields,
            FieldMap {
                file: Some(1),
                line: Some(2),
                column: Some(3),
                message: Some(5),
                severity: Some(4),
            }
        );
    }

    #[test]
    fn test_compile_detailed_matcher_by_index_and_name() {
        let mut spec = detailed(r"^(.{0,1})Error.*:(\d+):(?P<col>\d+)");
        spec.line = Some(GroupRef::Index(2));
        spec.column = Some(GroupRef::Name("col".to_string()));

        let pattern = compile_one(0, &spec.into(), Severity::Error).unwrap();
        assert_eq!(pattern.fields.line, Some(2));
        assert_eq!(pattern.fields.column, Some(3));
        assert_eq!(pattern.fields.file, None);
        assert_eq!(pattern.fields.message, None);
    }

    #[test]
    fn test_invalid_regex_is_isolated() {
        let good = RawMatcher::Pattern(r"error: (?P<message>.+)".to_string());
        let bad = RawMatcher::Pattern(r"error: (unclosed".to_string());

        let compiled = compile(&[good.clone(), bad, good], &[]);
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled.rejected.len(), 1);
        assert!(matches!(
            compiled.rejected[0],
            PatternError::InvalidRegex { index: 1, .. }
        ));
    }

    #[test]
    fn test_empty_matching_pattern_is_rejected() {
        for source in [".*", "x?", "^", "(?:)", r"\b", r"x*\b", r"\w*\b", r"(?m)$"] {
            let err = compile_one(0, &RawMatcher::Pattern(source.to_string()), Severity::Error)
                .unwrap_err();
            assert!(
                matches!(err, PatternError::MatchesEmpty { .. }),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn test_boundary_anchored_patterns_need_real_text() {
        for source in [r"\bfoo\b", r"^\s*error", r"x+\b"] {
            assert!(
                compile_one(0, &RawMatcher::Pattern(source.to_string()), Severity::Error).is_ok(),
                "{source} should compile"
            );
        }

        let compiled = compile(&[RawMatcher::Pattern(r"\b".to_string())], &[]);
        assert!(compiled.is_empty());
        assert_eq!(
            compiled.rejected,
            vec![PatternError::MatchesEmpty {
                index: 0,
                pattern: r"\b".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        let mut spec = detailed(r"(\d+)");
        spec.line = Some(GroupRef::Index(2));
        let err = compile_one(4, &spec.into(), Severity::Error).unwrap_err();
        assert_eq!(
            err,
            PatternError::UnknownGroup {
                index: 4,
                field: "line",
                group: "2".to_string(),
            }
        );

        let mut spec = detailed(r"(\d+)");
        spec.message = Some(GroupRef::Name("msg".to_string()));
        let err = compile_one(0, &spec.into(), Severity::Error).unwrap_err();
        assert!(matches!(err, PatternError::UnknownGroup { field: "message", .. }));
    }

    #[test]
    fn test_default_severity_literal() {
        let mut spec = detailed(r"note: (.+)");
        spec.default_severity = Some("info".to_string());
        let pattern = compile_one(0, &spec.into(), Severity::Error).unwrap();
        assert_eq!(pattern.default_severity, Severity::Info);

        let mut spec = detailed(r"note: (.+)");
        spec.default_severity = Some("loud".to_string());
        let err = compile_one(0, &spec.into(), Severity::Error).unwrap_err();
        assert!(matches!(err, PatternError::UnknownSeverity { .. }));
    }

    #[test]
    fn test_warning_list_defaults_and_indices() {
        let error = [RawMatcher::Pattern("boom".to_string())];
        let warning = [
            RawMatcher::Pattern("hmm".to_string()),
            RawMatcher::Pattern("(".to_string()),
        ];
        let compiled = compile(&error, &warning);
        assert_eq!(compiled.patterns[0].default_severity, Severity::Error);
        assert_eq!(compiled.patterns[1].default_severity, Severity::Warning);
        assert_eq!(compiled.rejected[0].index(), 2);
    }

    #[test]
    fn test_patterns_are_multi_line() {
        let pattern =
            compile_one(0, &RawMatcher::Pattern("^Error".to_string()), Severity::Error).unwrap();
        assert_eq!(pattern.regex.find_iter("ok\nError\nError").count(), 2);
    }

    #[test]
    fn test_cache_reuses_identical_config() {
        let mut cache = PatternCache::new();
        let error = vec![RawMatcher::Pattern("boom".to_string())];

        let first = cache.get_or_compile(&error, &[]);
        let second = cache.get_or_compile(&error, &[]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        // Same matcher moved to the warning list is a different config.
        let third = cache.get_or_compile(&[], &error);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 2);
    }
}
