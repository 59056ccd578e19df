//! Error-pattern matching: compiled matchers and the engine that applies them.

pub mod compiler;
pub mod engine;

use regex::Regex;

use crate::diagnostic::Severity;
use crate::error::PatternError;

pub use compiler::{compile, PatternCache};
pub use engine::{match_output, MatchContext, DEFAULT_FAILURE_TEXT};

/// Capture-group indices for each recognized diagnostic field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldMap {
    /// File path, resolved against the run's working directory.
    pub file: Option<usize>,

    /// 1-indexed line number.
    pub line: Option<usize>,

    /// 1-indexed column number.
    pub column: Option<usize>,

    /// Diagnostic text; the fallback text is used when absent or blank.
    pub message: Option<usize>,

    /// Severity label such as `error` or `warning`.
    pub severity: Option<usize>,
}

/// An executable matcher.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub regex: Regex,
    pub fields: FieldMap,
    pub default_severity: Severity,
}

impl MatchPattern {
    pub fn source(&self) -> &str {
        self.regex.as_str()
    }
}

/// Result of compiling a matcher configuration.
///
/// Valid entries keep their configuration order; invalid ones are reported
/// in `rejected` without affecting the rest.
#[derive(Debug, Clone, Default)]
pub struct CompiledMatchers {
    pub patterns: Vec<MatchPattern>,
    pub rejected: Vec<PatternError>,
}

impl CompiledMatchers {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}
