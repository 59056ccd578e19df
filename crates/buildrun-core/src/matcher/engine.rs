//! Apply compiled matchers to finished build output.
//!
//! Ordering rule: matchers are applied in configuration order, and each
//! matcher contributes every non-overlapping match in text order. The final
//! list is the concatenation of those per-matcher lists, so a later matcher's
//! hit never jumps ahead of an earlier matcher's, wherever it sits in the text.

use std::path::{Path, PathBuf};

use regex::Captures;

use super::MatchPattern;
use crate::diagnostic::{Diagnostic, Severity};

/// Text used when a matcher has no message capture.
pub const DEFAULT_FAILURE_TEXT: &str = "Error from build";

/// Per-run inputs the engine needs besides the output itself.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// Base for relative file captures.
    pub cwd: &'a Path,

    /// File used when a matcher captures none.
    pub default_file: &'a Path,

    pub fallback_text: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn new(cwd: &'a Path, default_file: &'a Path) -> Self {
        Self {
            cwd,
            default_file,
            fallback_text: DEFAULT_FAILURE_TEXT,
        }
    }
}

/// Extract diagnostics from `output`.
pub fn match_output(output: &str, patterns: &[MatchPattern], ctx: &MatchContext<'_>) -> Vec<Diagnostic> {
    patterns
        .iter()
        .flat_map(|pattern| {
            pattern
                .regex
                .captures_iter(output)
                .filter(|caps| caps.get(0).is_some_and(|m| !m.is_empty()))
                .map(move |caps| build_diagnostic(pattern, &caps, ctx))
        })
        .collect()
}

fn build_diagnostic(pattern: &MatchPattern, caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Diagnostic {
    let fields = &pattern.fields;
    let group = |index: Option<usize>| index.and_then(|i| caps.get(i)).map(|m| m.as_str());

    let file_path = match group(fields.file).map(str::trim).filter(|f| !f.is_empty()) {
        Some(file) => resolve_file(ctx.cwd, file),
        None => ctx.default_file.to_path_buf(),
    };

    let row = zero_indexed(group(fields.line));
    let column = zero_indexed(group(fields.column));

    let text = group(fields.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(ctx.fallback_text)
        .to_string();

    let severity = group(fields.severity)
        .and_then(Severity::from_label)
        .unwrap_or(pattern.default_severity);

    Diagnostic::point(file_path, row, column, text, severity)
}

fn resolve_file(cwd: &Path, captured: &str) -> PathBuf {
    let path = Path::new(captured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// 1-indexed capture to 0-indexed coordinate; absent or garbage is 0.
fn zero_indexed(captured: Option<&str>) -> u32 {
    captured
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map_or(0, |n| n.saturating_sub(1))
}
