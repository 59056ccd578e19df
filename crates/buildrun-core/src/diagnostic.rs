//! Structured diagnostics derived from build output.
//!
//! A [`Diagnostic`] serializes to the shape diagnostic consumers expect:
//!
//! ```json
//! { "filePath": "/abs/path", "range": [[2, 7], [2, 7]], "text": "...", "type": "Error" }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Map free-form text captured from build output onto a severity.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "fatal" => Some(Severity::Error),
            "warning" | "warn" => Some(Severity::Warning),
            "info" | "information" | "note" | "hint" => Some(Severity::Info),
            _ => None,
        }
    }

    /// Capitalized name, as written to the wire `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-indexed position in a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub row: u32,
    pub column: u32,
}

impl Position {
    /// Position from zero-indexed coordinates.
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

/// Zero-indexed `start..end` range, serialized as `[[row, col], [row, col]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RangeRepr", into = "RangeRepr")]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

type RangeRepr = [[u32; 2]; 2];

impl From<RangeRepr> for Range {
    fn from([[sr, sc], [er, ec]]: RangeRepr) -> Self {
        Range {
            start: Position::new(sr, sc),
            end: Position::new(er, ec),
        }
    }
}

impl From<Range> for RangeRepr {
    fn from(range: Range) -> Self {
        [
            [range.start.row, range.start.column],
            [range.end.row, range.end.column],
        ]
    }
}

impl Range {
    /// A range where start == end.
    pub fn point(row: u32, column: u32) -> Self {
        let at = Position::new(row, column);
        Self { start: at, end: at }
    }

    pub fn is_point(&self) -> bool {
        self.start == self.end
    }
}

/// A single finding extracted from build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Absolute path of the file the finding points at.
    pub file_path: PathBuf,

    pub range: Range,

    /// Human-readable message.
    pub text: String,

    #[serde(rename = "type")]
    pub severity: Severity,
}

impl Diagnostic {
    /// Create a point diagnostic.
    pub fn point(file_path: PathBuf, row: u32, column: u32, text: String, severity: Severity) -> Self {
        Self {
            file_path,
            range: Range::point(row, column),
            text,
            severity,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Human output is 1-indexed like compilers print it.
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file_path.display(),
            self.range.start.row + 1,
            self.range.start.column + 1,
            self.severity.as_str().to_ascii_lowercase(),
            self.text
        )
    }
}
