//! Error taxonomy for build runs.

use std::path::PathBuf;

/// The supplied configuration cannot start a run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("build config has no command")]
    MissingCommand,

    #[error("working directory does not exist or is not a directory: {}", path.display())]
    InvalidWorkingDirectory { path: PathBuf },

    #[error("no build config found in {}", root.display())]
    NotFound { root: PathBuf },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single matcher entry was rejected at compile time.
///
/// Rejection is per entry: the remaining matchers still compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("matcher #{index}: invalid regular expression `{pattern}`: {reason}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("matcher #{index}: pattern `{pattern}` can match the empty string")]
    MatchesEmpty { index: usize, pattern: String },

    #[error("matcher #{index}: field `{field}` refers to unknown capture group {group}")]
    UnknownGroup {
        index: usize,
        field: &'static str,
        group: String,
    },

    #[error("matcher #{index}: unknown default severity `{value}`")]
    UnknownSeverity { index: usize, value: String },
}

impl PatternError {
    /// Position of the rejected entry in the combined matcher list.
    pub fn index(&self) -> usize {
        match self {
            PatternError::InvalidRegex { index, .. }
            | PatternError::MatchesEmpty { index, .. }
            | PatternError::UnknownGroup { index, .. }
            | PatternError::UnknownSeverity { index, .. } => *index,
        }
    }
}

/// Why a command could not be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnErrorKind {
    NotFound,
    PermissionDenied,
    Other,
}

/// The command could not be launched at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to launch `{command}`: {message}")]
pub struct SpawnError {
    pub command: String,
    pub kind: SpawnErrorKind,
    pub message: String,
}

impl SpawnError {
    pub fn from_io(command: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => SpawnErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => SpawnErrorKind::PermissionDenied,
            _ => SpawnErrorKind::Other,
        };
        Self {
            command: command.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

/// Umbrella error for everything a build can end with.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("build exited with {}", describe_exit(*code))]
    ProcessExit { code: Option<i32> },

    #[error("build timed out after {limit_secs}s")]
    TimedOut { limit_secs: u64 },

    #[error("build was cancelled")]
    Cancelled,

    #[error("coordinator service has stopped")]
    ServiceStopped,
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
