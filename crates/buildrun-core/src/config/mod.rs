//! Build configuration: the raw user-facing schema and its validated form.
//!
//! Raw configs arrive from a [`ConfigProvider`] (see [`loader`]) and are
//! validated into an immutable [`BuildConfig`] once per trigger.

pub mod loader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::matcher::CompiledMatchers;

pub use loader::{FileConfigProvider, CONFIG_FILE_NAMES};

/// Reference to a capture group, by index or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for GroupRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupRef::Index(i) => write!(f, "{i}"),
            GroupRef::Name(n) => write!(f, "`{n}`"),
        }
    }
}

/// Explicit matcher entry mapping capture groups to diagnostic fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherSpec {
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<GroupRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<GroupRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<GroupRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<GroupRef>,

    /// Capture holding the severity label.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub severity: Option<GroupRef>,

    /// Literal severity overriding the list default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_severity: Option<String>,
}

/// One matcher as written in a config file.
///
/// A bare string uses its named groups (`file`, `line`, `col`/`column`,
/// `message`, `type`/`severity`) as the field mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMatcher {
    Pattern(String),
    Detailed(MatcherSpec),
}

impl RawMatcher {
    pub fn pattern(&self) -> &str {
        match self {
            RawMatcher::Pattern(p) => p,
            RawMatcher::Detailed(spec) => &spec.pattern,
        }
    }
}

impl From<MatcherSpec> for RawMatcher {
    fn from(spec: MatcherSpec) -> Self {
        RawMatcher::Detailed(spec)
    }
}

/// `errorMatch` may be a single matcher or a list of them.
///
/// `Many` is tried first: a struct can also deserialize from a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatcherList {
    Many(Vec<RawMatcher>),
    One(RawMatcher),
}

impl Default for MatcherList {
    fn default() -> Self {
        MatcherList::Many(Vec::new())
    }
}

impl MatcherList {
    pub fn as_slice(&self) -> &[RawMatcher] {
        match self {
            MatcherList::One(m) => std::slice::from_ref(m),
            MatcherList::Many(v) => v,
        }
    }
}

impl From<Vec<RawMatcher>> for MatcherList {
    fn from(v: Vec<RawMatcher>) -> Self {
        MatcherList::Many(v)
    }
}

fn default_shell() -> bool {
    true
}

/// Build configuration exactly as the user wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBuildConfig {
    pub cmd: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_shell")]
    pub sh: bool,

    #[serde(default)]
    pub error_match: MatcherList,

    #[serde(default)]
    pub warning_match: MatcherList,

    /// 0 disables the limit.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl RawBuildConfig {
    /// Minimal config running `cmd` through the shell.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            name: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            sh: true,
            error_match: MatcherList::default(),
            warning_match: MatcherList::default(),
            timeout_secs: 0,
        }
    }

    pub fn with_error_match(mut self, matchers: Vec<RawMatcher>) -> Self {
        self.error_match = matchers.into();
        self
    }

    /// Check structural validity and resolve paths against `root`.
    ///
    /// Matchers are compiled separately and attached with
    /// [`BuildConfig::with_matchers`].
    pub fn validate(&self, root: &Path, origin: Option<&Path>) -> Result<BuildConfig, ConfigError> {
        let command = self.cmd.trim();
        if command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }

        let requested = match &self.cwd {
            Some(cwd) if cwd.is_absolute() => cwd.clone(),
            Some(cwd) => root.join(cwd),
            None => root.to_path_buf(),
        };
        let cwd = std::fs::canonicalize(&requested)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or(ConfigError::InvalidWorkingDirectory { path: requested })?;

        let timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));

        Ok(BuildConfig {
            name: self.name.clone(),
            command: command.to_string(),
            args: self.args.clone(),
            cwd,
            env: self.env.clone(),
            shell: self.sh,
            timeout,
            origin: origin.map(Path::to_path_buf),
            matchers: Arc::new(CompiledMatchers::default()),
        })
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Optional label from the config file.
    pub name: Option<String>,

    /// Trimmed, non-empty program or shell line.
    pub command: String,

    /// Passed verbatim without a shell, joined onto the line with one.
    pub args: Vec<String>,

    /// Absolute working directory.
    pub cwd: PathBuf,

    /// Merged over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Run through `sh -c` (`cmd /C` on Windows).
    pub shell: bool,

    /// Wall-clock limit; `None` means unlimited.
    pub timeout: Option<Duration>,

    /// File this configuration was loaded from, if any.
    pub origin: Option<PathBuf>,

    /// Matchers compiled from this configuration's `errorMatch`/`warningMatch`.
    pub matchers: Arc<CompiledMatchers>,
}

impl BuildConfig {
    pub fn with_matchers(mut self, matchers: Arc<CompiledMatchers>) -> Self {
        self.matchers = matchers;
        self
    }

    /// Label used in logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.command)
    }

    /// File attributed to diagnostics whose matcher captures no file.
    pub fn default_file(&self) -> &Path {
        self.origin.as_deref().unwrap_or(&self.cwd)
    }
}

/// A raw config tied to the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub origin: Option<PathBuf>,
    pub raw: RawBuildConfig,
}

impl ProjectConfig {
    pub fn new(root: impl Into<PathBuf>, raw: RawBuildConfig) -> Self {
        Self {
            root: root.into(),
            origin: None,
            raw,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn validate(&self) -> Result<BuildConfig, ConfigError> {
        self.raw.validate(&self.root, self.origin.as_deref())
    }
}

/// Source of the current project's configuration, consulted on every trigger.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn load(&self) -> Result<ProjectConfig, ConfigError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_config() {
        let raw: RawBuildConfig = serde_json::from_value(json!({ "cmd": "make" })).unwrap();
        assert_eq!(raw.cmd, "make");
        assert!(raw.sh);
        assert!(raw.args.is_empty());
        assert!(raw.error_match.as_slice().is_empty());
        assert_eq!(raw.timeout_secs, 0);
    }

    #[test]
    fn test_parse_matcher_forms() {
        let raw: RawBuildConfig = serde_json::from_value(json!({
            "cmd": "false",
            "errorMatch": [
                "(?P<file>[^:]+):(?P<line>\\d+)",
                { "pattern": "^(.{0,1})Error.*:(\\d+):(\\d+)", "line": 2, "column": 3, "message": "msg" }
            ],
            "warningMatch": "warning: (?P<message>.+)"
        }))
        .unwrap();

        let errors = raw.error_match.as_slice();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], RawMatcher::Pattern(_)));
        match &errors[1] {
            RawMatcher::Detailed(spec) => {
                assert_eq!(spec.line, Some(GroupRef::Index(2)));
                assert_eq!(spec.column, Some(GroupRef::Index(3)));
                assert_eq!(spec.message, Some(GroupRef::Name("msg".to_string())));
                assert_eq!(spec.file, None);
            }
            other => panic!("expected detailed matcher, got {:?}", other),
        }
        assert_eq!(raw.warning_match.as_slice().len(), 1);
    }

    #[test]
    fn test_single_element_list_stays_a_string_matcher() {
        let list: MatcherList = serde_json::from_value(json!(["(?P<line>\\d+)"])).unwrap();
        assert!(matches!(list.as_slice(), [RawMatcher::Pattern(_)]));
    }

    #[test]
    fn test_parse_type_field_is_severity_capture() {
        let spec: MatcherSpec = serde_json::from_value(json!({
            "pattern": "(error|warning): (.+)",
            "type": 1,
            "message": 2,
            "defaultSeverity": "info"
        }))
        .unwrap();
        assert_eq!(spec.severity, Some(GroupRef::Index(1)));
        assert_eq!(spec.default_severity.as_deref(), Some("info"));
    }

    #[test]
    fn test_validate_rejects_blank_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawBuildConfig::new("   ").validate(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCommand));
    }

    #[test]
    fn test_validate_rejects_missing_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = RawBuildConfig::new("make");
        raw.cwd = Some(PathBuf::from("does-not-exist"));
        let err = raw.validate(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkingDirectory { .. }));
    }

    #[test]
    fn test_validate_resolves_relative_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut raw = RawBuildConfig::new("make");
        raw.cwd = Some(PathBuf::from("sub"));
        raw.timeout_secs = 5;

        let config = raw.validate(dir.path(), None).unwrap();
        assert!(config.cwd.is_absolute());
        assert!(config.cwd.ends_with("sub"));
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(config.matchers.is_empty());
    }

    #[test]
    fn test_default_file_prefers_origin() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join(".buildrun.json");

        let config = RawBuildConfig::new("make")
            .validate(dir.path(), Some(&origin))
            .unwrap();
        assert_eq!(config.default_file(), origin.as_path());

        let config = RawBuildConfig::new("make").validate(dir.path(), None).unwrap();
        assert_eq!(config.default_file(), config.cwd.as_path());
    }
}
