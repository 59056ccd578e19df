//! Discovery and parsing of per-project build config files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ConfigProvider, ProjectConfig, RawBuildConfig};
use crate::error::ConfigError;

/// Config file names looked up in the project root, in priority order.
pub const CONFIG_FILE_NAMES: [&str; 2] = [".buildrun.json", ".buildrun.toml"];

/// Loads the build config from the project root on every call.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    root: PathBuf,
}

impl FileConfigProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First existing config file in the project root.
    pub async fn locate(&self) -> Result<PathBuf, ConfigError> {
        for name in CONFIG_FILE_NAMES {
            let candidate = self.root.join(name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(candidate);
            }
        }
        Err(ConfigError::NotFound {
            root: self.root.clone(),
        })
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> Result<ProjectConfig, ConfigError> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.root.clone(),
                source,
            })?;

        let path = FileConfigProvider::new(&root).locate().await?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;

        let raw = parse_config(&path, &text)?;
        debug!(path = %path.display(), cmd = %raw.cmd, "Loaded build config");

        Ok(ProjectConfig {
            root,
            origin: Some(path),
            raw,
        })
    }
}

/// Parse config text, choosing the format from the file extension.
pub fn parse_config(path: &Path, text: &str) -> Result<RawBuildConfig, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(text).map_err(|e| parse_err(e.to_string())),
        _ => serde_json::from_str(text).map_err(|e| parse_err(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".buildrun.json"),
            r#"{ "cmd": "make", "args": ["all"], "errorMatch": "(?P<file>\\S+):(?P<line>\\d+)" }"#,
        )
        .unwrap();

        let project = FileConfigProvider::new(dir.path()).load().await.unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(project.root, root);
        assert_eq!(project.origin, Some(root.join(".buildrun.json")));
        assert_eq!(project.raw.cmd, "make");
        assert_eq!(project.raw.args, vec!["all".to_string()]);
        assert_eq!(project.raw.error_match.as_slice().len(), 1);
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".buildrun.toml"),
            r#"
cmd = "cargo"
args = ["build"]
sh = false
timeoutSecs = 30

[[errorMatch]]
pattern = '^error: (.+)$'
message = 1
"#,
        )
        .unwrap();

        let project = FileConfigProvider::new(dir.path()).load().await.unwrap();
        assert_eq!(project.raw.cmd, "cargo");
        assert!(!project.raw.sh);
        assert_eq!(project.raw.timeout_secs, 30);
        assert_eq!(project.raw.error_match.as_slice().len(), 1);
    }

    #[tokio::test]
    async fn test_json_takes_priority_over_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".buildrun.json"), r#"{ "cmd": "from-json" }"#).unwrap();
        std::fs::write(dir.path().join(".buildrun.toml"), "cmd = \"from-toml\"\n").unwrap();

        let project = FileConfigProvider::new(dir.path()).load().await.unwrap();
        assert_eq!(project.raw.cmd, "from-json");
    }

    #[tokio::test]
    async fn test_missing_config_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfigProvider::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".buildrun.json"), "{ not json").unwrap();
        let err = FileConfigProvider::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
