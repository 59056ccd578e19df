//! In-memory fakes for the coordinator's seams (testing only)
//!
//! `ScriptedRunner` never spawns anything: tests decide when and how each
//! run completes. `StaticConfig` hands out a fixed, swappable config.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{BuildConfig, ConfigProvider, ProjectConfig};
use crate::error::ConfigError;
use crate::process::{EventSender, ProcessEvent, ProcessOutcome, ProcessRunner, RunHandle, RunId};

pub use crate::sink::MemorySink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

struct StartedRun {
    config: Arc<BuildConfig>,
    handle: RunHandle,
    events: EventSender,
}

/// Records every start and completes runs only when told to.
#[derive(Default)]
pub struct ScriptedRunner {
    runs: Mutex<Vec<(RunId, StartedRun)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run ids in the order they were started.
    pub fn started(&self) -> Vec<RunId> {
        lock(&self.runs).iter().map(|(id, _)| *id).collect()
    }

    pub fn config_for(&self, run_id: RunId) -> Option<Arc<BuildConfig>> {
        lock(&self.runs)
            .iter()
            .find(|(id, _)| *id == run_id)
            .map(|(_, run)| Arc::clone(&run.config))
    }

    pub fn was_cancelled(&self, run_id: RunId) -> bool {
        lock(&self.runs)
            .iter()
            .any(|(id, run)| *id == run_id && run.handle.is_cancelled())
    }

    /// Deliver the completion of `run_id`. Returns `false` for unknown runs
    /// or when the coordinator is gone.
    pub fn complete(&self, run_id: RunId, outcome: ProcessOutcome) -> bool {
        let runs = lock(&self.runs);
        let Some((_, run)) = runs.iter().find(|(id, _)| *id == run_id) else {
            return false;
        };
        run.events.send(ProcessEvent { run_id, outcome }).is_ok()
    }

    /// Shorthand for an exit with `code` and `output`.
    pub fn exit(&self, run_id: RunId, code: i32, output: &str) -> bool {
        self.complete(
            run_id,
            ProcessOutcome::Exited {
                code: Some(code),
                output: output.to_string(),
                duration_ms: 0,
            },
        )
    }
}

impl ProcessRunner for ScriptedRunner {
    fn start(&self, run_id: RunId, config: Arc<BuildConfig>, events: EventSender) -> RunHandle {
        let handle = RunHandle::new(run_id, CancellationToken::new());
        lock(&self.runs).push((
            run_id,
            StartedRun {
                config,
                handle: handle.clone(),
                events,
            },
        ));
        handle
    }
}

// ---------------------------------------------------------------------------
// StaticConfig
// ---------------------------------------------------------------------------

/// Config provider returning whatever project config it currently holds.
#[derive(Debug)]
pub struct StaticConfig {
    project: Mutex<ProjectConfig>,
    loads: AtomicUsize,
}

impl StaticConfig {
    pub fn new(project: ProjectConfig) -> Self {
        Self {
            project: Mutex::new(project),
            loads: AtomicUsize::new(0),
        }
    }

    /// Replace the config seen by subsequent loads.
    pub fn set(&self, project: ProjectConfig) {
        *lock(&self.project) = project;
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigProvider for StaticConfig {
    async fn load(&self) -> Result<ProjectConfig, ConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.project).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawBuildConfig;

    #[tokio::test]
    async fn test_static_config_counts_loads() {
        let provider = StaticConfig::new(ProjectConfig::new("/tmp", RawBuildConfig::new("make")));
        provider.load().await.unwrap();
        provider.set(ProjectConfig::new("/tmp", RawBuildConfig::new("ninja")));
        let project = provider.load().await.unwrap();

        assert_eq!(project.raw.cmd, "ninja");
        assert_eq!(provider.load_count(), 2);
    }

    #[test]
    fn test_complete_unknown_run_is_false() {
        let runner = ScriptedRunner::new();
        assert!(!runner.exit(RunId(9), 1, ""));
        assert!(runner.started().is_empty());
    }
}
