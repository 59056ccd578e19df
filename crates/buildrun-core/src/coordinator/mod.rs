//! Build run coordination.
//!
//! [`BuildRunCoordinator`] owns the single-flight run lifecycle for one
//! project. Triggers, cancellations and process completions are all applied
//! through [`RunMachine`] on `&mut self`, so there is exactly one writer of
//! run state. Share it across tasks with [`spawn_coordinator`].

pub mod service;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::{ConfigProvider, ProjectConfig};
use crate::error::ConfigError;
use crate::matcher::PatternCache;
use crate::obs;
use crate::process::{EventReceiver, EventSender, ProcessEvent, ProcessRunner, RunHandle, RunId};
use crate::sink::DiagnosticSink;

pub use service::{spawn_coordinator, CoordinatorHandle};
pub use state::{BuildNotice, BuildRun, BuildStatus, Effect, Input, RunMachine, RunStatus};

pub struct BuildRunCoordinator {
    provider: Arc<dyn ConfigProvider>,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn DiagnosticSink>,
    machine: RunMachine,
    cache: PatternCache,
    active: Option<RunHandle>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    status_tx: watch::Sender<BuildStatus>,
}

impl BuildRunCoordinator {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        runner: Arc<dyn ProcessRunner>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(BuildStatus::None);
        Self {
            provider,
            runner,
            sink,
            machine: RunMachine::new(),
            cache: PatternCache::new(),
            active: None,
            events_tx,
            events_rx,
            status_tx,
        }
    }

    /// Load the project's config and start a run with it.
    ///
    /// On a config error nothing changes: no cancel, no clear, no spawn.
    pub async fn trigger(&mut self) -> Result<RunId, ConfigError> {
        let project = self.provider.load().await?;
        self.trigger_with(&project)
    }

    /// Start a run with an explicit config, superseding any run in flight.
    pub fn trigger_with(&mut self, project: &ProjectConfig) -> Result<RunId, ConfigError> {
        let config = project.validate()?;
        let matchers = self.cache.get_or_compile(
            project.raw.error_match.as_slice(),
            project.raw.warning_match.as_slice(),
        );
        for rejected in &matchers.rejected {
            obs::emit_pattern_rejected(rejected);
        }

        let (run_id, effects) = self.machine.start(Arc::new(config.with_matchers(matchers)));
        self.execute(effects);
        Ok(run_id)
    }

    /// Cancel the run in flight, if any. Published diagnostics are untouched.
    pub fn cancel(&mut self) {
        let effects = self.machine.apply(Input::Cancel);
        self.execute(effects);
    }

    /// Apply one completion from the runner.
    pub fn handle_event(&mut self, event: ProcessEvent) {
        let effects = self.machine.apply(Input::Finished(event));
        self.execute(effects);
    }

    /// Wait for the next completion from the runner.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events_rx.recv().await
    }

    /// Process completions until no run is in flight.
    pub async fn settle(&mut self) -> BuildStatus {
        while self.machine.is_running() {
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        self.status()
    }

    pub fn status(&self) -> BuildStatus {
        self.machine.status()
    }

    pub fn current_run(&self) -> Option<&BuildRun> {
        self.machine.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.status_tx.subscribe()
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CancelProcess(run_id) => {
                    if self.active.as_ref().is_some_and(|h| h.run_id() == run_id) {
                        if let Some(handle) = self.active.take() {
                            handle.cancel();
                        }
                    }
                }
                Effect::ClearSink => self.sink.set_messages(Vec::new()),
                Effect::Spawn { run_id, config } => {
                    let handle = self.runner.start(run_id, config, self.events_tx.clone());
                    self.active = Some(handle);
                }
                Effect::Publish(diagnostics) => self.sink.set_messages(diagnostics),
                Effect::Notify { run_id, notice } => obs::emit_build_notice(run_id, &notice),
            }
        }

        if !self.machine.is_running() {
            self.active = None;
        }
        self.status_tx.send_replace(self.machine.status());
    }
}

impl Drop for BuildRunCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawBuildConfig;
    use crate::fakes::{ScriptedRunner, StaticConfig};
    use crate::process::ProcessOutcome;
    use crate::sink::MemorySink;

    fn coordinator(
        dir: &std::path::Path,
    ) -> (BuildRunCoordinator, Arc<ScriptedRunner>, Arc<MemorySink>) {
        let provider = Arc::new(StaticConfig::new(ProjectConfig::new(
            dir,
            RawBuildConfig::new("make"),
        )));
        let runner = Arc::new(ScriptedRunner::new());
        let sink = Arc::new(MemorySink::new());
        let coordinator = BuildRunCoordinator::new(provider, runner.clone(), sink.clone());
        (coordinator, runner, sink)
    }

    #[tokio::test]
    async fn test_trigger_reports_running_on_watch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, runner, _sink) = coordinator(dir.path());
        let status = coordinator.subscribe();

        let run_id = coordinator.trigger().await.unwrap();
        assert_eq!(run_id, RunId(1));
        assert_eq!(*status.borrow(), BuildStatus::Running);
        assert_eq!(runner.started(), vec![RunId(1)]);
    }

    #[tokio::test]
    async fn test_settle_applies_scripted_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, runner, sink) = coordinator(dir.path());

        let run_id = coordinator.trigger().await.unwrap();
        runner.complete(
            run_id,
            ProcessOutcome::Exited {
                code: Some(0),
                output: String::new(),
                duration_ms: 0,
            },
        );

        assert_eq!(coordinator.settle().await, BuildStatus::Success);
        assert!(sink.is_empty());
        // One clear on trigger, one on success.
        assert_eq!(sink.update_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_active_run() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, runner, _sink) = coordinator(dir.path());
        let run_id = coordinator.trigger().await.unwrap();

        drop(coordinator);
        assert!(runner.was_cancelled(run_id));
    }
}
