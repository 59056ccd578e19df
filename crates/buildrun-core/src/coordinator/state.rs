//! Build run state machine.
//!
//! [`RunMachine`] is a reducer: it consumes [`Input`]s and returns the
//! [`Effect`]s the driver must perform, in order. It never touches a process
//! or a sink itself, so every transition can be exercised without spawning
//! anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BuildConfig;
use crate::diagnostic::Diagnostic;
use crate::error::{BuildError, SpawnError};
use crate::matcher::{match_output, MatchContext};
use crate::obs;
use crate::process::{ProcessEvent, ProcessOutcome, RunId};

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Status as shown to a UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    None,
    Running,
    Success,
    Error,
}

impl From<RunStatus> for BuildStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => BuildStatus::Running,
            RunStatus::Success => BuildStatus::Success,
            RunStatus::Failed => BuildStatus::Error,
            RunStatus::Cancelled => BuildStatus::None,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BuildStatus::None => "none",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Error => "error",
        })
    }
}

/// A failure the user should hear about that has no file location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildNotice {
    #[error("{0}")]
    SpawnFailed(SpawnError),

    #[error("build timed out after {limit_secs}s")]
    TimedOut { limit_secs: u64 },

    #[error("build process was killed by a signal")]
    Signalled,
}

/// One invocation of the build command.
#[derive(Debug, Clone)]
pub struct BuildRun {
    /// Identifier assigned when the trigger was accepted.
    pub run_id: RunId,

    pub status: RunStatus,

    /// Configuration snapshot the run was started with.
    pub config: Arc<BuildConfig>,

    /// Interleaved stdout and stderr; partial for timed-out runs.
    pub raw_output: String,

    /// Diagnostics published for this run, empty unless it failed.
    pub diagnostics: Vec<Diagnostic>,

    /// `None` while running, or when the process never exited on its own.
    pub exit_code: Option<i32>,

    /// Why a failed run produced no exit code, if it did not.
    pub notice: Option<BuildNotice>,

    pub started_at: DateTime<Utc>,

    /// Set once the run leaves `Running`.
    pub finished_at: Option<DateTime<Utc>>,
}

impl BuildRun {
    fn new(run_id: RunId, config: Arc<BuildConfig>) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            config,
            raw_output: String::new(),
            diagnostics: Vec::new(),
            exit_code: None,
            notice: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let finished = self.finished_at?;
        Some((finished - self.started_at).num_milliseconds().max(0) as u64)
    }

    /// The run's outcome as an error, if it did not succeed.
    pub fn error(&self) -> Option<BuildError> {
        match self.status {
            RunStatus::Running | RunStatus::Success => None,
            RunStatus::Cancelled => Some(BuildError::Cancelled),
            RunStatus::Failed => Some(match &self.notice {
                Some(BuildNotice::SpawnFailed(err)) => BuildError::Spawn(err.clone()),
                Some(BuildNotice::TimedOut { limit_secs }) => BuildError::TimedOut {
                    limit_secs: *limit_secs,
                },
                Some(BuildNotice::Signalled) | None => BuildError::ProcessExit {
                    code: self.exit_code,
                },
            }),
        }
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Something that happened to the coordinator.
#[derive(Debug, Clone)]
pub enum Input {
    Start(Arc<BuildConfig>),
    Cancel,
    Finished(ProcessEvent),
}

/// Work for the driver, performed in the order returned.
#[derive(Debug, Clone)]
pub enum Effect {
    CancelProcess(RunId),
    ClearSink,
    Spawn { run_id: RunId, config: Arc<BuildConfig> },
    Publish(Vec<Diagnostic>),
    Notify { run_id: RunId, notice: BuildNotice },
}

/// Single-flight run bookkeeping for one project.
#[derive(Debug, Default)]
pub struct RunMachine {
    last_id: u64,
    current: Option<BuildRun>,
}

impl RunMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> BuildStatus {
        self.current
            .as_ref()
            .map_or(BuildStatus::None, |run| run.status.into())
    }

    pub fn current(&self) -> Option<&BuildRun> {
        self.current.as_ref()
    }

    pub fn current_run_id(&self) -> Option<RunId> {
        self.current.as_ref().map(|run| run.run_id)
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(BuildRun::is_running)
    }

    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Start(config) => self.start(config).1,
            Input::Cancel => self.cancel(),
            Input::Finished(event) => self.finish(event),
        }
    }

    /// Accept a trigger: supersede any running run, clear, then spawn.
    pub fn start(&mut self, config: Arc<BuildConfig>) -> (RunId, Vec<Effect>) {
        self.last_id += 1;
        let run_id = RunId(self.last_id);
        let mut effects = Vec::with_capacity(3);

        if let Some(previous) = self.current.as_mut().filter(|run| run.is_running()) {
            previous.finish(RunStatus::Cancelled);
            obs::emit_run_superseded(previous.run_id, Some(run_id));
            effects.push(Effect::CancelProcess(previous.run_id));
        }

        effects.push(Effect::ClearSink);

        obs::emit_build_started(run_id, config.display_name(), config.matchers.len());
        self.current = Some(BuildRun::new(run_id, Arc::clone(&config)));
        effects.push(Effect::Spawn { run_id, config });

        (run_id, effects)
    }

    fn cancel(&mut self) -> Vec<Effect> {
        match self.current.as_mut().filter(|run| run.is_running()) {
            Some(run) => {
                run.finish(RunStatus::Cancelled);
                obs::emit_run_superseded(run.run_id, None);
                vec![Effect::CancelProcess(run.run_id)]
            }
            None => Vec::new(),
        }
    }

    fn finish(&mut self, event: ProcessEvent) -> Vec<Effect> {
        let current_id = self.current_run_id();
        let Some(run) = self
            .current
            .as_mut()
            .filter(|run| run.run_id == event.run_id && run.is_running())
        else {
            obs::emit_stale_event_discarded(event.run_id, current_id);
            return Vec::new();
        };

        let config = Arc::clone(&run.config);
        let ctx = MatchContext::new(&config.cwd, config.default_file());
        let mut effects = Vec::with_capacity(2);

        match event.outcome {
            ProcessOutcome::Exited {
                code: Some(0),
                output,
                ..
            } => {
                run.exit_code = Some(0);
                run.raw_output = output;
                run.finish(RunStatus::Success);
                effects.push(Effect::ClearSink);
            }
            ProcessOutcome::Exited { code, output, .. } => {
                run.exit_code = code;
                run.diagnostics = match_output(&output, &config.matchers.patterns, &ctx);
                run.raw_output = output;
                if code.is_none() {
                    run.notice = Some(BuildNotice::Signalled);
                }
                run.finish(RunStatus::Failed);
                effects.push(Effect::Publish(run.diagnostics.clone()));
            }
            ProcessOutcome::SpawnFailed(err) => {
                run.notice = Some(BuildNotice::SpawnFailed(err));
                run.finish(RunStatus::Failed);
                effects.push(Effect::Publish(Vec::new()));
            }
            ProcessOutcome::TimedOut { output, limit_secs } => {
                run.diagnostics = match_output(&output, &config.matchers.patterns, &ctx);
                run.raw_output = output;
                run.notice = Some(BuildNotice::TimedOut { limit_secs });
                run.finish(RunStatus::Failed);
                effects.push(Effect::Publish(run.diagnostics.clone()));
            }
            ProcessOutcome::Cancelled => {
                // Cancelled underneath us without going through `cancel`.
                run.finish(RunStatus::Cancelled);
            }
        }

        if let Some(notice) = &run.notice {
            effects.push(Effect::Notify {
                run_id: run.run_id,
                notice: notice.clone(),
            });
        }

        obs::emit_build_finished(
            run.run_id,
            run.status,
            run.diagnostics.len(),
            run.duration_ms().unwrap_or(0),
        );
        effects
    }
}
