//! Actor wrapper around [`BuildRunCoordinator`].
//!
//! The coordinator runs on its own task. Commands from any number of
//! [`CoordinatorHandle`] clones and completions from the process runner are
//! applied one at a time by that task.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::{BuildRun, BuildRunCoordinator, BuildStatus};
use crate::config::ProjectConfig;
use crate::error::{BuildError, ConfigError};
use crate::process::RunId;

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Trigger(Reply<Result<RunId, ConfigError>>),
    TriggerWith(Box<ProjectConfig>, Reply<Result<RunId, ConfigError>>),
    Cancel(Reply<()>),
    Snapshot(Reply<Option<BuildRun>>),
}

/// Cloneable handle to a running coordinator task.
///
/// The task stops once every handle is dropped, cancelling any run in flight.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<BuildStatus>,
}

/// Move `coordinator` onto its own task. Must be called within a tokio runtime.
pub fn spawn_coordinator(coordinator: BuildRunCoordinator) -> CoordinatorHandle {
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let status = coordinator.subscribe();
    tokio::spawn(run_loop(coordinator, rx));
    CoordinatorHandle { commands, status }
}

async fn run_loop(mut coordinator: BuildRunCoordinator, mut commands: mpsc::Receiver<Command>) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(&mut coordinator, command).await,
                None => break,
            },
            Some(event) = coordinator.next_event() => coordinator.handle_event(event),
        }
    }
    debug!("Coordinator service stopped");
}

async fn apply(coordinator: &mut BuildRunCoordinator, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Trigger(reply) => {
            let _ = reply.send(coordinator.trigger().await);
        }
        Command::TriggerWith(project, reply) => {
            let _ = reply.send(coordinator.trigger_with(&project));
        }
        Command::Cancel(reply) => {
            coordinator.cancel();
            let _ = reply.send(());
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(coordinator.current_run().cloned());
        }
    }
}

impl CoordinatorHandle {
    /// Load config and start a run. Resolves once the run is spawned.
    pub async fn trigger(&self) -> Result<RunId, BuildError> {
        let run_id = self.request(Command::Trigger).await?;
        Ok(run_id?)
    }

    pub async fn trigger_with(&self, project: ProjectConfig) -> Result<RunId, BuildError> {
        let project = Box::new(project);
        let run_id = self
            .request(|reply| Command::TriggerWith(project, reply))
            .await?;
        Ok(run_id?)
    }

    pub async fn cancel(&self) -> Result<(), BuildError> {
        self.request(Command::Cancel).await
    }

    /// Copy of the current (or most recent) run.
    pub async fn snapshot(&self) -> Result<Option<BuildRun>, BuildError> {
        self.request(Command::Snapshot).await
    }

    pub fn status(&self) -> BuildStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.status.clone()
    }

    /// Wait until no run is in flight and return the resulting status.
    pub async fn settled(&self) -> BuildStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current != BuildStatus::Running {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, BuildError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| BuildError::ServiceStopped)?;
        response.await.map_err(|_| BuildError::ServiceStopped)
    }
}
