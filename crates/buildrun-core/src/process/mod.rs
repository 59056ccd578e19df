//! Supervised execution of the configured build command.

pub mod runner;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BuildConfig;
use crate::error::SpawnError;

pub use runner::{TokioProcessRunner, DEFAULT_GRACE_PERIOD};

/// Monotonically increasing identifier of one build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited. `code` is `None` when a signal killed it.
    Exited {
        code: Option<i32>,
        output: String,
        duration_ms: u64,
    },

    SpawnFailed(SpawnError),

    /// The configured limit elapsed; `output` is what arrived before it.
    TimedOut { output: String, limit_secs: u64 },

    Cancelled,
}

/// Terminal event for one run, tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub run_id: RunId,
    pub outcome: ProcessOutcome,
}

pub type EventSender = mpsc::UnboundedSender<ProcessEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// Cancellation handle for one started run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    token: CancellationToken,
}

impl RunHandle {
    pub fn new(run_id: RunId, token: CancellationToken) -> Self {
        Self { run_id, token }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Request termination. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Starts build processes.
///
/// Implementations must deliver exactly one [`ProcessEvent`] per started run
/// on `events`, including for cancelled runs.
pub trait ProcessRunner: Send + Sync {
    fn start(&self, run_id: RunId, config: Arc<BuildConfig>, events: EventSender) -> RunHandle;
}
