//! buildrun core library
//!
//! Runs a project's build command on demand, turns its output into
//! file-located diagnostics and publishes them to a sink.

pub mod config;
pub mod coordinator;
pub mod diagnostic;
pub mod error;
pub mod fakes;
pub mod matcher;
pub mod obs;
pub mod process;
pub mod sink;
pub mod telemetry;

pub use config::{
    BuildConfig, ConfigProvider, FileConfigProvider, GroupRef, MatcherList, MatcherSpec,
    ProjectConfig, RawBuildConfig, RawMatcher, CONFIG_FILE_NAMES,
};

pub use coordinator::{
    spawn_coordinator, BuildNotice, BuildRun, BuildRunCoordinator, BuildStatus, CoordinatorHandle,
    RunStatus,
};

pub use diagnostic::{Diagnostic, Position, Range, Severity};

pub use error::{BuildError, ConfigError, PatternError, Result, SpawnError, SpawnErrorKind};

pub use matcher::{
    compile, match_output, CompiledMatchers, MatchContext, MatchPattern, PatternCache,
    DEFAULT_FAILURE_TEXT,
};

pub use process::{
    ProcessEvent, ProcessOutcome, ProcessRunner, RunHandle, RunId, TokioProcessRunner,
    DEFAULT_GRACE_PERIOD,
};

pub use sink::{DiagnosticSink, MemorySink, TracingSink};

pub use telemetry::init_tracing;
