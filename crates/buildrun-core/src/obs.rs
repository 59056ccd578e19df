//! Structured lifecycle events for build runs.
//!
//! Every emitter logs one `event = "..."` line carrying the `run_id`, so a
//! run can be followed through `RUST_LOG=buildrun_core=debug` or the JSON
//! log format.

use tracing::{debug, info, warn};

use crate::coordinator::RunStatus;
use crate::error::PatternError;
use crate::process::RunId;

pub fn emit_build_started(run_id: RunId, command: &str, matchers: usize) {
    info!(event = "build.started", run_id = %run_id, command = %command, matchers);
}

pub fn emit_build_finished(run_id: RunId, status: RunStatus, diagnostics: usize, duration_ms: u64) {
    info!(
        event = "build.finished",
        run_id = %run_id,
        status = ?status,
        diagnostics,
        duration_ms,
    );
}

/// A newer trigger took over from a run that was still in flight.
pub fn emit_run_superseded(run_id: RunId, by: Option<RunId>) {
    match by {
        Some(by) => info!(event = "build.superseded", run_id = %run_id, by = %by),
        None => info!(event = "build.cancelled", run_id = %run_id),
    }
}

/// A completion arrived for a run that is no longer current.
pub fn emit_stale_event_discarded(run_id: RunId, current: Option<RunId>) {
    debug!(
        event = "build.stale_event",
        run_id = %run_id,
        current = ?current.map(|id| id.0),
    );
}

pub fn emit_pattern_rejected(error: &PatternError) {
    warn!(event = "matcher.rejected", index = error.index(), error = %error);
}

/// Something the user should see that is not a location-bound diagnostic.
pub fn emit_build_notice(run_id: RunId, notice: &dyn std::fmt::Display) {
    warn!(event = "build.notice", run_id = %run_id, notice = %notice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        emit_build_started(RunId(1), "make", 2);
        emit_build_finished(RunId(1), RunStatus::Failed, 3, 10);
        emit_run_superseded(RunId(1), Some(RunId(2)));
        emit_run_superseded(RunId(2), None);
        emit_stale_event_discarded(RunId(1), Some(RunId(2)));
        emit_pattern_rejected(&PatternError::MatchesEmpty {
            index: 0,
            pattern: ".*".to_string(),
        });
        emit_build_notice(RunId(2), &"spawn failed");
    }
}
