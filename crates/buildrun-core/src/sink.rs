//! Consumers of published diagnostics.
//!
//! Sinks have full-replace semantics: every call carries the complete
//! current list, and an empty list clears.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::diagnostic::{Diagnostic, Severity};

pub trait DiagnosticSink: Send + Sync {
    /// Replace the sink's messages wholesale.
    fn set_messages(&self, messages: Vec<Diagnostic>);
}

/// Keeps the current message list in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Diagnostic>>,
    updates: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current messages.
    pub fn messages(&self) -> Vec<Diagnostic> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    /// Number of `set_messages` calls so far.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl DiagnosticSink for MemorySink {
    fn set_messages(&self, messages: Vec<Diagnostic>) {
        *self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = messages;
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writes each published diagnostic to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn set_messages(&self, messages: Vec<Diagnostic>) {
        if messages.is_empty() {
            info!(event = "diagnostics.cleared");
            return;
        }
        for diag in &messages {
            let file = diag.file_path.display();
            let row = diag.range.start.row;
            let column = diag.range.start.column;
            match diag.severity {
                Severity::Error => error!(%file, row, column, text = %diag.text, "build error"),
                Severity::Warning => warn!(%file, row, column, text = %diag.text, "build warning"),
                Severity::Info => info!(%file, row, column, text = %diag.text, "build info"),
            }
        }
    }
}
