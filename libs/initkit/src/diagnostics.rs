//! Non-fatal diagnostics emitted by the registry.
//!
//! Registration conflicts and callback failures never surface as panics or
//! errors to the caller of `register`/`unregister`/`run`; they are handed to a
//! [`DiagnosticSink`] instead. The default sink forwards to `tracing`.

use std::fmt;

use parking_lot::Mutex;

use crate::registry::RegistryError;

/// Coarse classification of a [`Diagnostic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    DuplicateName,
    UnknownName,
    InvalidName,
    Execution,
}

/// A single diagnostic, borrowed from the registry call that produced it.
#[derive(Debug)]
pub enum Diagnostic<'a> {
    /// `register` was called with a name that is already taken.
    DuplicateName(&'a str),
    /// `unregister` was called with a name that is not registered.
    UnknownName(&'a str),
    /// `register` was called with an empty name.
    InvalidName(&'a str),
    /// A condition or logic callback failed during a run pass.
    Execution(&'a RegistryError),
}

impl Diagnostic<'_> {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::DuplicateName(_) => DiagnosticKind::DuplicateName,
            Diagnostic::UnknownName(_) => DiagnosticKind::UnknownName,
            Diagnostic::InvalidName(_) => DiagnosticKind::InvalidName,
            Diagnostic::Execution(_) => DiagnosticKind::Execution,
        }
    }
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DuplicateName(name) => {
                write!(f, "refusing to overwrite existing initializer: {name}")
            }
            Diagnostic::UnknownName(name) => {
                write!(f, "trying to unregister unknown initializer: {name}")
            }
            Diagnostic::InvalidName(_) => {
                write!(f, "refusing to register initializer with empty name")
            }
            Diagnostic::Execution(err) => write!(f, "{err}: {:#}", err.cause()),
        }
    }
}

/// Where diagnostics go. Implementations must not call back into the
/// registry that reported the diagnostic.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic<'_>);
}

/// Default sink: warnings at WARN, callback failures at ERROR.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic<'_>) {
        match diagnostic {
            Diagnostic::Execution(err) => {
                tracing::error!(
                    initializer = err.name(),
                    stage = err.stage(),
                    error = %format!("{:#}", err.cause()),
                    "{err}"
                );
            }
            other => tracing::warn!("{other}"),
        }
    }
}

/// Sink for hosts without a diagnostics channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _diagnostic: &Diagnostic<'_>) {}
}

/// One diagnostic captured by [`MemorySink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Keeps every diagnostic in memory, in the order it was reported.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: &Diagnostic<'_>) {
        self.records.lock().push(Record {
            kind: diagnostic.kind(),
            message: diagnostic.to_string(),
        });
    }
}
