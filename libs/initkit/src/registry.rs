// initkit/src/registry.rs
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};

/// Predicate deciding whether an initializer runs on a given pass.
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Initialization routine. Closures returning `()` are adapted to `Ok(())`.
pub type Logic = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Return types accepted from initializer logic.
pub trait InitOutcome {
    fn into_outcome(self) -> anyhow::Result<()>;
}

impl InitOutcome for () {
    fn into_outcome(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> InitOutcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_outcome(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// The condition used when none is given at registration.
pub fn always() -> bool {
    true
}

/// A registered (condition, logic) pair.
///
/// Cloning is cheap and keeps callback identity, see [`InitializerEntry::same_as`].
#[derive(Clone)]
pub struct InitializerEntry {
    condition: Condition,
    logic: Logic,
}

impl std::fmt::Debug for InitializerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializerEntry")
            .field("condition", &Arc::as_ptr(&self.condition))
            .field("logic", &Arc::as_ptr(&self.logic))
            .finish()
    }
}

impl InitializerEntry {
    /// Entry with the default (always true) condition.
    pub fn new<L, R>(logic: L) -> Self
    where
        L: Fn() -> R + Send + Sync + 'static,
        R: InitOutcome,
    {
        Self {
            condition: Arc::new(always),
            logic: Arc::new(move || logic().into_outcome()),
        }
    }

    /// Replace the condition with `condition`.
    pub fn when<C>(self, condition: C) -> Self
    where
        C: Fn() -> bool + Send + Sync + 'static,
    {
        self.with_condition(Arc::new(condition))
    }

    /// Like [`InitializerEntry::when`], for an already shared condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Predicate evaluated at the start of each pass.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Callback invoked when the condition holds.
    pub fn logic(&self) -> &Logic {
        &self.logic
    }

    /// True when both entries share the same condition and logic callbacks.
    pub fn same_as(&self, other: &InitializerEntry) -> bool {
        Arc::ptr_eq(&self.condition, &other.condition) && Arc::ptr_eq(&self.logic, &other.logic)
    }
}

/// What a run pass does when a callback fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the failure, leave the initializer out of the result, keep going.
    #[default]
    Isolate,
    /// Report the failure and stop the pass.
    Abort,
}

/// Name-keyed registry of initializers, iterated in registration order.
///
/// The map lock is never held while callbacks run, so logic may call
/// [`Registry::register`] or [`Registry::unregister`] on the same registry.
/// Such changes take effect from the next pass.
pub struct Registry {
    entries: RwLock<IndexMap<String, InitializerEntry>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("initializers", &self.names())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry reporting diagnostics through `tracing`.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            sink,
        }
    }

    /// Register `logic` under `name`, guarded by `condition` (always true if `None`).
    ///
    /// An existing entry under the same name is left untouched and a
    /// diagnostic is reported instead.
    pub fn register<L, R>(&self, name: impl Into<String>, logic: L, condition: Option<Condition>)
    where
        L: Fn() -> R + Send + Sync + 'static,
        R: InitOutcome,
    {
        let mut entry = InitializerEntry::new(logic);
        if let Some(condition) = condition {
            entry = entry.with_condition(condition);
        }
        self.register_entry(name, entry);
    }

    /// Register `logic` with a condition that always holds.
    pub fn register_always<L, R>(&self, name: impl Into<String>, logic: L)
    where
        L: Fn() -> R + Send + Sync + 'static,
        R: InitOutcome,
    {
        self.register_entry(name, InitializerEntry::new(logic));
    }

    /// Register `logic` guarded by `condition`.
    pub fn register_when<L, R, C>(&self, name: impl Into<String>, logic: L, condition: C)
    where
        L: Fn() -> R + Send + Sync + 'static,
        R: InitOutcome,
        C: Fn() -> bool + Send + Sync + 'static,
    {
        self.register_entry(name, InitializerEntry::new(logic).when(condition));
    }

    /// Store a prebuilt entry under `name`.
    ///
    /// An empty name or one already in use is reported to the sink and
    /// nothing is stored.
    pub fn register_entry(&self, name: impl Into<String>, entry: InitializerEntry) {
        let name = name.into();
        if name.is_empty() {
            self.sink.report(&Diagnostic::InvalidName(&name));
            return;
        }

        let inserted = {
            let mut entries = self.entries.write();
            if entries.contains_key(&name) {
                false
            } else {
                entries.insert(name.clone(), entry);
                true
            }
        };

        if inserted {
            tracing::debug!(initializer = %name, "registered initializer");
        } else {
            self.sink.report(&Diagnostic::DuplicateName(&name));
        }
    }

    /// Remove `name`. Unknown names are reported, never treated as errors.
    pub fn unregister(&self, name: &str) {
        // shift_remove keeps the run order of the remaining entries
        let removed = self.entries.write().shift_remove(name);
        match removed {
            Some(_) => tracing::debug!(initializer = name, "unregistered initializer"),
            None => self.sink.report(&Diagnostic::UnknownName(name)),
        }
    }

    /// Snapshot of the current registrations.
    pub fn registered(&self) -> IndexMap<String, InitializerEntry> {
        self.entries.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<InitializerEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// One pass under [`FailurePolicy::Isolate`].
    ///
    /// Returns the names whose condition held and whose logic completed,
    /// in registration order. Every call re-evaluates every condition.
    pub fn run(&self) -> Vec<String> {
        let snapshot = self.registered();
        let mut ran = Vec::with_capacity(snapshot.len());

        for (name, entry) in snapshot {
            match invoke(&name, &entry) {
                Ok(true) => ran.push(name),
                Ok(false) => {}
                Err(err) => self.sink.report(&Diagnostic::Execution(&err)),
            }
        }

        tracing::debug!(ran = ?ran, "initializer pass complete");
        ran
    }

    /// One pass under [`FailurePolicy::Abort`]: the first failing callback
    /// ends the pass and is returned.
    pub fn try_run(&self) -> Result<Vec<String>, RegistryError> {
        let snapshot = self.registered();
        let mut ran = Vec::with_capacity(snapshot.len());

        for (name, entry) in snapshot {
            match invoke(&name, &entry) {
                Ok(true) => ran.push(name),
                Ok(false) => {}
                Err(err) => {
                    self.sink.report(&Diagnostic::Execution(&err));
                    return Err(err);
                }
            }
        }

        tracing::debug!(ran = ?ran, "initializer pass complete");
        Ok(ran)
    }

    pub fn run_with(&self, policy: FailurePolicy) -> Result<Vec<String>, RegistryError> {
        match policy {
            FailurePolicy::Isolate => Ok(self.run()),
            FailurePolicy::Abort => self.try_run(),
        }
    }
}

/// Evaluate the condition and, if it holds, the logic of one entry.
/// Panics from either callback are turned into errors.
fn invoke(name: &str, entry: &InitializerEntry) -> Result<bool, RegistryError> {
    let matched =
        guarded(|| Ok((entry.condition)())).map_err(|source| RegistryError::Condition {
            name: name.to_string(),
            source,
        })?;

    if !matched {
        tracing::trace!(initializer = name, "condition not met, skipping");
        return Ok(false);
    }

    tracing::debug!(initializer = name, "running initializer");
    guarded(|| (entry.logic)()).map_err(|source| RegistryError::Logic {
        name: name.to_string(),
        source,
    })?;

    Ok(true)
}

// The process panic hook still runs before the unwind is caught; hosts that
// want a single report install one that logs through tracing.
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "panicked: {}",
            panic_payload_to_string(&payload)
        )),
    }
}

fn panic_payload_to_string(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Failures raised by initializer callbacks during a run pass.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("condition failed for initializer '{name}'")]
    Condition {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("initialization failed for initializer '{name}'")]
    Logic {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    pub fn name(&self) -> &str {
        match self {
            RegistryError::Condition { name, .. } | RegistryError::Logic { name, .. } => name,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            RegistryError::Condition { .. } => "condition",
            RegistryError::Logic { .. } => "logic",
        }
    }

    pub fn cause(&self) -> &anyhow::Error {
        match self {
            RegistryError::Condition { source, .. } | RegistryError::Logic { source, .. } => source,
        }
    }
}
