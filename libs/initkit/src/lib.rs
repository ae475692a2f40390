//! # initkit - Conditional Initializers
//!
//! Split page-load logic into small, named initializers instead of one
//! monolithic startup routine. Each initializer is a `(condition, logic)` pair;
//! a run pass evaluates every condition and runs the logic whose condition
//! holds.
//!
//! ## Features
//!
//! - **Named**: one initializer per name; re-registration is refused, not overwritten
//! - **Conditional**: optional `Fn() -> bool` guard, always true by default
//! - **Deterministic**: passes run in registration order
//! - **Isolated**: a failing or panicking initializer is reported and skipped
//! - **Auto-discovery**: initializers can submit themselves via [`initializer!`]
//!
//! ## Example
//!
//! ```rust
//! use initkit::Registry;
//!
//! let registry = Registry::new();
//! registry.register_always("alert", || println!("Hey there!"));
//! registry.register_when("fridays", || println!("w00t!"), || false);
//!
//! assert_eq!(registry.run(), vec!["alert"]);
//! ```
//!
//! Calling `run` is the host's job. Wire page lifecycle events into a
//! [`Trigger`] or call [`Registry::run`] directly.

// Re-export inventory so `initializer!` works without a direct dependency
pub use inventory;

pub mod diagnostics;
pub mod discovery;
pub mod global;
pub mod registry;
pub mod trigger;

pub use diagnostics::{
    Diagnostic, DiagnosticKind, DiagnosticSink, MemorySink, NullSink, Record, TracingSink,
};
pub use discovery::StaticInitializer;
pub use global::{global, register, registered, run, unregister};
pub use registry::{
    always, Condition, FailurePolicy, InitOutcome, InitializerEntry, Logic, Registry,
    RegistryError,
};
pub use trigger::{DriveSummary, PageEvent, Trigger, TriggerMode};
