//! Process-wide registry.
//!
//! Created on first access and never torn down. Hosts that prefer explicit
//! wiring can ignore this module and pass a [`Registry`] around instead.

use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::registry::{Condition, InitOutcome, InitializerEntry, Registry};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

pub fn register<L, R>(name: impl Into<String>, logic: L, condition: Option<Condition>)
where
    L: Fn() -> R + Send + Sync + 'static,
    R: InitOutcome,
{
    global().register(name, logic, condition);
}

pub fn unregister(name: &str) {
    global().unregister(name);
}

pub fn run() -> Vec<String> {
    global().run()
}

pub fn registered() -> IndexMap<String, InitializerEntry> {
    global().registered()
}
