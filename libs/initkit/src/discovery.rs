//! Link-time registration of initializers.
//!
//! Each initializer can live next to the code it sets up and submit itself
//! with [`initializer!`](crate::initializer); [`Registry::discover`] then
//! pulls every submission into a registry.

use std::collections::HashSet;

use crate::registry::{InitializerEntry, Registry};

/// One initializer submitted via `inventory::submit!`.
pub struct StaticInitializer {
    pub name: &'static str,
    pub logic: fn(),
    pub condition: Option<fn() -> bool>,
}

inventory::collect!(StaticInitializer);

impl StaticInitializer {
    pub const fn new(name: &'static str, logic: fn()) -> Self {
        Self {
            name,
            logic,
            condition: None,
        }
    }

    pub const fn when(mut self, condition: fn() -> bool) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn to_entry(&self) -> InitializerEntry {
        let entry = InitializerEntry::new(self.logic);
        match self.condition {
            Some(condition) => entry.when(condition),
            None => entry,
        }
    }
}

/// Submit a named initializer for discovery.
///
/// ```rust,ignore
/// fn party() { println!("Today is friday! w00t!"); }
/// fn is_friday() -> bool { /* ... */ true }
///
/// initkit::initializer!("fridays", party, when = is_friday);
/// initkit::initializer!("banner", show_banner);
/// ```
#[macro_export]
macro_rules! initializer {
    ($name:expr, $logic:path) => {
        $crate::inventory::submit! {
            $crate::discovery::StaticInitializer::new($name, $logic)
        }
    };
    ($name:expr, $logic:path, when = $condition:path) => {
        $crate::inventory::submit! {
            $crate::discovery::StaticInitializer::new($name, $logic).when($condition)
        }
    };
}

/// All submitted initializers, sorted by name.
pub fn collected() -> Vec<&'static StaticInitializer> {
    let mut all: Vec<_> = inventory::iter::<StaticInitializer>.into_iter().collect();
    all.sort_by_key(|s| s.name);
    all
}

impl Registry {
    /// Register every submitted initializer. Returns how many were added.
    ///
    /// Submission order is unspecified, so entries are registered sorted by
    /// name. Names already present are reported as duplicates.
    pub fn discover(&self) -> usize {
        self.discover_filtered(&HashSet::new())
    }

    /// Like [`Registry::discover`], skipping the names in `disabled`.
    pub fn discover_filtered(&self, disabled: &HashSet<String>) -> usize {
        let before = self.len();
        for submitted in collected() {
            if disabled.contains(submitted.name) {
                tracing::info!(
                    initializer = submitted.name,
                    "initializer disabled by configuration"
                );
                continue;
            }
            self.register_entry(submitted.name, submitted.to_entry());
        }
        let added = self.len().saturating_sub(before);

        tracing::info!(
            initializers = ?self.names(),
            added,
            "initializer discovery complete"
        );
        added
    }
}
