//! Trigger point between a host's page lifecycle and a [`Registry`].
//!
//! The registry knows nothing about DOM-ready or router events. Hosts
//! translate their own lifecycle signals into [`PageEvent`]s and hand them
//! to a [`Trigger`], which decides whether a run pass is due.
//!
//! Two modes cover the usual setups:
//! - [`TriggerMode::ContentLoaded`]: plain page loads. The first
//!   `ContentLoaded` runs a pass; repeats and navigations are ignored.
//! - [`TriggerMode::Navigation`]: soft navigation. Every `Navigated` event
//!   runs a pass; `ContentLoaded` is ignored because the router reports the
//!   initial page view as a navigation too.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::{FailurePolicy, Registry, RegistryError};

/// Lifecycle signal reported by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEvent {
    ContentLoaded,
    Navigated { location: String },
}

impl PageEvent {
    pub fn navigated(location: impl Into<String>) -> Self {
        PageEvent::Navigated {
            location: location.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    ContentLoaded,
    #[default]
    Navigation,
}

/// Counters returned by [`Trigger::drive`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub passes: usize,
    pub ignored: usize,
    pub failed: usize,
}

pub struct Trigger<'r> {
    registry: &'r Registry,
    mode: TriggerMode,
    policy: FailurePolicy,
    loaded: AtomicBool,
}

impl<'r> Trigger<'r> {
    pub fn new(registry: &'r Registry, mode: TriggerMode) -> Self {
        Self {
            registry,
            mode,
            policy: FailurePolicy::default(),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// Handle one event. `Ok(Some(names))` when a pass ran, `Ok(None)` when
    /// the event does not call for one in the current mode.
    pub fn fire(&self, event: &PageEvent) -> Result<Option<Vec<String>>, RegistryError> {
        let due = match (self.mode, event) {
            (TriggerMode::ContentLoaded, PageEvent::ContentLoaded) => {
                !self.loaded.swap(true, Ordering::SeqCst)
            }
            (TriggerMode::Navigation, PageEvent::Navigated { .. }) => true,
            _ => false,
        };

        if !due {
            tracing::debug!(?event, mode = ?self.mode, "trigger: event ignored");
            return Ok(None);
        }

        tracing::info!(?event, "trigger: running initializers");
        self.registry.run_with(self.policy).map(Some)
    }

    /// Consume events until the channel closes or `cancel` fires.
    ///
    /// A failed pass (only possible under [`FailurePolicy::Abort`]) has
    /// already been reported by the registry and does not stop the loop.
    pub async fn drive(
        &self,
        mut events: mpsc::Receiver<PageEvent>,
        cancel: CancellationToken,
    ) -> DriveSummary {
        let mut summary = DriveSummary::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("trigger: cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("trigger: event source closed");
                        break;
                    };
                    match self.fire(&event) {
                        Ok(Some(_)) => summary.passes += 1,
                        Ok(None) => summary.ignored += 1,
                        Err(_) => summary.failed += 1,
                    }
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullSink;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_registry() -> (Registry, Arc<AtomicUsize>) {
        let reg = Registry::with_sink(Arc::new(NullSink));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        reg.register_always("count", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (reg, hits)
    }

    #[test]
    fn content_loaded_mode_runs_once() {
        let (reg, hits) = counting_registry();
        let trigger = Trigger::new(&reg, TriggerMode::ContentLoaded);

        assert_eq!(
            trigger.fire(&PageEvent::ContentLoaded).unwrap(),
            Some(vec!["count".to_string()])
        );
        assert_eq!(trigger.fire(&PageEvent::ContentLoaded).unwrap(), None);
        assert_eq!(trigger.fire(&PageEvent::navigated("/a")).unwrap(), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn navigation_mode_runs_on_every_navigation() {
        let (reg, hits) = counting_registry();
        let trigger = Trigger::new(&reg, TriggerMode::Navigation);

        assert_eq!(trigger.fire(&PageEvent::ContentLoaded).unwrap(), None);
        for path in ["/", "/users", "/users/1"] {
            assert!(trigger.fire(&PageEvent::navigated(path)).unwrap().is_some());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn abort_policy_surfaces_errors() {
        let reg = Registry::with_sink(Arc::new(NullSink));
        reg.register_always("broken", || -> anyhow::Result<()> { anyhow::bail!("nope") });
        let trigger = Trigger::new(&reg, TriggerMode::Navigation).with_policy(FailurePolicy::Abort);

        let err = trigger.fire(&PageEvent::navigated("/")).unwrap_err();
        assert_eq!(err.name(), "broken");
    }

    #[tokio::test]
    async fn drive_stops_when_channel_closes() {
        let (reg, hits) = counting_registry();
        let trigger = Trigger::new(&reg, TriggerMode::Navigation);
        let (tx, rx) = mpsc::channel(8);

        tx.send(PageEvent::ContentLoaded).await.unwrap();
        tx.send(PageEvent::navigated("/")).await.unwrap();
        tx.send(PageEvent::navigated("/next")).await.unwrap();
        drop(tx);

        let summary = trigger.drive(rx, CancellationToken::new()).await;
        assert_eq!(
            summary,
            DriveSummary {
                passes: 2,
                ignored: 1,
                failed: 0
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn drive_stops_on_cancel() {
        let (reg, hits) = counting_registry();
        let trigger = Trigger::new(&reg, TriggerMode::Navigation);
        let (_tx, rx) = mpsc::channel::<PageEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = trigger.drive(rx, cancel).await;
        assert_eq!(summary, DriveSummary::default());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
