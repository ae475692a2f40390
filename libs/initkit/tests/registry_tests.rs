//! End-to-end behaviour of the public registry API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use initkit::{
    DiagnosticKind, FailurePolicy, MemorySink, PageEvent, Registry, Trigger, TriggerMode,
};

static BANNER_SHOWN: AtomicUsize = AtomicUsize::new(0);

fn show_banner() {
    BANNER_SHOWN.fetch_add(1, Ordering::SeqCst);
}

fn is_weekend() -> bool {
    false
}

// ---------- Submissions (must be at module scope for `inventory`) ----------

initkit::initializer!("it::banner", show_banner);
initkit::initializer!("it::weekend", show_banner, when = is_weekend);

fn test_registry() -> (Registry, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Registry::with_sink(sink.clone()), sink)
}

#[test]
fn always_never_and_default_conditions() {
    let (reg, _) = test_registry();
    reg.register("a", || {}, Some(Arc::new(|| true)));
    reg.register("b", || {}, Some(Arc::new(|| false)));
    reg.register("c", || {}, None);

    assert_eq!(reg.run(), vec!["a", "c"]);
}

#[test]
fn reregistering_keeps_original_logic() {
    let (reg, sink) = test_registry();
    reg.register_always("a", || {});
    let original = reg.registered()["a"].clone();

    reg.register_always("a", || -> anyhow::Result<()> {
        panic!("replacement must never run")
    });

    assert!(reg.registered()["a"].same_as(&original));
    assert_eq!(sink.count(DiagnosticKind::DuplicateName), 1);
    assert_eq!(reg.run(), vec!["a"]);
}

#[test]
fn unregistering_unknown_name_is_harmless() {
    let (reg, sink) = test_registry();
    reg.register_always("keep", || {});

    reg.unregister("x");

    assert_eq!(reg.names(), vec!["keep"]);
    assert_eq!(
        sink.messages(),
        vec!["trying to unregister unknown initializer: x"]
    );
}

#[test]
fn condition_true_only_first_time() {
    let (reg, _) = test_registry();
    let fresh = Arc::new(AtomicBool::new(true));
    reg.register_when("a", || {}, move || fresh.swap(false, Ordering::SeqCst));

    assert_eq!(reg.run(), vec!["a"]);
    assert_eq!(reg.run(), Vec::<String>::new());
}

#[test]
fn discovered_initializers_run_through_a_trigger() {
    let (reg, _) = test_registry();
    reg.discover();
    let trigger = Trigger::new(&reg, TriggerMode::ContentLoaded);

    let before = BANNER_SHOWN.load(Ordering::SeqCst);
    let ran = trigger
        .fire(&PageEvent::ContentLoaded)
        .unwrap()
        .expect("first load runs a pass");

    assert_eq!(ran, vec!["it::banner"]);
    assert_eq!(BANNER_SHOWN.load(Ordering::SeqCst), before + 1);
}

#[test]
fn abort_policy_stops_at_first_failure() {
    let (reg, sink) = test_registry();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    reg.register_always("broken", || -> anyhow::Result<()> { anyhow::bail!("bad markup") });
    reg.register_always("later", move || {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let err = reg.run_with(FailurePolicy::Abort).unwrap_err();
    assert_eq!(err.name(), "broken");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(sink.count(DiagnosticKind::Execution), 1);

    assert_eq!(reg.run_with(FailurePolicy::Isolate).unwrap(), vec!["later"]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
