// Bundled initializers. Each one submits itself through `initializer!`;
// `Registry::discover` picks them up at startup.

use chrono::{Datelike, Local, Weekday};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Env var read by the `greeting` initializer.
pub const GREETING_ENV: &str = "INITKIT_GREETING";

static PAGE_VIEWS: AtomicUsize = AtomicUsize::new(0);

fn alert() {
    tracing::info!("Hey there!");
}

fn party() {
    tracing::info!("Today is friday! w00t!");
}

fn is_friday() -> bool {
    Local::now().weekday() == Weekday::Fri
}

fn greet() {
    let who = std::env::var(GREETING_ENV).unwrap_or_default();
    tracing::info!(%who, "Hello, {who}!");
}

fn has_greeting() -> bool {
    std::env::var(GREETING_ENV).is_ok_and(|v| !v.trim().is_empty())
}

fn count_page_view() {
    let views = PAGE_VIEWS.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(views, "page view counted");
}

pub fn page_views() -> usize {
    PAGE_VIEWS.load(Ordering::SeqCst)
}

initkit::initializer!("alert", alert);
initkit::initializer!("fridays", party, when = is_friday);
initkit::initializer!("greeting", greet, when = has_greeting);
initkit::initializer!("page_views", count_page_view);
