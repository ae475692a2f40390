use crate::config::{LoggingConfig, Section};
use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

// Keep the non-blocking console worker alive for the whole process.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEFAULT_MAX_SIZE_MB: u64 = 10;
const DEFAULT_MAX_BACKUPS: usize = 3;

// ================= level helpers =================

/// "off"/"none" disable a sink; unknown strings fall back to INFO.
fn parse_level(s: &str) -> LevelFilter {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Returns true if target == prefix or target starts with "prefix::"
fn matches_target_prefix(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

// ================= rotating file writer =================

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut file) => file.write(buf),
            Err(poisoned) => poisoned.into_inner().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut file) => file.flush(),
            Err(poisoned) => poisoned.into_inner().flush(),
        }
    }
}

/// Writer that drops everything when the target has no file.
struct MaybeWriter(Option<RotWriter>);

impl Write for MaybeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

fn open_rotating(path: &Path, section: &Section) -> std::io::Result<RotWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;
    let backups = section.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS);

    let rot = FileRotate::new(
        path,
        AppendTimestamp::default(FileLimit::MaxFiles(backups)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

// ================= file routing =================

/// Routes records to files by target prefix; the longest matching prefix
/// wins, then the "default" file if any.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotWriter>,
    by_prefix: BTreeMap<String, RotWriter>,
}

impl FileRouter {
    fn build(cfg: &LoggingConfig, base_dir: &Path) -> Self {
        let mut router = FileRouter::default();

        for (target, section) in cfg {
            if section.file.trim().is_empty() {
                continue;
            }
            let path = resolve_log_path(&section.file, base_dir);
            let writer = match open_rotating(&path, section) {
                Ok(w) => w,
                Err(e) => {
                    eprintln!(
                        "Failed to open log file '{}' for '{}': {}",
                        path.display(),
                        target,
                        e
                    );
                    continue;
                }
            };
            if target == "default" {
                router.default = Some(writer);
            } else {
                router.by_prefix.insert(target.clone(), writer);
            }
        }

        router
    }

    fn resolve(&self, target: &str) -> Option<RotWriter> {
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| matches_target_prefix(target, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = MaybeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MaybeWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        MaybeWriter(self.resolve(meta.target()))
    }
}

// ================= per-sink targets =================

#[derive(Clone, Copy)]
enum Sink {
    Console,
    File { has_default_file: bool },
}

fn build_targets(cfg: &LoggingConfig, sink: Sink) -> Targets {
    let default = cfg.get("default");

    let default_level = match sink {
        Sink::Console => default
            .map(|s| parse_level(&s.console_level))
            .unwrap_or(LevelFilter::INFO),
        Sink::File { has_default_file } if has_default_file => default
            .map(|s| parse_level(&s.file_level))
            .unwrap_or(LevelFilter::INFO),
        Sink::File { .. } => LevelFilter::OFF,
    };

    let mut targets = Targets::new().with_default(default_level);
    for (target, section) in cfg.iter().filter(|(k, _)| k.as_str() != "default") {
        let level = match sink {
            Sink::Console => parse_level(&section.console_level),
            // a file level only matters when the target has its own file
            Sink::File { .. } if section.file.trim().is_empty() => continue,
            Sink::File { .. } => parse_level(&section.file_level),
        };
        targets = targets.with_target(target.clone(), level);
    }
    targets
}

// ================= public init =================

/// Install the global subscriber: console (human) and optional file (JSON)
/// layers, levels from `cfg`, capped by `RUST_LOG` when set.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let router = FileRouter::build(cfg, base_dir);
    let console_targets = build_targets(cfg, Sink::Console);
    let file_targets = build_targets(
        cfg,
        Sink::File {
            has_default_file: router.default.is_some(),
        },
    );

    let env = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(file_targets)
    });

    let _ = tracing_subscriber::registry()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Replace the default panic hook with one that reports through `tracing`.
///
/// Initializer panics are caught and reported by the registry; without this
/// the default hook also prints a raw `thread '..' panicked at` line to
/// stderr, outside the configured layers.
pub fn route_panics_to_tracing() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", %location, "panicked: {message}");
    }));
}

fn init_minimal() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env)
        .with(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339()),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.to_string(),
            file: file.to_string(),
            file_level: file_level.to_string(),
            max_backups: None,
            max_size_mb: None,
        }
    }

    #[test]
    fn parse_level_handles_off_and_unknown() {
        assert_eq!(parse_level("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(parse_level("off"), LevelFilter::OFF);
        assert_eq!(parse_level("none"), LevelFilter::OFF);
        assert_eq!(parse_level("loud"), LevelFilter::INFO);
    }

    #[test]
    fn target_prefix_requires_path_boundary() {
        assert!(matches_target_prefix("initkit", "initkit"));
        assert!(matches_target_prefix("initkit::registry", "initkit"));
        assert!(!matches_target_prefix("initkit_bootstrap", "initkit"));
        assert!(!matches_target_prefix("other", "initkit"));
    }

    #[test]
    fn router_prefers_longest_prefix() {
        let dir = tempdir().unwrap();
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert("default".into(), section("info", "all.log", "info"));
        cfg.insert("initkit".into(), section("info", "initkit.log", "debug"));
        cfg.insert(
            "initkit::trigger".into(),
            section("info", "trigger.log", "debug"),
        );

        let router = FileRouter::build(&cfg, dir.path());
        let pick = |target: &str| {
            let w = router.resolve(target).unwrap();
            let want = |name: &str| Arc::ptr_eq(&w.0, &router.by_prefix[name].0);
            (want("initkit"), want("initkit::trigger"))
        };

        assert_eq!(pick("initkit::registry"), (true, false));
        assert_eq!(pick("initkit::trigger"), (false, true));
        assert_eq!(pick("initkit::trigger::drive"), (false, true));

        let fallback = router.resolve("initkit_host").unwrap();
        assert!(Arc::ptr_eq(
            &fallback.0,
            &router.default.as_ref().unwrap().0
        ));
    }

    #[test]
    fn router_without_files_is_empty() {
        let dir = tempdir().unwrap();
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert("default".into(), section("info", "", "debug"));

        let router = FileRouter::build(&cfg, dir.path());
        assert!(router.is_empty());
        assert!(router.resolve("anything").is_none());
    }

    #[test]
    fn file_sink_is_off_without_default_file() {
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert("default".into(), section("info", "", "debug"));

        let targets = build_targets(
            &cfg,
            Sink::File {
                has_default_file: false,
            },
        );
        assert!(!targets.would_enable("initkit", &tracing::Level::ERROR));

        let console = build_targets(&cfg, Sink::Console);
        assert!(console.would_enable("initkit", &tracing::Level::INFO));
        assert!(!console.would_enable("initkit", &tracing::Level::DEBUG));
    }

    #[test]
    fn per_target_console_levels_apply() {
        let mut cfg: LoggingConfig = HashMap::new();
        cfg.insert("default".into(), section("warn", "", ""));
        cfg.insert("initkit::registry".into(), section("trace", "", ""));

        let console = build_targets(&cfg, Sink::Console);
        assert!(console.would_enable("initkit::registry", &tracing::Level::TRACE));
        assert!(!console.would_enable("initkit::trigger", &tracing::Level::INFO));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn panics_are_reported_through_tracing() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            route_panics_to_tracing();
            let caught = std::panic::catch_unwind(|| panic!("initializer exploded"));
            // back to the default hook
            let _ = std::panic::take_hook();
            assert!(caught.is_err());
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("panicked: initializer exploded"), "{out}");
        assert!(out.contains("logging.rs"), "{out}");
    }
}
