use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use initkit::{FailurePolicy, PageEvent, Registry, Trigger, TriggerMode};
use initkit_bootstrap::{AppConfig, CliArgs};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod registered_initializers;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// initkit host - runs the bundled initializers against simulated page events
#[derive(Parser)]
#[command(name = "initkit-host")]
#[command(about = "Runs named, conditional initializers on page lifecycle events")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Which page events run a pass (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// What a pass does when an initializer fails (overrides config)
    #[arg(long, value_enum)]
    on_error: Option<PolicyArg>,

    /// Skip an initializer during discovery (repeatable)
    #[arg(long = "disable", value_name = "NAME")]
    disable: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered initializers
    List,
    /// Simulate a single page load
    Load,
    /// Simulate a page load followed by soft navigations
    Visit {
        /// Locations navigated to, in order
        #[arg(required = true)]
        locations: Vec<String>,
    },
    /// Read events from stdin ("load" or "nav <location>") until EOF or Ctrl+C
    Listen,
    /// Validate configuration and exit
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    ContentLoaded,
    Navigation,
}

impl From<ModeArg> for TriggerMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::ContentLoaded => TriggerMode::ContentLoaded,
            ModeArg::Navigation => TriggerMode::Navigation,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Isolate,
    Abort,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Isolate => FailurePolicy::Isolate,
            PolicyArg::Abort => FailurePolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        trigger_mode: cli.mode.map(Into::into),
        failure_policy: cli.on_error.map(Into::into),
        disable: cli.disable.clone(),
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (INITKIT__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    initkit_bootstrap::init_logging(&logging_config, &config.log_base_dir());
    initkit_bootstrap::route_panics_to_tracing();

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    // Dispatch subcommands (default: load)
    match cli.command.unwrap_or(Commands::Load) {
        Commands::List => {
            let registry = build_registry(&config);
            for name in registry.names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Load => {
            let registry = build_registry(&config);
            let trigger = trigger_for(&registry, &config);
            report_passes(&simulate_visit(&trigger, &["/".to_string()])?);
            Ok(())
        }
        Commands::Visit { locations } => {
            let registry = build_registry(&config);
            let trigger = trigger_for(&registry, &config);
            report_passes(&simulate_visit(&trigger, &locations)?);
            Ok(())
        }
        Commands::Listen => {
            let registry = build_registry(&config);
            listen(&registry, &config).await
        }
        Commands::Check => check_config(&config),
    }
}

/// Registry holding every bundled initializer not disabled by configuration.
fn build_registry(config: &AppConfig) -> Registry {
    let registry = Registry::new();
    let added = registry.discover_filtered(&config.registry.disabled_set());
    tracing::info!(added, "initializers discovered");
    registry
}

fn trigger_for<'r>(registry: &'r Registry, config: &AppConfig) -> Trigger<'r> {
    Trigger::new(registry, config.trigger.mode).with_policy(config.registry.failure_policy)
}

/// A page view as a browser with a client-side router reports it: one
/// content-loaded signal, then one navigation per location.
fn visit_events(locations: &[String]) -> Vec<PageEvent> {
    std::iter::once(PageEvent::ContentLoaded)
        .chain(locations.iter().map(PageEvent::navigated))
        .collect()
}

/// Fire the events of a visit; returns the names run by each pass.
fn simulate_visit(trigger: &Trigger<'_>, locations: &[String]) -> Result<Vec<Vec<String>>> {
    let mut passes = Vec::new();
    for event in visit_events(locations) {
        if let Some(ran) = trigger.fire(&event)? {
            passes.push(ran);
        }
    }
    Ok(passes)
}

fn report_passes(passes: &[Vec<String>]) {
    if passes.is_empty() {
        println!("no pass ran");
    }
    for (i, ran) in passes.iter().enumerate() {
        println!("pass {}: [{}]", i + 1, ran.join(", "));
    }
}

/// "load" or "nav <location>"; anything else is not an event.
fn parse_event_line(line: &str) -> Option<PageEvent> {
    let mut parts = line.split_whitespace();
    match (parts.next()?, parts.next(), parts.next()) {
        ("load", None, None) => Some(PageEvent::ContentLoaded),
        ("nav", Some(location), None) => Some(PageEvent::navigated(location)),
        _ => None,
    }
}

async fn listen(registry: &Registry, config: &AppConfig) -> Result<()> {
    let trigger = trigger_for(registry, config);
    let cancel = initkit_bootstrap::shutdown_token();
    let (tx, rx) = mpsc::channel(16);

    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match parse_event_line(&line) {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => tracing::warn!(%line, "unrecognized event line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read events from stdin");
                        break;
                    }
                },
            }
        }
    });

    tracing::info!(mode = ?trigger.mode(), "listening for page events on stdin");
    let summary = trigger.drive(rx, cancel).await;
    reader.abort();

    println!(
        "passes: {}, ignored: {}, failed: {}",
        summary.passes, summary.ignored, summary.failed
    );
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
