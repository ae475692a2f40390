use anyhow::{Context, Result};
use initkit::{FailurePolicy, TriggerMode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Environment prefix for overrides, e.g. `INITKIT__TRIGGER__MODE=content_loaded`.
pub const ENV_PREFIX: &str = "INITKIT__";

/// Host configuration: how the registry behaves, when it is triggered and
/// where logs go.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Registry behaviour.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Which page lifecycle events run a pass.
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Base directory for relative log file paths. Defaults to the working directory.
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// `isolate` keeps going after a failing initializer, `abort` stops the pass.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Initializers that discovery must skip.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl RegistryConfig {
    pub fn disabled_set(&self) -> HashSet<String> {
        self.disabled.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(default)]
    pub mode: TriggerMode,
}

/// Logging configuration - maps log targets to their settings.
/// Key "default" is the catch-all for targets without their own section.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/initkit.log", empty = no file
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Create a default logging configuration: info to the console, no file.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: String::new(),
            file_level: "debug".to_string(),
            max_backups: Some(3),
            max_size_mb: Some(10),
        },
    );
    logging
}

impl AppConfig {
    /// Layered loading: defaults → YAML file → `INITKIT__*` environment.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let path = config_path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Load from `config_path` if given, otherwise defaults plus environment.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        use figment::{
            providers::{Env, Serialized},
            Figment,
        };

        match config_path {
            Some(path) => Self::load_layered(path),
            None => Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__"))
                .extract()
                .context("Failed to load config from environment"),
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Directory that relative log paths are resolved against.
    pub fn log_base_dir(&self) -> PathBuf {
        match self.log_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from("."),
        }
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(mode) = args.trigger_mode {
            self.trigger.mode = mode;
        }
        if let Some(policy) = args.failure_policy {
            self.registry.failure_policy = policy;
        }
        for name in &args.disable {
            if !self.registry.disabled.contains(name) {
                self.registry.disabled.push(name.clone());
            }
        }

        // Verbosity raises the console level of the "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        let default_section = logging
            .entry("default".to_string())
            .or_insert_with(|| default_logging_config()["default"].clone());
        default_section.console_level = match args.verbose {
            0 => default_section.console_level.clone(), // keep
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }
}

/// Command line arguments that feed into [`AppConfig::apply_cli_overrides`].
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
    pub trigger_mode: Option<TriggerMode>,
    pub failure_policy: Option<FailurePolicy>,
    pub disable: Vec<String>,
}
