use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live game and schedule notification server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "livebox-server", version, about = "Live game and schedule notification server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "LIVEBOX_PORT", default_value = "8787")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "LIVEBOX_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./livebox.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "LIVEBOX_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the subscription database
    #[arg(long, env = "LIVEBOX_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Fan-out tuning (loaded from [notify] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub notify: NotifyConfig,

    /// Change-record matching rules (loaded from [sources] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub sources: SourcesConfig,
}

/// Fan-out, reaping and subscription lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Subscribers fetched per page (default: 50)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Sends in flight at once while dispatching a page (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-call ceiling for bulk deletes (default: 25)
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Attempts per delete batch before giving up (default: 5)
    #[serde(default = "default_max_delete_retries")]
    pub max_delete_retries: u32,

    /// Subscription lifetime in seconds (default: 43200 = 12 hours)
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// First retry delay for bulk deletes in milliseconds (default: 100)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay in milliseconds (default: 2000)
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Interval between TTL sweeps in seconds, 0 disables (default: 3600)
    #[serde(default = "default_ttl_sweep_interval")]
    pub ttl_sweep_interval_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_concurrency: default_max_concurrency(),
            delete_batch_size: default_delete_batch_size(),
            max_delete_retries: default_max_delete_retries(),
            ttl_seconds: default_ttl_seconds(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            ttl_sweep_interval_secs: default_ttl_sweep_interval(),
        }
    }
}

impl NotifyConfig {
    /// Replace non-positive values with their defaults.
    /// The sweep interval is left alone since zero means "disabled".
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let backoff_base_ms = positive_or(self.backoff_base_ms, defaults.backoff_base_ms);
        Self {
            page_size: positive_or(self.page_size, defaults.page_size),
            max_concurrency: positive_or(self.max_concurrency, defaults.max_concurrency),
            delete_batch_size: positive_or(self.delete_batch_size, defaults.delete_batch_size),
            max_delete_retries: positive_or(self.max_delete_retries, defaults.max_delete_retries),
            ttl_seconds: positive_or(self.ttl_seconds, defaults.ttl_seconds),
            backoff_base_ms,
            backoff_cap_ms: positive_or(self.backoff_cap_ms, defaults.backoff_cap_ms)
                .max(backoff_base_ms),
            ttl_sweep_interval_secs: self.ttl_sweep_interval_secs,
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

fn positive_or<T: PartialEq + Default>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

fn default_page_size() -> usize {
    50
}

fn default_max_concurrency() -> usize {
    10
}

fn default_delete_batch_size() -> usize {
    25
}

fn default_max_delete_retries() -> u32 {
    5
}

fn default_ttl_seconds() -> u64 {
    12 * 60 * 60
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_cap_ms() -> u64 {
    2000
}

fn default_ttl_sweep_interval() -> u64 {
    3600
}

/// Object-key rules used to recognise relevant upstream writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Regexes for per-game objects; capture group 1 is the game id
    #[serde(default = "default_game_patterns")]
    pub game_patterns: Vec<String>,

    /// Key prefix of per-date schedule objects (default: "schedule/")
    #[serde(default = "default_schedule_prefix")]
    pub schedule_prefix: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            game_patterns: default_game_patterns(),
            schedule_prefix: default_schedule_prefix(),
        }
    }
}

fn default_game_patterns() -> Vec<String> {
    vec![
        r"^data/gamepack/(.+?)\.json".to_string(),
        r"^data/gameStats/(.+?)\.json".to_string(),
    ]
}

fn default_schedule_prefix() -> String {
    "schedule/".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            bind_address: "0.0.0.0".to_string(),
            config: "./livebox.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            notify: NotifyConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (LIVEBOX_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("LIVEBOX_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()?;
        config.notify = config.notify.validated();
        Ok(config)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# livebox server configuration
# Place this file at ./livebox.toml or specify with --config <path>
# Top-level settings can be overridden via environment variables (LIVEBOX_PORT, etc.)
# or CLI flags (--port, etc.). Nested keys use a double underscore:
# LIVEBOX_NOTIFY__PAGE_SIZE=100

# Server port (default: 8787)
# port = 8787

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite subscription database
# data_dir = "./data"

# ---- Fan-out ----
# [notify]
# page_size = 50                 # subscribers fetched per page
# max_concurrency = 10           # sends in flight per page
# delete_batch_size = 25         # per-call ceiling for stale deletes
# max_delete_retries = 5         # attempts per delete batch
# ttl_seconds = 43200            # subscription lifetime (12 hours)
# backoff_base_ms = 100          # first delete retry delay
# backoff_cap_ms = 2000          # maximum delete retry delay
# ttl_sweep_interval_secs = 3600 # 0 disables the expired-subscription sweep

# ---- Change sources ----
# [sources]
# game_patterns = ['^data/gamepack/(.+?)\.json', '^data/gameStats/(.+?)\.json']
# schedule_prefix = "schedule/"
"#
    .to_string()
}
