//! Configuration management for the sync node

use crate::error::{Error, Result};
use crate::protocol::NetworkMagic;
use clap::Parser;
use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "CHAINSYNC";

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[clap(
    name = "chainsync",
    about = "Header synchronization node core",
    version,
    author
)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long, value_name = "FILE", env = "CHAINSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network: main, testnet, regtest or 8 hex digits of magic
    #[clap(short, long, env = "CHAINSYNC_NETWORK_MAGIC")]
    pub network: Option<String>,

    /// Address to accept peer connections on
    #[clap(short, long, env = "CHAINSYNC_LISTEN")]
    pub listen: Option<String>,

    /// Peer address to connect to
    #[clap(short = 'p', long, env = "CHAINSYNC_CONNECT")]
    pub connect: Option<String>,

    /// Log level
    #[clap(long, env = "CHAINSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format: plain, pretty or json
    #[clap(long, env = "CHAINSYNC_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Seconds without progress before a request counts as stalled
    #[clap(long, env = "CHAINSYNC_STALL_WINDOW_SECS")]
    pub stall_window_secs: Option<u64>,

    /// Upper bound on cached unspent outputs
    #[clap(long, env = "CHAINSYNC_MAX_CACHED_UTXOS")]
    pub max_cached_utxos: Option<usize>,

    /// Validation threads (0 = all cores)
    #[clap(short, long, env = "CHAINSYNC_WORKER_THREADS")]
    pub threads: Option<usize>,

    /// Print the effective configuration as TOML and exit
    #[clap(long)]
    pub print_config: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Peer network configuration
    pub network: NetworkConfig,

    /// Header synchronization configuration
    pub sync: SyncConfig,

    /// Validation cache configuration
    pub cache: CacheConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Peer network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network preset name or explicit magic in hex
    #[serde(default = "default_network")]
    pub magic: String,

    /// Address to accept connections on
    #[serde(default)]
    pub listen: Option<String>,

    /// Peer to connect to
    #[serde(default)]
    pub connect: Option<String>,
}

/// Header synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds without progress before a request counts as stalled
    #[serde(default = "default_stall_window")]
    pub stall_window_secs: u64,

    /// Milliseconds between stall watchdog passes
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    /// Validation threads (0 = all cores)
    #[serde(default)]
    pub worker_threads: usize,

    /// Ask every new peer for headers right away
    #[serde(default = "default_true")]
    pub request_headers_on_connect: bool,
}

/// Validation cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on cached unspent outputs per view
    #[serde(default = "default_max_cached_utxos")]
    pub max_cached_utxo_count: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (plain, pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include the module target in log lines
    #[serde(default)]
    pub include_target: bool,
}

fn default_true() -> bool {
    true
}

fn default_network() -> String {
    "main".to_string()
}

fn default_stall_window() -> u64 {
    30
}

fn default_watchdog_interval() -> u64 {
    1_000
}

fn default_max_cached_utxos() -> usize {
    500_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            magic: default_network(),
            listen: None,
            connect: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stall_window_secs: default_stall_window(),
            watchdog_interval_ms: default_watchdog_interval(),
            worker_threads: 0,
            request_headers_on_connect: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cached_utxo_count: default_max_cached_utxos(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            include_target: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, layered with `CHAINSYNC_` environment variables
    ///
    /// Nested keys use a double underscore, e.g. `CHAINSYNC_SYNC__STALL_WINDOW_SECS`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: Self = ::config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from command-line arguments
    ///
    /// A config file, when given, is the base; explicit arguments override it.
    pub fn from_args(args: Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(network) = args.network {
            config.network.magic = network;
        }
        if let Some(listen) = args.listen {
            config.network.listen = Some(listen);
        }
        if let Some(connect) = args.connect {
            config.network.connect = Some(connect);
        }
        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }
        if let Some(secs) = args.stall_window_secs {
            config.sync.stall_window_secs = secs;
        }
        if let Some(max) = args.max_cached_utxos {
            config.cache.max_cached_utxo_count = max;
        }
        if let Some(threads) = args.threads {
            config.sync.worker_threads = threads;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.network_magic()?;

        if self.sync.stall_window_secs == 0 {
            return Err(Error::config("Stall window must be greater than 0"));
        }

        if self.sync.watchdog_interval_ms == 0 {
            return Err(Error::config("Watchdog interval must be greater than 0"));
        }

        if self.cache.max_cached_utxo_count == 0 {
            return Err(Error::config("Max cached UTXO count must be greater than 0"));
        }

        if !matches!(self.logging.format.as_str(), "plain" | "pretty" | "json") {
            return Err(Error::config(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Network magic selected by `network.magic`
    pub fn network_magic(&self) -> Result<NetworkMagic> {
        NetworkMagic::parse(&self.network.magic)
            .ok_or_else(|| Error::config(format!("Unknown network: {}", self.network.magic)))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {e}")))
    }

    /// Stall window as a duration
    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.sync.stall_window_secs)
    }

    /// Watchdog period as a duration
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.sync.watchdog_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.magic, "main");
        assert_eq!(config.network_magic().unwrap(), NetworkMagic::MAIN);
        assert_eq!(config.sync.stall_window_secs, 30);
        assert!(config.sync.request_headers_on_connect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.network.magic = "moonnet".to_string();
        assert!(config.validate().is_err());
        config.network.magic = "0xDAB5BFFA".to_string();
        assert_eq!(config.network_magic().unwrap(), NetworkMagic::REGTEST);

        config.sync.stall_window_secs = 0;
        assert!(config.validate().is_err());
        config.sync.stall_window_secs = 10;

        config.cache.max_cached_utxo_count = 0;
        assert!(config.validate().is_err());
        config.cache.max_cached_utxo_count = 10;

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [network]
            magic = "testnet"
            connect = "127.0.0.1:18333"

            [cache]
            max_cached_utxo_count = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.network_magic().unwrap(), NetworkMagic::TESTNET);
        assert_eq!(config.network.connect.as_deref(), Some("127.0.0.1:18333"));
        assert_eq!(config.cache.max_cached_utxo_count, 1000);
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [sync]
            stall_window_secs = 5
            worker_threads = 2

            [logging]
            level = "debug"
            format = "json"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.stall_window(), Duration::from_secs(5));
        assert_eq!(config.sync.worker_threads, 2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/chainsync.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_args_override_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nmagic = \"testnet\"\n[sync]\nstall_window_secs = 5").unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            network: Some("regtest".to_string()),
            stall_window_secs: Some(12),
            threads: Some(3),
            ..Args::default()
        };
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.network_magic().unwrap(), NetworkMagic::REGTEST);
        assert_eq!(config.sync.stall_window_secs, 12);
        assert_eq!(config.sync.worker_threads, 3);
    }

    #[test]
    fn test_args_without_file() {
        let config = Config::from_args(Args {
            connect: Some("10.0.0.1:8333".to_string()),
            ..Args::default()
        })
        .unwrap();
        assert_eq!(config.network.connect.as_deref(), Some("10.0.0.1:8333"));
        assert_eq!(config.network_magic().unwrap(), NetworkMagic::MAIN);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[network]"));
        assert!(toml.contains("[sync]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[logging]"));
        assert_eq!(Config::from_toml(&toml).unwrap(), config);
    }
}
