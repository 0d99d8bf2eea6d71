//! Loading configuration from files and arguments

use chainsync::config::{Args, Config};
use chainsync::protocol::NetworkMagic;
use clap::Parser;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chainsync.toml");
    fs::write(
        &path,
        r#"
[network]
magic = "regtest"
listen = "127.0.0.1:18444"

[sync]
stall_window_secs = 45
watchdog_interval_ms = 250
worker_threads = 4
request_headers_on_connect = false

[cache]
max_cached_utxo_count = 20000

[logging]
level = "chainsync=debug,info"
format = "pretty"
include_target = true
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.network_magic().unwrap(), NetworkMagic::REGTEST);
    assert_eq!(config.network.listen.as_deref(), Some("127.0.0.1:18444"));
    assert_eq!(config.stall_window(), Duration::from_secs(45));
    assert_eq!(config.watchdog_interval(), Duration::from_millis(250));
    assert_eq!(config.sync.worker_threads, 4);
    assert!(!config.sync.request_headers_on_connect);
    assert_eq!(config.cache.max_cached_utxo_count, 20_000);
    assert_eq!(config.logging.format, "pretty");
    assert!(config.logging.include_target);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[network]\nmagic = \"not-a-network\"\n").unwrap();
    assert!(Config::from_file(&path).is_err());

    fs::write(&path, "[cache]\nmax_cached_utxo_count = 0\n").unwrap();
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_command_line_parsing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chainsync.toml");
    fs::write(&path, "[sync]\nstall_window_secs = 90\n").unwrap();

    let args = Args::try_parse_from([
        "chainsync",
        "--config",
        path.to_str().unwrap(),
        "--network",
        "testnet",
        "--connect",
        "198.51.100.7:18333",
        "--max-cached-utxos",
        "1234",
    ])
    .unwrap();
    let config = Config::from_args(args).unwrap();

    assert_eq!(config.network_magic().unwrap(), NetworkMagic::TESTNET);
    assert_eq!(config.network.connect.as_deref(), Some("198.51.100.7:18333"));
    assert_eq!(config.sync.stall_window_secs, 90);
    assert_eq!(config.cache.max_cached_utxo_count, 1234);
}

#[test]
fn test_printed_config_reloads() {
    let config = Config::default();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printed.toml");
    fs::write(&path, config.to_toml().unwrap()).unwrap();
    assert_eq!(Config::from_file(&path).unwrap(), config);
}
