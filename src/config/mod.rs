//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `mapclient` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MapClientError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Connection lifecycle configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// In-memory store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| MapClientError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| MapClientError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/mapclient/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mapclient").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse("MAP_CLIENT_CONNECT_TIMEOUT_MS") {
            config.connection.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("MAP_CLIENT_DISCONNECT_TIMEOUT_MS") {
            config.connection.disconnect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("MAP_CLIENT_OWN_NUMBER_TIMEOUT_MS") {
            config.connection.own_number_timeout_ms = ms;
        }
        if let Some(count) = env_parse("MAP_CLIENT_LISTING_BATCH") {
            config.connection.listing_batch_size = count;
        }
        if let Some(flag) = env_parse("MAP_CLIENT_DOWNLOAD_ON_LISTING") {
            config.connection.download_on_listing = flag;
        }
        if let Some(count) = env_parse("MAP_CLIENT_OWN_NUMBER_BATCH") {
            config.connection.own_number_batch_size = count;
        }
        if let Some(flag) = env_parse("MAP_CLIENT_NOTIFICATION_REGISTRATION") {
            config.connection.notification_registration = flag;
        }
        if let Some(max) = env_parse("MAP_CLIENT_STORE_MAX_RECORDS") {
            config.store.max_records = max;
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(self, other: Self) -> Self {
        fn pick<T: PartialEq>(ours: T, theirs: T, default: T) -> T {
            if theirs == default {
                ours
            } else {
                theirs
            }
        }

        let defaults = Self::default();
        let (ours, theirs, base) = (self.connection, other.connection, defaults.connection);

        Self {
            connection: ConnectionConfig {
                connect_timeout_ms: pick(
                    ours.connect_timeout_ms,
                    theirs.connect_timeout_ms,
                    base.connect_timeout_ms,
                ),
                disconnect_timeout_ms: pick(
                    ours.disconnect_timeout_ms,
                    theirs.disconnect_timeout_ms,
                    base.disconnect_timeout_ms,
                ),
                own_number_timeout_ms: pick(
                    ours.own_number_timeout_ms,
                    theirs.own_number_timeout_ms,
                    base.own_number_timeout_ms,
                ),
                own_number_batch_size: pick(
                    ours.own_number_batch_size,
                    theirs.own_number_batch_size,
                    base.own_number_batch_size,
                ),
                listing_batch_size: pick(
                    ours.listing_batch_size,
                    theirs.listing_batch_size,
                    base.listing_batch_size,
                ),
                download_on_listing: pick(
                    ours.download_on_listing,
                    theirs.download_on_listing,
                    base.download_on_listing,
                ),
                notification_registration: pick(
                    ours.notification_registration,
                    theirs.notification_registration,
                    base.notification_registration,
                ),
            },
            store: StoreConfig {
                max_records: pick(
                    self.store.max_records,
                    other.store.max_records,
                    defaults.store.max_records,
                ),
            },
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long to wait in Connecting before giving up
    pub connect_timeout_ms: u64,

    /// How long to wait for the session to acknowledge shutdown
    pub disconnect_timeout_ms: u64,

    /// Upper bound on own-number discovery
    pub own_number_timeout_ms: u64,

    /// Listing entries requested per own-number search batch
    pub own_number_batch_size: u16,

    /// Listing entries requested per folder sync
    pub listing_batch_size: u16,

    /// Download every unseen message referenced by a folder listing
    pub download_on_listing: bool,

    /// Register for event reports once discovery is done
    pub notification_registration: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            disconnect_timeout_ms: 3_000,
            own_number_timeout_ms: 3_000,
            own_number_batch_size: 10,
            listing_batch_size: 50,
            download_on_listing: true,
            notification_registration: true,
        }
    }
}

impl ConnectionConfig {
    /// Connect timer duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Disconnect deadline duration
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Own-number search timer duration
    pub fn own_number_timeout(&self) -> Duration {
        Duration::from_millis(self.own_number_timeout_ms)
    }
}

/// In-memory store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of records kept; oldest are evicted first (0 = unbounded)
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_records: 10_000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.disconnect_timeout(), Duration::from_secs(3));
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
        assert!(config.connection.notification_registration);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [connection]
            disconnect_timeout_ms = 500
            own_number_timeout_ms = 250
            download_on_listing = false

            [store]
            max_records = 12
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.disconnect_timeout_ms, 500);
        assert_eq!(config.connection.own_number_timeout_ms, 250);
        assert!(!config.connection.download_on_listing);
        // untouched keys keep their defaults
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.store.max_records, 12);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection]\nconnect_timeout_ms = 42\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.connection.connect_timeout_ms, 42);

        let missing = Config::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(MapClientError::Config(_))));
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let mut base = Config::default();
        base.connection.disconnect_timeout_ms = 900;
        let mut overlay = Config::default();
        overlay.connection.connect_timeout_ms = 1_000;
        overlay.connection.listing_batch_size = 7;
        base.connection.download_on_listing = false;
        base.store.max_records = 5;

        let merged = base.merge(overlay);
        assert_eq!(merged.connection.disconnect_timeout_ms, 900);
        assert_eq!(merged.connection.connect_timeout_ms, 1_000);
        assert_eq!(merged.connection.listing_batch_size, 7);
        assert!(!merged.connection.download_on_listing);
        assert_eq!(merged.store.max_records, 5);
    }

    #[test]
    fn test_from_env() {
        // only this test touches these variables
        std::env::set_var("MAP_CLIENT_OWN_NUMBER_BATCH", "25");
        std::env::set_var("MAP_CLIENT_NOTIFICATION_REGISTRATION", "false");
        std::env::set_var("MAP_CLIENT_STORE_MAX_RECORDS", "64");
        std::env::set_var("MAP_CLIENT_LISTING_BATCH", "not a number");

        let config = Config::from_env();
        assert_eq!(config.connection.own_number_batch_size, 25);
        assert!(!config.connection.notification_registration);
        assert_eq!(config.store.max_records, 64);
        assert_eq!(config.connection.listing_batch_size, 50);

        for key in [
            "MAP_CLIENT_OWN_NUMBER_BATCH",
            "MAP_CLIENT_NOTIFICATION_REGISTRATION",
            "MAP_CLIENT_STORE_MAX_RECORDS",
            "MAP_CLIENT_LISTING_BATCH",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
