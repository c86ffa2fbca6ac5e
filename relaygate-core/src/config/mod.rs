//! Configuration management for relaygate
//!
//! Configuration comes from a TOML file or from `RELAYGATE_*` environment
//! variables layered over the defaults. Secrets are kept as hex strings
//! here and only turned into keys on demand.

use crate::core_identity::{Identity, Keys};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

mod error;

pub use error::ConfigError;

/// File name of the claim database inside the data directory
pub const CLAIMS_DB_FILE: &str = "claims.db";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay identity and trusted recipient keys
    pub relay: RelayConfig,

    /// Access policy
    pub auth: AuthConfig,

    /// Roster synchronization
    pub sync: SyncConfig,

    /// Persistent storage
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Relay key material
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay secret key (hex); an ephemeral key is used when unset
    pub secret_key: Option<String>,

    /// Extra recipient keys whose wrappers carry key shares
    pub trusted_secret_keys: Vec<String>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("trusted_secret_keys", &self.trusted_secret_keys.len())
            .finish()
    }
}

/// Access policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identities always granted access
    pub whitelist: Vec<String>,

    /// Accepted relay claims
    pub relay_claims: Vec<String>,

    /// Accepted group claims
    pub group_claims: Vec<String>,

    /// Remote authority base URL; the identity is appended
    pub backend_url: Option<String>,

    /// Lifetime of a cached backend answer
    #[serde(with = "humantime_serde")]
    pub backend_ttl: Duration,

    /// Per-request backend timeout
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,

    /// Require authenticated, authorized readers and writers
    pub restrict_user: bool,

    /// Require authorized event authors
    pub restrict_author: bool,

    /// Issue invite codes to authorized users on request
    pub generate_invites: bool,
}

/// Roster synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the periodic sync loop
    pub enabled: bool,

    /// Time between cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Run a cycle immediately at startup
    pub run_on_start: bool,

    /// Replay from zero every N cycles
    pub full_resync_every: Option<u64>,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Data directory for persistent storage
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            relay_claims: Vec::new(),
            group_claims: Vec::new(),
            backend_url: None,
            backend_ttl: Duration::from_secs(60),
            backend_timeout: Duration::from_secs(10),
            restrict_user: true,
            restrict_author: false,
            generate_invites: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            run_on_start: true,
            full_resync_every: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false }
    }
}

impl LoggingConfig {
    /// Subscriber configuration for this section
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level.parse().unwrap_or_default())
            .json_format(self.json_format)
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: RELAYGATE_<SECTION>_<KEY>
    /// Example: RELAYGATE_SYNC_INTERVAL=30s
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Relay config
        if let Some(secret) = lookup("RELAYGATE_RELAY_SECRET") {
            config.relay.secret_key = Some(secret);
        }
        if let Some(secrets) = lookup("RELAYGATE_RELAY_TRUSTED_SECRETS") {
            config.relay.trusted_secret_keys = split_list(&secrets);
        }

        // Auth config
        if let Some(whitelist) = lookup("RELAYGATE_AUTH_WHITELIST") {
            config.auth.whitelist = split_list(&whitelist);
        }
        if let Some(claims) = lookup("RELAYGATE_AUTH_RELAY_CLAIMS") {
            config.auth.relay_claims = split_list(&claims);
        }
        if let Some(claims) = lookup("RELAYGATE_AUTH_GROUP_CLAIMS") {
            config.auth.group_claims = split_list(&claims);
        }
        if let Some(url) = lookup("RELAYGATE_AUTH_BACKEND") {
            config.auth.backend_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
        }
        if let Some(ttl) = lookup("RELAYGATE_AUTH_BACKEND_TTL") {
            config.auth.backend_ttl = humantime::parse_duration(ttl.trim())
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid backend TTL: {}", e)))?;
        }
        if let Some(timeout) = lookup("RELAYGATE_AUTH_BACKEND_TIMEOUT") {
            config.auth.backend_timeout = humantime::parse_duration(timeout.trim()).map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid backend timeout: {}", e))
            })?;
        }
        if let Some(flag) = lookup("RELAYGATE_AUTH_RESTRICT_USER") {
            config.auth.restrict_user = flag.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid restrict_user flag: {}", e))
            })?;
        }
        if let Some(flag) = lookup("RELAYGATE_AUTH_RESTRICT_AUTHOR") {
            config.auth.restrict_author = flag.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid restrict_author flag: {}", e))
            })?;
        }
        if let Some(flag) = lookup("RELAYGATE_AUTH_GENERATE_INVITES") {
            config.auth.generate_invites = flag.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid generate_invites flag: {}", e))
            })?;
        }

        // Sync config
        if let Some(flag) = lookup("RELAYGATE_SYNC_ENABLED") {
            config.sync.enabled = flag
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid sync flag: {}", e)))?;
        }
        if let Some(interval) = lookup("RELAYGATE_SYNC_INTERVAL") {
            config.sync.interval = humantime::parse_duration(interval.trim())
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid sync interval: {}", e)))?;
        }
        if let Some(flag) = lookup("RELAYGATE_SYNC_RUN_ON_START") {
            config.sync.run_on_start = flag.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid run_on_start flag: {}", e))
            })?;
        }
        if let Some(every) = lookup("RELAYGATE_SYNC_FULL_RESYNC_EVERY") {
            config.sync.full_resync_every = Some(every.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid full resync period: {}", e))
            })?);
        }

        // Store config
        if let Some(data_dir) = lookup("RELAYGATE_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }

        // Logging config
        if let Some(level) = lookup("RELAYGATE_LOG_LEVEL") {
            config.logging.level = level.trim().to_ascii_lowercase();
        }
        if let Some(json) = lookup("RELAYGATE_LOG_JSON") {
            config.logging.json_format = json
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate relay config
        if let Some(secret) = &self.relay.secret_key {
            parse_secret("relay.secret_key", secret)?;
        }
        for secret in &self.relay.trusted_secret_keys {
            parse_secret("relay.trusted_secret_keys", secret)?;
        }
        if self.relay.secret_key.is_none() && self.requires_relay_secret() {
            return Err(missing_relay_secret());
        }

        // Validate auth config
        self.whitelist()?;

        if let Some(url) = &self.auth.backend_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationFailed(format!(
                    "backend_url must be an http(s) url: {}",
                    url
                )));
            }
        }

        if self.auth.backend_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "backend_ttl must be greater than 0".to_string(),
            ));
        }

        // Validate sync config
        if self.sync.interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.full_resync_every == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "full_resync_every must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }

    /// Whether the relay key must be stable
    ///
    /// Key shares are addressed to it and invite events are signed with it.
    pub fn requires_relay_secret(&self) -> bool {
        self.sync.enabled || self.auth.generate_invites
    }

    /// The relay's own keys
    ///
    /// A missing secret is an error while sync or invites are enabled.
    /// Otherwise an ephemeral key is generated.
    pub fn relay_keys(&self) -> Result<Keys, ConfigError> {
        match &self.relay.secret_key {
            Some(secret) => parse_secret("relay.secret_key", secret),
            None if self.requires_relay_secret() => Err(missing_relay_secret()),
            None => {
                let keys = Keys::generate();
                warn!(
                    identity = %keys.identity(),
                    "No relay secret configured; using an ephemeral key"
                );
                Ok(keys)
            }
        }
    }

    /// Additional trusted recipient keys
    pub fn trusted_keys(&self) -> Result<Vec<Keys>, ConfigError> {
        self.relay
            .trusted_secret_keys
            .iter()
            .map(|secret| parse_secret("relay.trusted_secret_keys", secret))
            .collect()
    }

    /// Parsed whitelist identities
    pub fn whitelist(&self) -> Result<Vec<Identity>, ConfigError> {
        self.auth
            .whitelist
            .iter()
            .map(|entry| {
                Identity::parse(entry).map_err(|e| {
                    ConfigError::ValidationFailed(format!("Invalid whitelist entry {}: {}", entry, e))
                })
            })
            .collect()
    }

    /// Location of the claim database
    pub fn claims_db_path(&self) -> PathBuf {
        self.store.data_dir.join(CLAIMS_DB_FILE)
    }
}

fn parse_secret(field: &'static str, secret: &str) -> Result<Keys, ConfigError> {
    Keys::parse(secret).map_err(|e| ConfigError::InvalidSecret { field, reason: e.to_string() })
}

fn missing_relay_secret() -> ConfigError {
    ConfigError::InvalidSecret {
        field: "relay.secret_key",
        reason: "required while roster sync or invite generation is enabled".to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use std::collections::HashMap;

    fn configured() -> Config {
        let mut config = Config::default();
        config.relay.secret_key = Some(Keys::generate().secret_hex().as_str().to_string());
        config
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.sync.enabled);
        assert!(config.requires_relay_secret());
        assert!(configured().validate().is_ok());
        assert!(config.auth.restrict_user);
        assert!(!config.auth.restrict_author);
        assert_eq!(config.sync.interval, Duration::from_secs(300));
        assert_eq!(config.auth.backend_ttl, Duration::from_secs(60));
        assert_eq!(config.claims_db_path(), PathBuf::from("./data").join("claims.db"));
    }

    #[test]
    fn test_env_overrides() {
        let relay = Keys::generate();
        let member = Keys::generate();
        let secret = relay.secret_hex();
        let whitelist = format!(" {} ,", member.identity());
        let config = Config::from_lookup(lookup(&[
            ("RELAYGATE_RELAY_SECRET", secret.as_str()),
            ("RELAYGATE_AUTH_WHITELIST", whitelist.as_str()),
            ("RELAYGATE_AUTH_RELAY_CLAIMS", "alpha,beta"),
            ("RELAYGATE_AUTH_BACKEND", "https://auth.example.com/check/"),
            ("RELAYGATE_AUTH_BACKEND_TTL", "2m"),
            ("RELAYGATE_AUTH_RESTRICT_AUTHOR", "true"),
            ("RELAYGATE_SYNC_INTERVAL", "30s"),
            ("RELAYGATE_SYNC_FULL_RESYNC_EVERY", "12"),
            ("RELAYGATE_LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.relay_keys().unwrap().identity(), relay.identity());
        assert_eq!(config.whitelist().unwrap(), vec![member.identity().clone()]);
        assert_eq!(config.auth.relay_claims, vec!["alpha", "beta"]);
        assert_eq!(config.auth.backend_ttl, Duration::from_secs(120));
        assert!(config.auth.restrict_author);
        assert_eq!(config.sync.interval, Duration::from_secs(30));
        assert_eq!(config.sync.full_resync_every, Some(12));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("RELAYGATE_SYNC_INTERVAL", "soon")])),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("RELAYGATE_AUTH_RESTRICT_USER", "maybe")])),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("RELAYGATE_RELAY_SECRET", "not-hex")])),
            Err(ConfigError::InvalidSecret { field: "relay.secret_key", .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = configured();
        config.sync.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config = configured();
        config.auth.backend_ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        config = configured();
        config.auth.backend_url = Some("ftp://example.com/".to_string());
        assert!(config.validate().is_err());

        config = configured();
        config.sync.full_resync_every = Some(0);
        assert!(config.validate().is_err());

        config = configured();
        config.auth.whitelist = vec!["abc".to_string()];
        assert!(config.validate().is_err());

        config = configured();
        config.relay.trusted_secret_keys = vec!["00".repeat(32)];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSecret { .. })));
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = configured();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.to_log_config().level, LogLevel::Debug);
    }

    #[test]
    fn test_missing_relay_secret_is_fatal_while_needed() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSecret { field: "relay.secret_key", .. })
        ));
        assert!(config.relay_keys().is_err());

        config.sync.enabled = false;
        config.auth.generate_invites = true;
        assert!(config.validate().is_err());
        assert!(config.relay_keys().is_err());

        config.auth.generate_invites = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_relay_secret_is_ephemeral() {
        let mut config = Config::default();
        config.sync.enabled = false;
        let first = config.relay_keys().unwrap();
        let second = config.relay_keys().unwrap();
        assert_ne!(first.identity(), second.identity());
    }

    #[test]
    fn test_file_roundtrip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaygate.toml");

        let mut config = configured();
        config.auth.group_claims = vec!["g1".to_string()];
        config.sync.full_resync_every = Some(3);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.auth.group_claims, vec!["g1"]);
        assert_eq!(loaded.sync.full_resync_every, Some(3));
        assert_eq!(loaded.sync.interval, config.sync.interval);

        let partial = dir.path().join("partial.toml");
        std::fs::write(
            &partial,
            "[auth]\nrestrict_author = true\nbackend_ttl = \"5m\"\n\n[sync]\nenabled = false\n",
        )
        .unwrap();
        let loaded = Config::from_file(&partial).unwrap();
        assert!(loaded.auth.restrict_author);
        assert!(loaded.auth.restrict_user);
        assert!(!loaded.sync.enabled);
        assert_eq!(loaded.auth.backend_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = Config::default();
        let keys = Keys::generate();
        config.relay.secret_key = Some(keys.secret_hex().as_str().to_string());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(keys.secret_hex().as_str()));
    }
}
