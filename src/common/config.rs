//! Configuration for the tsmeta coordinator
//!
//! Loaded once at startup and immutable afterwards. The `[defaults]` section
//! supplies the values merged into storage group creation when a caller leaves
//! a field unset, and is handed to every registering node. Credentials live
//! in `[security]` and never leave the process.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// TTL meaning "never expire"
pub const TTL_FOREVER: i64 = i64::MAX;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "TSMETA_CONFIG";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator process settings
    pub coordinator: CoordinatorConfig,

    /// Cluster-wide defaults
    pub defaults: ClusterDefaults,

    /// Admin credentials and password storage
    pub security: SecurityConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            defaults: ClusterDefaults::default(),
            security: SecurityConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Command log fsync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSyncPolicy {
    /// fsync after every appended plan
    #[default]
    Always,
    /// Leave flushing to the OS
    Never,
}

/// One-way password transform selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptorKind {
    #[default]
    Sha256,
    Argon2,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Identifier reported as leader hint
    pub node_id: String,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Directory holding the command log
    pub data_dir: PathBuf,

    /// Bound on how long a submit waits for commit + apply
    pub consensus_timeout_ms: u64,

    /// Command log sync policy
    pub log_sync: LogSyncPolicy,

    /// Where audit events are appended (stdout only when unset)
    pub audit_log: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: "confignode-1".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 22277)),
            data_dir: PathBuf::from("./confignode-data"),
            consensus_timeout_ms: 10_000,
            log_sync: LogSyncPolicy::Always,
            audit_log: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus_timeout_ms)
    }
}

/// Process-wide defaults merged into new storage groups and handed to
/// registering nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDefaults {
    /// Default TTL in ms
    pub default_ttl_ms: i64,

    pub schema_replication_factor: usize,

    pub data_replication_factor: usize,

    /// Time partition bucket width in ms
    pub time_partition_interval_ms: i64,

    /// Socket and connection timeout between storage nodes and the coordinator
    pub connection_timeout_ms: u64,

    /// Selector threads per client manager
    pub selector_threads: usize,

    pub rpc_compression: bool,
}

/// Credentials of the built-in admin user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub admin_name: String,

    /// Plaintext; encrypted before it reaches the author store
    pub admin_password: String,

    pub password_encryptor: EncryptorKind,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_name: "root".to_string(),
            admin_password: "root".to_string(),
            password_encryptor: EncryptorKind::Sha256,
        }
    }
}

fn default_selector_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 4).max(1))
        .unwrap_or(1)
}

impl Default for ClusterDefaults {
    fn default() -> Self {
        Self {
            default_ttl_ms: TTL_FOREVER,
            schema_replication_factor: 1,
            data_replication_factor: 1,
            time_partition_interval_ms: 604_800_000,
            connection_timeout_ms: 20_000,
            selector_threads: default_selector_threads(),
            rpc_compression: false,
        }
    }
}

impl Config {
    /// Load from the TOML file named by `TSMETA_CONFIG` (default `tsmeta.toml`,
    /// optional), overlaid with `TSMETA_<SECTION>__<KEY>` environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "tsmeta.toml".to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("TSMETA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.defaults;
        if d.schema_replication_factor == 0 || d.data_replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication factors must be at least 1".into(),
            ));
        }
        if d.time_partition_interval_ms <= 0 {
            return Err(Error::InvalidConfig(
                "time_partition_interval_ms must be positive".into(),
            ));
        }
        if d.default_ttl_ms <= 0 {
            return Err(Error::InvalidConfig("default_ttl_ms must be positive".into()));
        }
        if self.security.admin_name.is_empty() {
            return Err(Error::InvalidConfig("admin_name cannot be empty".into()));
        }
        if self.coordinator.consensus_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "consensus_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.defaults.default_ttl_ms, TTL_FOREVER);
        assert!(config.defaults.selector_threads >= 1);
    }

    #[test]
    fn test_rejects_zero_replication() {
        let mut config = Config::default();
        config.defaults.data_replication_factor = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_toml() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[defaults]\nschema_replication_factor = 3\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.defaults.schema_replication_factor, 3);
        assert_eq!(config.defaults.data_replication_factor, 1);
        assert_eq!(config.coordinator.consensus_timeout_ms, 10_000);
    }

    #[test]
    fn test_security_section() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[security]\nadmin_password = \"hunter2\"\npassword_encryptor = \"argon2\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.security.admin_name, "root");
        assert_eq!(config.security.admin_password, "hunter2");
        assert_eq!(config.security.password_encryptor, EncryptorKind::Argon2);
        assert!(!serde_json::to_string(&config.defaults)
            .unwrap()
            .contains("hunter2"));
    }
}
