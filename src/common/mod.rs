//! Common utilities and types shared across tsmeta

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod path;
pub mod utils;

pub use audit::{AuditEventType, AuditLogger};
pub use auth::{encryptor_for, PasswordEncryptor};
pub use config::{
    ClusterDefaults, Config, CoordinatorConfig, EncryptorKind, LogSyncPolicy, SecurityConfig,
    TTL_FOREVER,
};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use path::PartialPath;
pub use utils::{crc32, format_duration_ms, parse_duration_ms, timestamp_now_millis};
