//! Domain-grouped configuration structs loaded from the environment.

use super::env_keys::observability as obv_keys;
use super::loader::{env_bool, env_optional, env_or};

/// Observability configuration: quiet, log_level, log_json, audit_log, security_events_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    /// Load once per process; later calls return the cached value.
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self::load()
        })
    }

    /// Uncached load, used by `from_env` and tests.
    pub fn load() -> Self {
        Self {
            quiet: env_bool(obv_keys::SANDCELL_QUIET, &[], false),
            log_level: env_or(obv_keys::SANDCELL_LOG_LEVEL, &[], || {
                "sandcell=info".to_string()
            }),
            log_json: env_bool(obv_keys::SANDCELL_LOG_JSON, &[], false),
            audit_log: env_optional(obv_keys::SANDCELL_AUDIT_LOG, &[]),
            security_events_log: env_optional(obv_keys::SANDCELL_SECURITY_EVENTS_LOG, &[]),
        }
    }
}
