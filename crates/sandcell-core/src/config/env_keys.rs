//! Environment variable key constants and aliases.
//!
//! Primary keys use the `SANDCELL_*` prefix; aliases are consulted in order
//! when the primary key is unset.

/// Execution limits and admission control
pub mod limits {
    pub const SANDCELL_TIMEOUT_SECS: &str = "SANDCELL_TIMEOUT_SECS";
    pub const SANDCELL_MAX_MEMORY_MB: &str = "SANDCELL_MAX_MEMORY_MB";
    pub const SANDCELL_MAX_CONCURRENT: &str = "SANDCELL_MAX_CONCURRENT";
    pub const SANDCELL_HISTORY_CAPACITY: &str = "SANDCELL_HISTORY_CAPACITY";
    pub const SANDCELL_MAX_OUTPUT_BYTES: &str = "SANDCELL_MAX_OUTPUT_BYTES";
    /// Extra address space granted on top of the memory ceiling for the interpreter itself.
    pub const SANDCELL_AS_HEADROOM_MB: &str = "SANDCELL_AS_HEADROOM_MB";
}

/// Scratch space and interpreter locations
pub mod paths {
    pub const SANDCELL_SCRATCH_DIR: &str = "SANDCELL_SCRATCH_DIR";
    pub const SANDCELL_PYTHON: &str = "SANDCELL_PYTHON";
    pub const SANDCELL_NODE: &str = "SANDCELL_NODE";
    pub const SANDCELL_BASH: &str = "SANDCELL_BASH";
    pub const SANDCELL_RULES_FILE: &str = "SANDCELL_RULES_FILE";
}

/// Container engine
pub mod container {
    pub const SANDCELL_CONTAINER_ENGINE: &str = "SANDCELL_CONTAINER_ENGINE";
    pub const CONTAINER_ENGINE_ALIASES: &[&str] = &["CONTAINER_ENGINE"];

    pub const SANDCELL_BUILD_TIMEOUT_SECS: &str = "SANDCELL_BUILD_TIMEOUT_SECS";
    pub const SANDCELL_ENGINE_CHECK_TIMEOUT_SECS: &str = "SANDCELL_ENGINE_CHECK_TIMEOUT_SECS";

    pub const SANDCELL_PYTHON_IMAGE: &str = "SANDCELL_PYTHON_IMAGE";
    pub const SANDCELL_NODE_IMAGE: &str = "SANDCELL_NODE_IMAGE";
    pub const SANDCELL_BASH_IMAGE: &str = "SANDCELL_BASH_IMAGE";
}

/// Observability and logging
pub mod observability {
    pub const SANDCELL_QUIET: &str = "SANDCELL_QUIET";
    pub const SANDCELL_LOG_LEVEL: &str = "SANDCELL_LOG_LEVEL";
    pub const SANDCELL_LOG_JSON: &str = "SANDCELL_LOG_JSON";
    pub const SANDCELL_AUDIT_LOG: &str = "SANDCELL_AUDIT_LOG";
    pub const SANDCELL_SECURITY_EVENTS_LOG: &str = "SANDCELL_SECURITY_EVENTS_LOG";
}
