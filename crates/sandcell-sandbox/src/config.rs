//! Sandbox settings assembled from the environment.
//!
//! Every knob has a compiled-in default from `common.rs`; the environment
//! (and `.env`) can only move values, never disable a ceiling.

use std::path::PathBuf;

use sandcell_core::config::env_keys::{container as ctr_keys, limits as lim_keys, paths as path_keys};
use sandcell_core::config::{env_optional, env_parse};

use crate::common::{
    DEFAULT_AS_HEADROOM_MB, DEFAULT_BASH_IMAGE, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_MEMORY_MB, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_NODE_IMAGE,
    DEFAULT_ENGINE_CHECK_TIMEOUT_SECS, DEFAULT_PYTHON_IMAGE, DEFAULT_TIMEOUT_SECS,
};
use crate::runner::Language;

/// Runtime configuration for a [`crate::runner::Sandbox`].
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Timeout used when a request does not carry one (still clamped)
    pub default_timeout_secs: u64,
    /// Memory ceiling used when a request does not carry one (still clamped)
    pub default_memory_mb: u64,
    /// Concurrent running sessions before admission fails fast
    pub max_concurrent: usize,
    /// Completed sessions kept in the history ring
    pub history_capacity: usize,
    /// Captured bytes kept per output stream
    pub max_output_bytes: usize,
    /// Address space granted on top of the memory ceiling for the interpreter
    pub as_headroom_mb: u64,
    /// Parent directory for per-session workspaces (system temp dir when unset)
    pub scratch_root: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub node: Option<PathBuf>,
    pub bash: Option<PathBuf>,
    /// Optional YAML screener rules
    pub rules_file: Option<PathBuf>,
    /// Container CLI binary (`docker`, `podman` or a path); autodetected when unset
    pub container_engine: Option<String>,
    pub build_timeout_secs: u64,
    pub engine_check_timeout_secs: u64,
    pub python_image: String,
    pub node_image: String,
    pub bash_image: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            as_headroom_mb: DEFAULT_AS_HEADROOM_MB,
            scratch_root: None,
            python: None,
            node: None,
            bash: None,
            rules_file: None,
            container_engine: None,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            engine_check_timeout_secs: DEFAULT_ENGINE_CHECK_TIMEOUT_SECS,
            python_image: DEFAULT_PYTHON_IMAGE.to_string(),
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            bash_image: DEFAULT_BASH_IMAGE.to_string(),
        }
    }
}

impl SandboxSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        sandcell_core::config::load_dotenv();
        let d = Self::default();
        Self {
            default_timeout_secs: env_parse(lim_keys::SANDCELL_TIMEOUT_SECS, &[])
                .unwrap_or(d.default_timeout_secs),
            default_memory_mb: env_parse(lim_keys::SANDCELL_MAX_MEMORY_MB, &[])
                .unwrap_or(d.default_memory_mb),
            max_concurrent: env_parse::<usize>(lim_keys::SANDCELL_MAX_CONCURRENT, &[])
                .filter(|n| *n > 0)
                .unwrap_or(d.max_concurrent),
            history_capacity: env_parse::<usize>(lim_keys::SANDCELL_HISTORY_CAPACITY, &[])
                .filter(|n| *n > 0)
                .unwrap_or(d.history_capacity),
            max_output_bytes: env_parse::<usize>(lim_keys::SANDCELL_MAX_OUTPUT_BYTES, &[])
                .filter(|n| *n > 0)
                .unwrap_or(d.max_output_bytes),
            as_headroom_mb: env_parse(lim_keys::SANDCELL_AS_HEADROOM_MB, &[])
                .unwrap_or(d.as_headroom_mb),
            scratch_root: env_optional(path_keys::SANDCELL_SCRATCH_DIR, &[]).map(PathBuf::from),
            python: env_optional(path_keys::SANDCELL_PYTHON, &[]).map(PathBuf::from),
            node: env_optional(path_keys::SANDCELL_NODE, &[]).map(PathBuf::from),
            bash: env_optional(path_keys::SANDCELL_BASH, &[]).map(PathBuf::from),
            rules_file: env_optional(path_keys::SANDCELL_RULES_FILE, &[]).map(PathBuf::from),
            container_engine: env_optional(
                ctr_keys::SANDCELL_CONTAINER_ENGINE,
                ctr_keys::CONTAINER_ENGINE_ALIASES,
            ),
            build_timeout_secs: env_parse::<u64>(ctr_keys::SANDCELL_BUILD_TIMEOUT_SECS, &[])
                .filter(|n| *n > 0)
                .unwrap_or(d.build_timeout_secs),
            engine_check_timeout_secs: env_parse::<u64>(ctr_keys::SANDCELL_ENGINE_CHECK_TIMEOUT_SECS, &[])
                .filter(|n| *n > 0)
                .unwrap_or(d.engine_check_timeout_secs),
            python_image: env_optional(ctr_keys::SANDCELL_PYTHON_IMAGE, &[])
                .unwrap_or(d.python_image),
            node_image: env_optional(ctr_keys::SANDCELL_NODE_IMAGE, &[]).unwrap_or(d.node_image),
            bash_image: env_optional(ctr_keys::SANDCELL_BASH_IMAGE, &[]).unwrap_or(d.bash_image),
        }
    }

    /// Base image used to build the per-submission container image.
    pub fn base_image(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python_image,
            Language::Node => &self.node_image,
            Language::Bash => &self.bash_image,
        }
    }

    /// Interpreter override configured for `language`, if any.
    pub fn interpreter_override(&self, language: Language) -> Option<&PathBuf> {
        match language {
            Language::Python => self.python.as_ref(),
            Language::Node => self.node.as_ref(),
            Language::Bash => self.bash.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcell_core::config::{set_env_var, ScopedEnvGuard};

    #[test]
    fn test_defaults() {
        let s = SandboxSettings::default();
        assert_eq!(s.max_concurrent, 8);
        assert_eq!(s.history_capacity, 100);
        assert_eq!(s.max_output_bytes, 1024 * 1024);
        assert_eq!(s.base_image(Language::Python), "python:3.12-alpine");
        assert_eq!(s.base_image(Language::Bash), "bash:5.2");
    }

    #[test]
    fn test_from_env_overrides_and_rejects_zero() {
        let _g1 = ScopedEnvGuard(lim_keys::SANDCELL_MAX_CONCURRENT);
        let _g2 = ScopedEnvGuard(ctr_keys::SANDCELL_NODE_IMAGE);
        set_env_var(lim_keys::SANDCELL_MAX_CONCURRENT, "0");
        set_env_var(ctr_keys::SANDCELL_NODE_IMAGE, "node:22-slim");

        let s = SandboxSettings::from_env();
        assert_eq!(s.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(s.base_image(Language::Node), "node:22-slim");
    }
}
