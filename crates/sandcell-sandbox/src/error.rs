//! Typed failures of sandbox stages.
//!
//! Each stage returns `Result<_, SandboxError>`; the normalizer renders the
//! error to a short `detail` string, so nothing host-side (paths of internal
//! helpers, backtraces) reaches the caller beyond this message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("Unsupported isolation tier '{0}' (expected 'process' or 'container')")]
    UnsupportedIsolation(String),

    #[error("No interpreter available for {0}")]
    RuntimeNotFound(String),

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to spawn {runtime}: {source}")]
    Spawn {
        runtime: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of sandboxed process: {0}")]
    Supervise(#[source] std::io::Error),

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("Image build failed")]
    BuildFailed { log: String },

    #[error("Sandbox at capacity ({active}/{ceiling} sessions running)")]
    Capacity { active: usize, ceiling: usize },
}

impl SandboxError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, SandboxError::Capacity { .. })
    }
}
