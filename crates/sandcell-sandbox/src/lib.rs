#[cfg(not(unix))]
compile_error!("sandcell-sandbox relies on POSIX process groups and rlimits and only builds on unix");

pub mod common;
pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod log;
pub mod normalizer;
pub mod registry;
pub mod rlimit;
pub mod runner;
pub mod runtime_resolver;
pub mod security;
pub mod session;

pub use config::SandboxSettings;
pub use error::SandboxError;
pub use runner::{
    ErrorKind, ExecuteRequest, ExecutionResult, IsolationTier, Language, LimitKind, Sandbox,
    SandboxBuilder, ToolRequest, ToolRunResult,
};
pub use session::SessionStatus;
