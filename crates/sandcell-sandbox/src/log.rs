//! Per-run progress logging that respects `SANDCELL_QUIET`.
//!
//! Embedders that call `Sandbox::execute` in a loop set quiet mode to drop
//! the per-session `info` lines; warnings and audit records are unaffected.

/// `tracing::info!` unless quiet mode is on.
#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

#[inline]
pub fn is_quiet() -> bool {
    sandcell_core::config::ObservabilityConfig::from_env().quiet
}
