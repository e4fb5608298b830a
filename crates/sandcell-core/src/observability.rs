//! Tracing setup plus the two append-only JSONL sinks: the audit log and
//! the security-event log, both configured through `ObservabilityConfig`.
//! Audit and security-event records are appended as JSON lines; a missing path
//! disables the corresponding sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Quiet mode caps sandcell targets at `warn`;
/// `RUST_LOG` overrides both. Output goes to stderr since stdout carries results.
pub fn init_tracing() {
    let cfg = ObservabilityConfig::from_env();
    let directives = if cfg.quiet {
        "sandcell=warn".to_string()
    } else {
        cfg.log_level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let json = cfg
        .log_json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text = (!cfg.log_json).then(|| fmt::layer().with_writer(std::io::stderr));

    // A second call (tests, embedders with their own subscriber) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init();
}

fn resolve_sink(configured: Option<&String>) -> Option<PathBuf> {
    let path = PathBuf::from(configured?);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    Some(path)
}

fn audit_path() -> Option<&'static Path> {
    static AUDIT_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
    AUDIT_PATH
        .get_or_init(|| resolve_sink(ObservabilityConfig::from_env().audit_log.as_ref()))
        .as_deref()
}

fn security_events_path() -> Option<&'static Path> {
    static SECURITY_EVENTS_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
    SECURITY_EVENTS_PATH
        .get_or_init(|| {
            resolve_sink(ObservabilityConfig::from_env().security_events_log.as_ref())
        })
        .as_deref()
}

/// Append one record as a JSON line. Sink failures are logged, never propagated.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!("Failed to serialize audit record: {}", e);
            return;
        }
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            if let Err(e) = writeln!(f, "{}", line) {
                tracing::warn!(path = %path.display(), "Failed to append audit record: {}", e);
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to open audit log: {}", e);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: execution_started (right before the isolation tier is entered)
pub fn audit_execution_started(
    session_id: &str,
    language: &str,
    tier: &str,
    timeout_secs: u64,
    memory_limit_mb: u64,
) {
    if let Some(path) = audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_started",
            "session_id": session_id,
            "language": language,
            "tier": tier,
            "timeout_secs": timeout_secs,
            "memory_limit_mb": memory_limit_mb,
        });
        append_jsonl(path, &record);
    }
}

/// Audit: execution_completed
pub fn audit_execution_completed(
    session_id: &str,
    status: &str,
    exit_code: Option<i32>,
    duration_ms: u64,
    tier_used: &str,
    degraded: bool,
) {
    if let Some(path) = audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_completed",
            "session_id": session_id,
            "status": status,
            "exit_code": exit_code,
            "duration_ms": duration_ms,
            "tier_used": tier_used,
            "degraded": degraded,
        });
        append_jsonl(path, &record);
    }
}

/// Audit: fallback_engaged (container tier requested, engine unavailable)
pub fn audit_fallback_engaged(session_id: &str, reason: &str) {
    tracing::warn!(
        session_id = %session_id,
        reason = %reason,
        "Container engine unavailable, running with reduced isolation"
    );
    if let Some(path) = audit_path() {
        let record = json!({
            "ts": now(),
            "event": "fallback_engaged",
            "session_id": session_id,
            "reason": reason,
        });
        append_jsonl(path, &record);
    }
}

/// Security event: submission rejected by the static screener
pub fn security_screening_rejected(
    session_id: &str,
    language: &str,
    violations: &serde_json::Value,
) {
    tracing::warn!(
        session_id = %session_id,
        language = %language,
        "Security: submission rejected by screener"
    );
    if let Some(path) = security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "screening_rejected",
            "category": "code_scan",
            "session_id": session_id,
            "details": {
                "language": language,
                "violations": violations,
            }
        });
        append_jsonl(path, &record);
    }
}

/// Security event: the in-process capability layer blocked an import or command
pub fn security_capability_denied(session_id: &str, language: &str, target: &str) {
    tracing::warn!(
        session_id = %session_id,
        language = %language,
        target = %target,
        "Security: capability layer blocked access"
    );
    if let Some(path) = security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "capability_denied",
            "category": "runtime",
            "session_id": session_id,
            "details": {
                "language": language,
                "target": target,
            }
        });
        append_jsonl(path, &record);
    }
}
