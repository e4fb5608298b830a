//! Result normalizer: every tier's raw outcome becomes one `ExecutionResult` shape.

use std::time::Duration;

use crate::error::SandboxError;
use crate::executor::ProcessOutcome;
use crate::runner::{ErrorKind, ExecutionResult, IsolationTier, ResourceUsage};
use crate::security::{ScreeningReport, Violation};
use crate::session::SessionStatus;

/// What a stage produced, before it is shaped for the caller.
#[derive(Debug)]
pub enum RawOutcome {
    /// The screener refused the source; nothing ran
    Rejected(ScreeningReport),
    /// The fallback supervisor blocked an import or command
    CapabilityDenied {
        target: String,
        outcome: ProcessOutcome,
    },
    Process(ProcessOutcome),
    Container(ProcessOutcome),
    Infrastructure(SandboxError),
}

/// Facts about the session the raw outcome does not carry.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub session_id: String,
    pub timeout_secs: u64,
    pub tier_used: Option<IsolationTier>,
    pub degraded: bool,
    pub notes: Vec<String>,
    /// Wall-clock time spent on the request (used when no process ran)
    pub elapsed: Duration,
}

impl NormalizeContext {
    fn empty_result(&self, status: SessionStatus) -> ExecutionResult {
        ExecutionResult {
            session_id: self.session_id.clone(),
            status,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: self.elapsed,
            isolation_tier_used: self.tier_used,
            degraded: self.degraded,
            error_kind: None,
            detail: None,
            violations: Vec::new(),
            limit_exceeded: None,
            resource_usage: None,
            notes: self.notes.clone(),
        }
    }
}

pub fn normalize(raw: RawOutcome, ctx: &NormalizeContext) -> ExecutionResult {
    match raw {
        RawOutcome::Rejected(report) => {
            let ids: Vec<&str> = report
                .violations
                .iter()
                .map(|v| v.pattern_id.as_str())
                .collect();
            let mut result = ctx.empty_result(SessionStatus::SecurityRejected);
            // Screening happens before any tier is chosen
            result.isolation_tier_used = None;
            result.error_kind = Some(ErrorKind::SecurityRejected);
            result.detail = Some(format!(
                "code rejected by security screening ({} violation(s): {})",
                report.violations.len(),
                ids.join(", ")
            ));
            result.violations = report.violations;
            result
        }
        RawOutcome::CapabilityDenied { target, outcome } => {
            let mut result = from_process(outcome, ctx);
            result.status = SessionStatus::SecurityRejected;
            result.success = false;
            result.error_kind = Some(ErrorKind::SecurityRejected);
            result.limit_exceeded = None;
            result.detail = Some(format!("capability denied: {}", target));
            result.violations = vec![Violation::capability(&target)];
            result
        }
        RawOutcome::Process(outcome) | RawOutcome::Container(outcome) => from_process(outcome, ctx),
        RawOutcome::Infrastructure(err) => {
            let mut result = ctx.empty_result(SessionStatus::InfrastructureError);
            result.error_kind = Some(if err.is_capacity() {
                ErrorKind::Capacity
            } else {
                ErrorKind::InfrastructureError
            });
            if let SandboxError::BuildFailed { log } = &err {
                result.stderr = log.clone();
            }
            result.detail = Some(err.to_string());
            result
        }
    }
}

fn from_process(outcome: ProcessOutcome, ctx: &NormalizeContext) -> ExecutionResult {
    let mut result = ctx.empty_result(SessionStatus::Completed);
    result.exit_code = outcome.exit_code;
    result.duration = outcome.duration;
    result.limit_exceeded = outcome.limit_exceeded;
    result.resource_usage = Some(outcome.usage);
    if outcome.stdout.truncated || outcome.stderr.truncated {
        result.notes.push("output truncated".to_string());
    }
    result.stdout = outcome.stdout.text;
    result.stderr = outcome.stderr.text;

    if outcome.timed_out {
        result.status = SessionStatus::TimedOut;
        result.error_kind = Some(ErrorKind::TimedOut);
        result.detail = Some(format!(
            "execution exceeded the {}s timeout",
            ctx.timeout_secs
        ));
    } else if let Some(limit) = outcome.limit_exceeded {
        result.status = SessionStatus::RuntimeError;
        result.error_kind = Some(ErrorKind::RuntimeError);
        result.detail = Some(format!("resource limit exceeded: {}", limit));
    } else if let Some(signal) = outcome.signal {
        result.status = SessionStatus::RuntimeError;
        result.error_kind = Some(ErrorKind::RuntimeError);
        result.detail = Some(format!("process terminated by signal {}", signal));
    } else {
        match outcome.exit_code {
            Some(0) => result.success = true,
            Some(code) => {
                // Ran to completion; the program's own failure is not a sandbox error
                result.error_kind = Some(ErrorKind::RuntimeError);
                result.detail = Some(format!("process exited with code {}", code));
            }
            None => {
                result.status = SessionStatus::RuntimeError;
                result.error_kind = Some(ErrorKind::RuntimeError);
                result.detail = Some("process ended without an exit status".to_string());
            }
        }
    }
    result
}
