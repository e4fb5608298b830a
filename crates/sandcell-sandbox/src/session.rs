//! Execution session lifecycle.
//!
//! ```text
//! Pending ──► Running ──► Completed | TimedOut | SecurityRejected | RuntimeError | InfrastructureError
//!    └──────► SecurityRejected | InfrastructureError      (never ran)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::{IsolationTier, Submission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    TimedOut,
    SecurityRejected,
    RuntimeError,
    InfrastructureError,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Pending | SessionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::SecurityRejected => "security_rejected",
            SessionStatus::RuntimeError => "runtime_error",
            SessionStatus::InfrastructureError => "infrastructure_error",
        }
    }

    fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, SecurityRejected | InfrastructureError) => true,
            (Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One submission's trip through the sandbox.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub id: String,
    pub submission: Arc<Submission>,
    /// Tier that actually ran (may differ from the requested one after fallback)
    pub tier_used: Option<IsolationTier>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    status: SessionStatus,
}

impl ExecutionSession {
    pub fn new(id: impl Into<String>, submission: Arc<Submission>) -> Self {
        Self {
            id: id.into(),
            submission,
            tier_used: None,
            started_at: None,
            finished_at: None,
            status: SessionStatus::Pending,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn finish(&mut self, status: SessionStatus) -> Result<(), TransitionError> {
        if !status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: status,
            });
        }
        self.transition(status)?;
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.finished_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Language, Submission};

    fn session() -> ExecutionSession {
        let submission = Submission::new(
            Language::Python,
            "print(1)",
            5,
            32,
            IsolationTier::Process,
        );
        ExecutionSession::new("s-1", Arc::new(submission))
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        assert_eq!(s.status(), SessionStatus::Pending);
        s.start().unwrap();
        assert!(s.started_at.is_some());
        s.finish(SessionStatus::Completed).unwrap();
        assert_eq!(s.status(), SessionStatus::Completed);
        assert!(s.finished_at.unwrap() >= s.started_at.unwrap());
    }

    #[test]
    fn test_rejection_without_running() {
        let mut s = session();
        s.finish(SessionStatus::SecurityRejected).unwrap();
        assert_eq!(s.status(), SessionStatus::SecurityRejected);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut s = session();
        assert_eq!(
            s.finish(SessionStatus::Completed),
            Err(TransitionError {
                from: SessionStatus::Pending,
                to: SessionStatus::Completed
            })
        );
        assert!(s.finish(SessionStatus::TimedOut).is_err());
        s.start().unwrap();
        assert!(s.start().is_err());
        assert!(s.finish(SessionStatus::Pending).is_err());
        s.finish(SessionStatus::TimedOut).unwrap();
        assert!(s.finish(SessionStatus::Completed).is_err());
    }
}
