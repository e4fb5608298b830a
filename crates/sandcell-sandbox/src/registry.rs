//! Session registry: live sessions under a concurrency ceiling plus a bounded history.
//!
//! All state sits behind one `Mutex`; nothing else in the crate keeps
//! process-wide session state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SandboxError;
use crate::runner::{ExecutionResult, IsolationTier, Language};
use crate::session::{ExecutionSession, SessionStatus};

/// One finished session, as kept in history.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub language: Language,
    pub status: SessionStatus,
    pub success: bool,
    pub tier_used: Option<IsolationTier>,
    pub degraded: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl SessionRecord {
    pub fn from_session(session: &ExecutionSession, result: &ExecutionResult) -> Self {
        Self {
            session_id: session.id.clone(),
            language: session.submission.language(),
            status: session.status(),
            success: result.success,
            tier_used: session.tier_used,
            degraded: result.degraded,
            started_at: session.started_at,
            finished_at: session.finished_at,
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub active: usize,
    pub ceiling: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    /// 1, 5 and 15 minute system load averages
    pub load_average: Option<[f64; 3]>,
}

#[derive(Debug)]
struct ActiveSession {
    language: Language,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<String, ActiveSession>,
    history: VecDeque<SessionRecord>,
}

#[derive(Debug)]
pub struct SandboxRegistry {
    state: Mutex<RegistryState>,
    ceiling: usize,
    history_capacity: usize,
}

/// Slot in the live set; released on drop.
#[derive(Debug)]
pub struct SessionPermit<'a> {
    registry: &'a SandboxRegistry,
    session_id: String,
}

impl SessionPermit<'_> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionPermit<'_> {
    fn drop(&mut self) {
        self.registry.lock().active.remove(&self.session_id);
    }
}

impl SandboxRegistry {
    pub fn new(ceiling: usize, history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            ceiling: ceiling.max(1),
            history_capacity: history_capacity.max(1),
        }
    }

    // A panic while holding the lock cannot leave the maps half-updated
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a session or fail fast when the ceiling is reached.
    pub fn try_acquire(
        &self,
        session_id: &str,
        language: Language,
    ) -> Result<SessionPermit<'_>, SandboxError> {
        let mut state = self.lock();
        if state.active.len() >= self.ceiling {
            return Err(SandboxError::Capacity {
                active: state.active.len(),
                ceiling: self.ceiling,
            });
        }
        state.active.insert(
            session_id.to_string(),
            ActiveSession {
                language,
                started_at: Utc::now(),
            },
        );
        Ok(SessionPermit {
            registry: self,
            session_id: session_id.to_string(),
        })
    }

    /// Append to history, evicting the oldest record when full.
    pub fn record(&self, record: SessionRecord) {
        let mut state = self.lock();
        while state.history.len() >= self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Running sessions as `(session_id, language, started_at)`.
    pub fn active_sessions(&self) -> Vec<(String, Language, DateTime<Utc>)> {
        self.lock()
            .active
            .iter()
            .map(|(id, s)| (id.clone(), s.language, s.started_at))
            .collect()
    }

    /// History, oldest first.
    pub fn history(&self) -> Vec<SessionRecord> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn find(&self, session_id: &str) -> Option<SessionRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .find(|r| r.session_id == session_id)
            .cloned()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn telemetry(&self) -> Telemetry {
        let (active, history_len) = {
            let state = self.lock();
            (state.active.len(), state.history.len())
        };
        Telemetry {
            active,
            ceiling: self.ceiling,
            history_len,
            history_capacity: self.history_capacity,
            load_average: load_average(),
        }
    }
}

fn load_average() -> Option<[f64; 3]> {
    let mut loads = [0f64; 3];
    // SAFETY: getloadavg writes at most `nelem` doubles into the buffer
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    (n == 3).then_some(loads)
}
