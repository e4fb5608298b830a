//! Sandbox facade and the request / result data model.
//!
//! `Sandbox::execute` is the single entry point: it screens the source,
//! admits the session under the concurrency ceiling, dispatches to the
//! requested tier, normalizes the outcome and records it in the registry.
//! Callers never branch on which tier ran.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sandcell_core::observability;
use serde::{Deserialize, Serialize, Serializer};

use crate::common::{CapturedOutput, SupervisedRun};
use crate::config::SandboxSettings;
use crate::container::{CliEngine, ContainerEngine, ContainerIsolation};
use crate::error::SandboxError;
use crate::executor::{ExecutionJob, ResourceLimitedExecutor};
use crate::fallback::{FallbackCoordinator, DEGRADED_NOTE};
use crate::normalizer::{normalize, NormalizeContext, RawOutcome};
use crate::registry::{SandboxRegistry, SessionRecord};
use crate::runtime_resolver::{RuntimeResolver, SystemRuntimes};
use crate::security::{RulesConfig, Screener, ScreeningReport, Violation};
use crate::session::{ExecutionSession, SessionStatus};

// Clamping bounds applied to every request.

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const MIN_MEMORY_MB: u64 = 10;
pub const MAX_MEMORY_MB: u64 = 512;

/// Supported submission languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Node,
    Bash,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
            Language::Bash => "bash",
        }
    }

    /// Whether a screener rule tagged with `tag` applies to this language.
    pub fn matches(self, tag: &str) -> bool {
        match self {
            Language::Python => matches!(tag, "python" | "py"),
            Language::Node => matches!(tag, "node" | "javascript" | "js"),
            Language::Bash => matches!(tag, "bash" | "sh" | "shell"),
        }
    }

    /// File name the source is written to inside a workspace or image.
    pub fn script_name(self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Node => "main.js",
            Language::Bash => "main.sh",
        }
    }

    /// V8 reserves far more address space than it uses, so node gets no
    /// RLIMIT_AS and relies on its heap flag plus RSS monitoring instead.
    pub fn caps_address_space(self) -> bool {
        !matches!(self, Language::Node)
    }

    /// RSS allowed above the ceiling for the runtime itself before the monitor kills it.
    pub fn rss_allowance_mb(self) -> u64 {
        match self {
            Language::Node => 64,
            Language::Python => 32,
            Language::Bash => 0,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" => Some(Language::Python),
            "js" | "cjs" | "mjs" => Some(Language::Node),
            "sh" | "bash" => Some(Language::Bash),
            _ => None,
        }
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "node" | "nodejs" | "javascript" | "js" => Ok(Language::Node),
            "bash" | "sh" | "shell" => Ok(Language::Bash),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a submission runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationTier {
    Process,
    Container,
}

impl IsolationTier {
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationTier::Process => "process",
            IsolationTier::Container => "container",
        }
    }
}

impl FromStr for IsolationTier {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(IsolationTier::Process),
            "container" => Ok(IsolationTier::Container),
            other => Err(SandboxError::UnsupportedIsolation(other.to_string())),
        }
    }
}

impl fmt::Display for IsolationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SecurityRejected,
    TimedOut,
    RuntimeError,
    InfrastructureError,
    /// Admission refused: the concurrency ceiling was reached
    Capacity,
}

/// Which resource ceiling a run hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Memory,
    CpuTime,
    OpenFiles,
    FileSize,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Memory => "memory",
            LimitKind::CpuTime => "cpu_time",
            LimitKind::OpenFiles => "open_files",
            LimitKind::FileSize => "file_size",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage observed for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub peak_rss_bytes: Option<u64>,
    /// User + system CPU time
    pub cpu_time_ms: Option<u64>,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub output_truncated: bool,
}

impl ResourceUsage {
    pub fn from_run(run: &SupervisedRun) -> Self {
        Self {
            peak_rss_bytes: run.peak_rss_bytes,
            cpu_time_ms: run.cpu_time.map(|t| t.as_millis() as u64),
            ..Self::from_outputs(&run.stdout, &run.stderr)
        }
    }

    /// Usage when only the output streams were observable (container runs).
    pub fn from_outputs(stdout: &CapturedOutput, stderr: &CapturedOutput) -> Self {
        Self {
            peak_rss_bytes: None,
            cpu_time_ms: None,
            stdout_bytes: stdout.total_bytes,
            stderr_bytes: stderr.total_bytes,
            output_truncated: stdout.truncated || stderr.truncated,
        }
    }
}

/// A validated submission. Limits are clamped on construction and the
/// value is only ever shared behind `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    language: Language,
    source: String,
    timeout_secs: u64,
    memory_limit_mb: u64,
    requested_tier: IsolationTier,
    notes: Vec<String>,
}

impl Submission {
    pub fn new(
        language: Language,
        source: impl Into<String>,
        timeout_secs: u64,
        memory_limit_mb: u64,
        requested_tier: IsolationTier,
    ) -> Self {
        let mut notes = Vec::new();
        let timeout = clamp_noted("timeout_secs", timeout_secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, &mut notes);
        let memory = clamp_noted("memory_limit_mb", memory_limit_mb, MIN_MEMORY_MB, MAX_MEMORY_MB, &mut notes);
        Self {
            language,
            source: source.into(),
            timeout_secs: timeout,
            memory_limit_mb: memory,
            requested_tier,
            notes,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    pub fn requested_tier(&self) -> IsolationTier {
        self.requested_tier
    }

    /// Clamping notes produced on construction
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

fn clamp_noted(name: &str, value: u64, min: u64, max: u64, notes: &mut Vec<String>) -> u64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        notes.push(format!("{} {} clamped to {}", name, value, clamped));
    }
    clamped
}

/// Caller request for [`Sandbox::execute`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,
    /// Falls back to the configured default; always clamped
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// `"process"` (default) or `"container"`
    #[serde(default)]
    pub isolation: Option<String>,
}

/// One-off tool code for [`Sandbox::build_and_run_tool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolRunResult {
    pub tool_id: String,
    pub result: ExecutionResult,
}

fn duration_as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// The single result shape returned for every request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_seconds", serialize_with = "duration_as_secs")]
    pub duration: Duration,
    pub isolation_tier_used: Option<IsolationTier>,
    pub degraded: bool,
    pub error_kind: Option<ErrorKind>,
    pub detail: Option<String>,
    pub violations: Vec<Violation>,
    pub limit_exceeded: Option<LimitKind>,
    pub resource_usage: Option<ResourceUsage>,
    pub notes: Vec<String>,
}

impl ExecutionResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builder for [`Sandbox`]; lets tests swap the engine, resolver and rules.
pub struct SandboxBuilder {
    settings: SandboxSettings,
    engine: Option<Option<Arc<dyn ContainerEngine>>>,
    resolver: Option<Arc<dyn RuntimeResolver>>,
    rules: Option<RulesConfig>,
}

impl SandboxBuilder {
    /// Container engine to use; `None` disables the container tier (every
    /// container request takes the fallback route).
    pub fn with_engine(mut self, engine: Option<Arc<dyn ContainerEngine>>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn RuntimeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_rules(mut self, rules: RulesConfig) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self) -> Sandbox {
        let settings = self.settings;
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemRuntimes::from_settings(&settings)));
        let engine = self.engine.unwrap_or_else(|| {
            Some(Arc::new(CliEngine::from_settings(&settings)) as Arc<dyn ContainerEngine>)
        });
        let screener = match &self.rules {
            Some(rules) => Screener::with_config(rules),
            None => Screener::new(),
        };
        let executor = ResourceLimitedExecutor::new(&settings, resolver);
        let containers = ContainerIsolation::new(
            engine,
            FallbackCoordinator::new(executor.clone()),
            settings.clone(),
        );
        let registry = SandboxRegistry::new(settings.max_concurrent, settings.history_capacity);
        Sandbox {
            settings,
            screener,
            executor,
            containers,
            registry,
        }
    }
}

/// Secure execution facade. `Send + Sync`; share it behind `Arc`.
pub struct Sandbox {
    settings: SandboxSettings,
    screener: Screener,
    executor: ResourceLimitedExecutor,
    containers: ContainerIsolation,
    registry: SandboxRegistry,
}

impl Sandbox {
    pub fn builder(settings: SandboxSettings) -> SandboxBuilder {
        SandboxBuilder {
            settings,
            engine: None,
            resolver: None,
            rules: None,
        }
    }

    /// Sandbox configured from the environment (and optional YAML rules file).
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = SandboxSettings::from_env();
        let rules = RulesConfig::load_or_default(settings.rules_file.as_deref())?;
        Ok(Self::builder(settings).with_rules(rules).build())
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    pub fn screen(&self, code: &str, language: Language) -> ScreeningReport {
        self.screener.screen(code, language)
    }

    /// Check the container engine; `Err` carries the reason it is unusable.
    pub fn check_engine(&self) -> Result<(), String> {
        self.containers.check_engine()
    }

    pub fn execute(&self, request: ExecuteRequest) -> ExecutionResult {
        let session_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        let parsed = request.language.parse::<Language>().and_then(|language| {
            let tier = match request.isolation.as_deref() {
                Some(tier) => tier.parse::<IsolationTier>()?,
                None => IsolationTier::Process,
            };
            Ok((language, tier))
        });
        let (language, tier) = match parsed {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Request refused: {}", e);
                let ctx = NormalizeContext {
                    session_id,
                    timeout_secs: 0,
                    tier_used: None,
                    degraded: false,
                    notes: Vec::new(),
                    elapsed: start.elapsed(),
                };
                return normalize(RawOutcome::Infrastructure(e), &ctx);
            }
        };

        let submission = Arc::new(Submission::new(
            language,
            request.code,
            request.timeout_secs.unwrap_or(self.settings.default_timeout_secs),
            request.memory_limit_mb.unwrap_or(self.settings.default_memory_mb),
            tier,
        ));
        self.run_submission(session_id, submission, start)
    }

    /// Build and run one-off tool code with the strongest available isolation.
    pub fn build_and_run_tool(&self, request: ToolRequest) -> ToolRunResult {
        let name = request.name.unwrap_or_else(|| "tool".to_string());
        let result = self.execute(ExecuteRequest {
            language: request.language,
            code: request.code,
            timeout_secs: request.timeout_secs,
            memory_limit_mb: request.memory_limit_mb,
            isolation: Some(IsolationTier::Container.as_str().to_string()),
        });
        let short: String = result.session_id.chars().filter(|c| *c != '-').take(12).collect();
        ToolRunResult {
            tool_id: format!("{}-{}", name, short),
            result,
        }
    }

    fn run_submission(&self, session_id: String, submission: Arc<Submission>, start: Instant) -> ExecutionResult {
        let language = submission.language();
        let mut ctx = NormalizeContext {
            session_id: session_id.clone(),
            timeout_secs: submission.timeout_secs(),
            tier_used: None,
            degraded: false,
            notes: submission.notes().to_vec(),
            elapsed: Duration::ZERO,
        };

        let report = self.screener.screen(submission.source(), language);
        if !report.safe {
            let violations = serde_json::to_value(&report.violations).unwrap_or_default();
            observability::security_screening_rejected(&session_id, language.as_str(), &violations);
            crate::info_log!(
                session_id = %session_id,
                violations = report.violations.len(),
                "screening rejected submission"
            );
            ctx.elapsed = start.elapsed();
            // Not admitted, but history still records the rejection.
            let session = ExecutionSession::new(&session_id, Arc::clone(&submission));
            return self.conclude(session, RawOutcome::Rejected(report), &ctx);
        }

        let mut session = ExecutionSession::new(&session_id, Arc::clone(&submission));

        let permit = match self.registry.try_acquire(&session_id, language) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "{}", e);
                ctx.elapsed = start.elapsed();
                return self.conclude(session, RawOutcome::Infrastructure(e), &ctx);
            }
        };

        if let Err(e) = session.start() {
            tracing::warn!(session_id = %session_id, "{}", e);
        }
        observability::audit_execution_started(
            &session_id,
            language.as_str(),
            submission.requested_tier().as_str(),
            submission.timeout_secs(),
            submission.memory_limit_mb(),
        );

        let job = ExecutionJob {
            session_id: session_id.clone(),
            submission: Arc::clone(&submission),
        };
        let raw = match submission.requested_tier() {
            IsolationTier::Process => {
                ctx.tier_used = Some(IsolationTier::Process);
                self.executor
                    .run(&job)
                    .map(RawOutcome::Process)
                    .unwrap_or_else(RawOutcome::Infrastructure)
            }
            IsolationTier::Container => {
                let isolated = self.containers.run_isolated(&job);
                tracing::debug!(session_id = %session_id, stages = ?isolated.stages, "container stages");
                ctx.tier_used = Some(isolated.tier_used);
                ctx.degraded = isolated.degraded;
                if isolated.degraded {
                    ctx.notes.push(DEGRADED_NOTE.to_string());
                    if let Some(reason) = isolated.fallback_reason {
                        ctx.notes.push(format!("fallback reason: {}", reason));
                    }
                }
                isolated.outcome.unwrap_or_else(RawOutcome::Infrastructure)
            }
        };
        session.tier_used = ctx.tier_used;
        ctx.elapsed = start.elapsed();

        let result = self.conclude(session, raw, &ctx);
        drop(permit);
        result
    }

    /// Normalize, close the session, audit and record.
    fn conclude(&self, mut session: ExecutionSession, raw: RawOutcome, ctx: &NormalizeContext) -> ExecutionResult {
        let result = normalize(raw, ctx);
        if let Err(e) = session.finish(result.status) {
            tracing::warn!(session_id = %session.id, "{}", e);
        }
        observability::audit_execution_completed(
            &session.id,
            result.status.as_str(),
            result.exit_code,
            result.duration.as_millis() as u64,
            result.isolation_tier_used.map(IsolationTier::as_str).unwrap_or("none"),
            result.degraded,
        );
        crate::info_log!(
            session_id = %session.id,
            status = %result.status,
            success = result.success,
            degraded = result.degraded,
            "execution finished"
        );
        self.registry.record(SessionRecord::from_session(&session, &result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::{FakeEngine, FakeRun};
    use crate::runtime_resolver::ResolvedRuntime;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn has_python() -> bool {
        which::which("python3").is_ok()
    }

    /// Counts resolutions; a submission that never resolved a runtime never spawned.
    #[derive(Default)]
    struct SpyResolver {
        calls: AtomicUsize,
        inner: SystemRuntimes,
    }

    impl RuntimeResolver for SpyResolver {
        fn resolve(&self, language: Language) -> Option<ResolvedRuntime> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(language)
        }
    }

    fn settings_in(root: &Path) -> SandboxSettings {
        SandboxSettings {
            scratch_root: Some(root.to_path_buf()),
            ..SandboxSettings::default()
        }
    }

    fn sandbox(root: &Path, spy: &Arc<SpyResolver>) -> Sandbox {
        Sandbox::builder(settings_in(root))
            .with_engine(None)
            .with_resolver(Arc::clone(spy) as Arc<dyn RuntimeResolver>)
            .build()
    }

    fn python(code: &str, timeout: u64, memory: u64, isolation: &str) -> ExecuteRequest {
        ExecuteRequest {
            language: "python".into(),
            code: code.into(),
            timeout_secs: Some(timeout),
            memory_limit_mb: Some(memory),
            isolation: Some(isolation.into()),
        }
    }

    fn assert_empty(root: &Path) {
        let left: Vec<_> = std::fs::read_dir(root).unwrap().collect();
        assert!(left.is_empty(), "left behind: {:?}", left);
    }

    #[test]
    fn test_sandbox_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Sandbox>();
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("Python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("javascript".parse::<Language>().unwrap(), Language::Node);
        assert_eq!("sh".parse::<Language>().unwrap(), Language::Bash);
        assert!(matches!(
            "ruby".parse::<Language>(),
            Err(SandboxError::UnsupportedLanguage(_))
        ));
        assert_eq!(Language::from_extension("mjs"), Some(Language::Node));
        assert!("vm".parse::<IsolationTier>().is_err());
    }

    #[test]
    fn test_submission_clamps_and_notes() {
        let s = Submission::new(Language::Python, "", 1000, 1, IsolationTier::Process);
        assert_eq!(s.timeout_secs(), MAX_TIMEOUT_SECS);
        assert_eq!(s.memory_limit_mb(), MIN_MEMORY_MB);
        assert_eq!(s.notes().len(), 2);

        let s = Submission::new(Language::Python, "", 5, 32, IsolationTier::Process);
        assert!(s.notes().is_empty());
    }

    #[test]
    fn test_print_completes_at_memory_floor() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let sb = sandbox(root.path(), &spy);
        for tier in ["process", "container"] {
            let r = sb.execute(python("print(1+1)", 5, 1, tier));
            assert_eq!(r.status, SessionStatus::Completed, "{}: stderr: {}", tier, r.stderr);
            assert!(r.stdout.contains('2'));
        }
    }

    #[test]
    fn test_denylisted_code_is_rejected_without_spawning() {
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let sb = sandbox(root.path(), &spy);

        let r = sb.execute(python("import os\nprint(os.getcwd())", 5, 32, "process"));
        assert_eq!(r.status, SessionStatus::SecurityRejected);
        assert!(!r.success);
        assert!(!r.violations.is_empty());
        assert_eq!(r.error_kind, Some(ErrorKind::SecurityRejected));
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
        assert_empty(root.path());
        let history = sb.registry().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SessionStatus::SecurityRejected);
        assert_eq!(sb.registry().active_count(), 0);
    }

    #[test]
    fn test_print_completes() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let r = sandbox(root.path(), &spy).execute(python("print(1+1)", 5, 32, "process"));
        assert_eq!(r.status, SessionStatus::Completed, "stderr: {}", r.stderr);
        assert!(r.success);
        assert!(r.stdout.contains('2'));
        assert_eq!(r.isolation_tier_used, Some(IsolationTier::Process));
        assert!(!r.degraded);
        assert_empty(root.path());
    }

    #[test]
    fn test_infinite_loop_times_out() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let start = Instant::now();
        let r = sandbox(root.path(), &spy).execute(python("while True:\n    pass\n", 2, 32, "process"));
        let elapsed = start.elapsed();
        assert_eq!(r.status, SessionStatus::TimedOut);
        assert_eq!(r.error_kind, Some(ErrorKind::TimedOut));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(3500), "took {:?}", elapsed);
        assert_empty(root.path());
    }

    #[test]
    fn test_over_allocation_is_memory_runtime_error() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let r = sandbox(root.path(), &spy).execute(python(
            "data = b'x' * (400 * 1024 * 1024)\nprint(len(data))\n",
            10,
            32,
            "process",
        ));
        assert_eq!(r.status, SessionStatus::RuntimeError);
        assert_eq!(r.limit_exceeded, Some(LimitKind::Memory));
        assert_empty(root.path());
    }

    #[test]
    fn test_unavailable_engine_degrades_and_capability_blocks() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::unavailable("daemon not running"));
        let sb = Sandbox::builder(settings_in(root.path()))
            .with_engine(Some(engine as Arc<dyn ContainerEngine>))
            .build();

        // sqlite3 is not on the screener's denylist
        assert!(sb.screen("import sqlite3\n", Language::Python).safe);

        let r = sb.execute(python("import sqlite3\nprint('x')\n", 5, 64, "container"));
        assert!(r.degraded);
        assert_eq!(r.isolation_tier_used, Some(IsolationTier::Process));
        assert_eq!(r.status, SessionStatus::SecurityRejected);
        assert!(r.violations.iter().any(|v| v.pattern_id == "capability" && v.fragment == "sqlite3"));
        assert!(r.notes.iter().any(|n| n == DEGRADED_NOTE));
        assert_empty(root.path());

        let r = sb.execute(python("print(6 * 7)\n", 5, 64, "container"));
        assert!(r.degraded);
        assert!(r.success, "stderr: {}", r.stderr);
        assert_eq!(r.stdout.trim(), "42");
    }

    #[test]
    fn test_container_tier_with_fake_engine_tears_down() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::available(FakeRun::exited(0, "2\n", "")));
        let sb = Sandbox::builder(settings_in(root.path()))
            .with_engine(Some(Arc::clone(&engine) as Arc<dyn ContainerEngine>))
            .build();

        let tool = sb.build_and_run_tool(ToolRequest {
            name: Some("adder".into()),
            language: "python".into(),
            code: "print(1+1)".into(),
            ..ToolRequest::default()
        });
        assert!(tool.tool_id.starts_with("adder-"));
        assert_eq!(tool.result.isolation_tier_used, Some(IsolationTier::Container));
        assert!(tool.result.success);
        assert!(!tool.result.degraded);
        engine.assert_torn_down();
        assert_eq!(engine.built_images().len(), 1);
        assert_empty(root.path());
    }

    #[test]
    fn test_capacity_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let settings = SandboxSettings {
            max_concurrent: 1,
            ..settings_in(root.path())
        };
        let sb = Sandbox::builder(settings)
            .with_engine(None)
            .with_resolver(Arc::clone(&spy) as Arc<dyn RuntimeResolver>)
            .build();

        let _held = sb.registry().try_acquire("occupier", Language::Python).unwrap();
        let start = Instant::now();
        let r = sb.execute(python("print(1)", 5, 32, "process"));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(r.status, SessionStatus::InfrastructureError);
        assert_eq!(r.error_kind, Some(ErrorKind::Capacity));
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bad_request_is_infrastructure_error() {
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let r = sandbox(root.path(), &spy).execute(ExecuteRequest {
            language: "cobol".into(),
            code: "DISPLAY 'HI'".into(),
            ..ExecuteRequest::default()
        });
        assert_eq!(r.status, SessionStatus::InfrastructureError);
        assert!(r.detail.unwrap().contains("cobol"));
    }

    #[test]
    fn test_result_json_shape() {
        let root = tempfile::tempdir().unwrap();
        let spy = Arc::new(SpyResolver::default());
        let r = sandbox(root.path(), &spy).execute(python("import socket", 500, 4096, "process"));
        let v: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        for key in [
            "success",
            "exit_code",
            "stdout",
            "stderr",
            "duration_seconds",
            "isolation_tier_used",
            "degraded",
            "error_kind",
            "detail",
        ] {
            assert!(v.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(v["status"], "security_rejected");
        assert_eq!(v["error_kind"], "security_rejected");
        assert!(v["duration_seconds"].is_f64());
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
    }
}
