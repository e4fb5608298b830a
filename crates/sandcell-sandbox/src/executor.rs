//! Resource-limited executor: one constrained child process per submission.
//!
//! The source is written into a fresh per-session workspace, the interpreter
//! is spawned with a cleared environment inside its own process group with
//! kernel caps installed before exec, and the parent supervises it with a
//! wall-clock timeout independent of the CPU cap.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::common::{supervise, CapturedOutput, SupervisedRun, Supervision, Termination};
use crate::config::SandboxSettings;
use crate::error::SandboxError;
use crate::rlimit::{self, ProcessLimits};
use crate::runner::{Language, LimitKind, ResourceUsage, Submission};
use crate::runtime_resolver::{ResolvedRuntime, RuntimeResolver};

/// PATH given to sandboxed children unless a launch overrides it
pub const DEFAULT_CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const MB: u64 = 1024 * 1024;

/// stderr fragments that mean the runtime itself hit a resource ceiling
const LIMIT_MARKERS: &[(&str, LimitKind)] = &[
    ("MemoryError", LimitKind::Memory),
    ("JavaScript heap out of memory", LimitKind::Memory),
    ("Cannot allocate memory", LimitKind::Memory),
    ("std::bad_alloc", LimitKind::Memory),
    ("Too many open files", LimitKind::OpenFiles),
    ("File too large", LimitKind::FileSize),
];

/// One submission handed to an isolation tier.
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    pub session_id: String,
    pub submission: Arc<Submission>,
}

impl ExecutionJob {
    pub fn language(&self) -> Language {
        self.submission.language()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.submission.timeout_secs())
    }
}

/// What one process run produced, before normalization.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub limit_exceeded: Option<LimitKind>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub usage: ResourceUsage,
    pub duration: Duration,
}

/// How to launch the interpreter inside a prepared workspace.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Replaces [`DEFAULT_CHILD_PATH`]
    pub path: Option<OsString>,
    pub cap_address_space: bool,
}

impl LaunchSpec {
    /// Plain interpreter invocation of a script already in the workspace.
    pub fn plain(language: Language, script: &Path, memory_mb: u64) -> Self {
        let script = script.as_os_str().to_os_string();
        let args = match language {
            Language::Python => vec!["-I".into(), "-B".into(), script],
            Language::Node => vec![format!("--max-old-space-size={}", memory_mb).into(), script],
            Language::Bash => vec!["--noprofile".into(), "--norc".into(), script],
        };
        Self {
            args,
            env: Vec::new(),
            path: None,
            cap_address_space: language.caps_address_space(),
        }
    }
}

/// Per-session scratch directory, named from the session UUID.
///
/// `close` removes it and logs failures; `Drop` is the backstop on early returns.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: Option<&Path>, session_id: &str) -> Result<Self, SandboxError> {
        let prefix = format!("sandcell-{}-", session_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the workspace.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, SandboxError> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).map_err(SandboxError::Workspace)?;
        Ok(path)
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), "Failed to remove workspace: {}", e);
        }
    }
}

/// Spawns and supervises interpreters under kernel resource caps.
#[derive(Clone)]
pub struct ResourceLimitedExecutor {
    resolver: Arc<dyn RuntimeResolver>,
    scratch_root: Option<PathBuf>,
    as_headroom_mb: u64,
    max_output_bytes: usize,
}

impl std::fmt::Debug for ResourceLimitedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLimitedExecutor")
            .field("scratch_root", &self.scratch_root)
            .field("as_headroom_mb", &self.as_headroom_mb)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

impl ResourceLimitedExecutor {
    pub fn new(settings: &SandboxSettings, resolver: Arc<dyn RuntimeResolver>) -> Self {
        Self {
            resolver,
            scratch_root: settings.scratch_root.clone(),
            as_headroom_mb: settings.as_headroom_mb,
            max_output_bytes: settings.max_output_bytes,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn RuntimeResolver> {
        &self.resolver
    }

    /// Run the submission as a plain script.
    pub fn run(&self, job: &ExecutionJob) -> Result<ProcessOutcome, SandboxError> {
        let language = job.language();
        let memory_mb = job.submission.memory_limit_mb();
        self.run_with(job, |ws, _runtime| {
            let script = ws.write_file(language.script_name(), job.submission.source().as_bytes())?;
            Ok(LaunchSpec::plain(language, &script, memory_mb))
        })
    }

    /// Run with a custom launch prepared inside the workspace (used by the fallback route).
    pub fn run_with<F>(&self, job: &ExecutionJob, prepare: F) -> Result<ProcessOutcome, SandboxError>
    where
        F: FnOnce(&Workspace, &ResolvedRuntime) -> Result<LaunchSpec, SandboxError>,
    {
        let language = job.language();
        let runtime = self
            .resolver
            .resolve(language)
            .ok_or_else(|| SandboxError::RuntimeNotFound(language.to_string()))?;

        let workspace = Workspace::create(self.scratch_root.as_deref(), &job.session_id)?;
        let result = prepare(&workspace, &runtime)
            .and_then(|spec| self.spawn_supervised(job, &runtime, workspace.path(), spec));
        workspace.close();
        result
    }

    fn spawn_supervised(
        &self,
        job: &ExecutionJob,
        runtime: &ResolvedRuntime,
        workdir: &Path,
        spec: LaunchSpec,
    ) -> Result<ProcessOutcome, SandboxError> {
        let submission = &job.submission;
        let language = job.language();

        let mut cmd = Command::new(&runtime.interpreter);
        cmd.args(&spec.args)
            .current_dir(workdir)
            .env_clear()
            .env(
                "PATH",
                spec.path.clone().unwrap_or_else(|| DEFAULT_CHILD_PATH.into()),
            )
            .env("HOME", workdir)
            .env("TMPDIR", workdir)
            .env("LANG", "C.UTF-8")
            .env("SANDCELL_SANDBOX", "1");
        for (key, value) in runtime.extra_env.iter().chain(spec.env.iter()) {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let limits = ProcessLimits::for_run(
            submission.timeout_secs(),
            submission.memory_limit_mb(),
            self.as_headroom_mb,
            spec.cap_address_space,
        );
        rlimit::apply(&mut cmd, limits);

        let rss_limit = (submission.memory_limit_mb() + language.rss_allowance_mb()) * MB;

        crate::info_log!(
            session_id = %job.session_id,
            language = %language,
            timeout_secs = submission.timeout_secs(),
            memory_limit_mb = submission.memory_limit_mb(),
            "executor: spawning"
        );
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            runtime: runtime.interpreter.display().to_string(),
            source,
        })?;

        let run = supervise(
            &mut child,
            &Supervision {
                timeout: job.timeout(),
                rss_limit_bytes: Some(rss_limit),
                max_output_bytes: self.max_output_bytes,
            },
        )
        .map_err(SandboxError::Supervise)?;

        tracing::debug!(
            session_id = %job.session_id,
            termination = ?run.termination,
            peak_rss_bytes = ?run.peak_rss_bytes,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "executor: child finished"
        );
        Ok(classify(run, &limits, rss_limit))
    }
}

/// Map a supervised run to a process outcome, folding limit breaches into an annotation.
fn classify(run: SupervisedRun, limits: &ProcessLimits, rss_limit_bytes: u64) -> ProcessOutcome {
    let (exit_code, signal, timed_out) = match run.termination {
        Termination::Exited(code) => (Some(code), None, false),
        Termination::Signaled(sig) => (None, Some(sig), false),
        Termination::TimedOut => (None, Some(libc::SIGKILL), true),
        Termination::MemoryKilled { .. } => (None, Some(libc::SIGKILL), false),
    };

    let limit_exceeded = if timed_out {
        None
    } else {
        breach_from_termination(&run, limits)
            .or_else(|| {
                run.peak_rss_bytes
                    .filter(|peak| *peak > rss_limit_bytes)
                    .map(|_| LimitKind::Memory)
            })
            .or_else(|| breach_from_stderr(&run.stderr.text))
    };

    ProcessOutcome {
        exit_code,
        signal,
        timed_out,
        limit_exceeded,
        usage: ResourceUsage::from_run(&run),
        stdout: run.stdout,
        stderr: run.stderr,
        duration: run.elapsed,
    }
}

fn breach_from_termination(run: &SupervisedRun, limits: &ProcessLimits) -> Option<LimitKind> {
    match run.termination {
        Termination::MemoryKilled { .. } => Some(LimitKind::Memory),
        Termination::Signaled(sig) if sig == libc::SIGXCPU => Some(LimitKind::CpuTime),
        Termination::Signaled(sig) if sig == libc::SIGXFSZ => Some(LimitKind::FileSize),
        // SIGKILL we did not send: either the CPU hard limit or the kernel OOM killer
        Termination::Signaled(sig) if sig == libc::SIGKILL => {
            let cpu_secs = run.cpu_time.map(|t| t.as_secs()).unwrap_or(0);
            if cpu_secs >= limits.cpu_secs {
                Some(LimitKind::CpuTime)
            } else {
                Some(LimitKind::Memory)
            }
        }
        // Allocation failures in native code usually surface as these
        Termination::Signaled(sig)
            if sig == libc::SIGSEGV || sig == libc::SIGABRT || sig == libc::SIGBUS =>
        {
            Some(LimitKind::Memory)
        }
        _ => None,
    }
}

/// Detect a runtime-reported resource ceiling in captured stderr.
pub fn breach_from_stderr(stderr: &str) -> Option<LimitKind> {
    LIMIT_MARKERS
        .iter()
        .find(|(marker, _)| stderr.contains(marker))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::IsolationTier;
    use crate::runtime_resolver::SystemRuntimes;
    use std::time::Instant;

    fn has(bin: &str) -> bool {
        which::which(bin).is_ok()
    }

    fn executor_in(root: &Path) -> ResourceLimitedExecutor {
        let settings = SandboxSettings {
            scratch_root: Some(root.to_path_buf()),
            ..SandboxSettings::default()
        };
        ResourceLimitedExecutor::new(&settings, Arc::new(SystemRuntimes::default()))
    }

    fn job(language: Language, source: &str, timeout: u64, memory: u64) -> ExecutionJob {
        ExecutionJob {
            session_id: uuid::Uuid::new_v4().to_string(),
            submission: Arc::new(Submission::new(
                language,
                source,
                timeout,
                memory,
                IsolationTier::Process,
            )),
        }
    }

    fn assert_empty(root: &Path) {
        let left: Vec<_> = std::fs::read_dir(root).unwrap().collect();
        assert!(left.is_empty(), "workspace left behind: {:?}", left);
    }

    #[test]
    fn test_breach_from_stderr() {
        assert_eq!(
            breach_from_stderr("Traceback ...\nMemoryError\n"),
            Some(LimitKind::Memory)
        );
        assert_eq!(
            breach_from_stderr("OSError: [Errno 24] Too many open files"),
            Some(LimitKind::OpenFiles)
        );
        assert_eq!(breach_from_stderr("ZeroDivisionError"), None);
    }

    #[test]
    fn test_python_print_completes_and_cleans_up() {
        if !has("python3") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let out = executor_in(root.path())
            .run(&job(Language::Python, "print(1+1)", 5, 32))
            .unwrap();
        assert_eq!(out.exit_code, Some(0), "stderr: {}", out.stderr.text);
        assert_eq!(out.stdout.text.trim(), "2");
        assert!(out.limit_exceeded.is_none());
        assert_empty(root.path());
    }

    #[test]
    fn test_python_sleep_times_out_within_budget() {
        if !has("python3") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let out = executor_in(root.path())
            .run(&job(
                Language::Python,
                "import time\nprint('before', flush=True)\ntime.sleep(30)\n",
                1,
                32,
            ))
            .unwrap();
        assert!(out.timed_out);
        assert!(out.stdout.text.contains("before"));
        assert!(start.elapsed() < Duration::from_millis(2500));
        assert_empty(root.path());
    }

    #[test]
    fn test_python_over_allocation_is_memory_breach() {
        if !has("python3") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let out = executor_in(root.path())
            .run(&job(
                Language::Python,
                "data = b'x' * (400 * 1024 * 1024)\nprint(len(data))\n",
                10,
                32,
            ))
            .unwrap();
        assert!(!out.timed_out);
        assert_eq!(out.limit_exceeded, Some(LimitKind::Memory));
        assert_empty(root.path());
    }

    #[test]
    fn test_bash_env_is_cleared_and_exit_code_kept() {
        if !has("bash") {
            eprintln!("bash not available, skipping");
            return;
        }
        let _g = sandcell_core::config::ScopedEnvGuard("SANDCELL_TEST_EXECUTOR_SECRET");
        sandcell_core::config::set_env_var("SANDCELL_TEST_EXECUTOR_SECRET", "hunter2");
        let root = tempfile::tempdir().unwrap();
        let out = executor_in(root.path())
            .run(&job(
                Language::Bash,
                "echo \"[$SANDCELL_TEST_EXECUTOR_SECRET]\"\nexit 4\n",
                5,
                32,
            ))
            .unwrap();
        assert_eq!(out.exit_code, Some(4));
        assert_eq!(out.stdout.text.trim(), "[]");
        assert_empty(root.path());
    }

    #[test]
    fn test_missing_runtime_creates_nothing() {
        struct NoRuntimes;
        impl RuntimeResolver for NoRuntimes {
            fn resolve(&self, _language: Language) -> Option<ResolvedRuntime> {
                None
            }
        }
        let root = tempfile::tempdir().unwrap();
        let settings = SandboxSettings {
            scratch_root: Some(root.path().to_path_buf()),
            ..SandboxSettings::default()
        };
        let exec = ResourceLimitedExecutor::new(&settings, Arc::new(NoRuntimes));
        let err = exec
            .run(&job(Language::Python, "print(1)", 5, 32))
            .unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeNotFound(_)));
        assert_empty(root.path());
    }
}
