//! ContainerEngine trait: the seam between the isolation layer and a container runtime.
//!
//! `CliEngine` drives the `docker` or `podman` command-line client. Every
//! client invocation is bounded: it runs in its own process group under the
//! same supervisor as sandboxed children, so a hung daemon call is killed.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::common::{
    supervise, CapturedOutput, Supervision, Termination, DEFAULT_FILE_SIZE_LIMIT_MB,
    DEFAULT_MAX_OPEN_FILES, DEFAULT_MAX_PROCESSES,
};
use crate::config::SandboxSettings;
use crate::error::SandboxError;

/// Unprivileged uid:gid the submission runs as inside the container
pub const SANDBOX_USER: &str = "65534:65534";

/// Size of the writable, non-executable /tmp inside the container
pub const TMPFS_SIZE_MB: u64 = 16;

/// Label put on every image and container this crate creates
pub const SANDCELL_LABEL: &str = "io.sandcell.ephemeral=true";

/// Engines tried, in order, when none is configured
const ENGINE_CANDIDATES: &[&str] = &["docker", "podman"];

/// Everything needed to start one hardened container.
#[derive(Debug, Clone)]
pub struct ContainerRunSpec {
    pub name: String,
    pub image: String,
    pub memory_mb: u64,
    /// Command executed inside the container
    pub command: Vec<String>,
    /// Wall-clock budget for the client call
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ContainerRunSpec {
    /// Full `run` argument list. The hardening flags are fixed and not configurable.
    pub fn to_args(&self) -> Vec<String> {
        let memory = format!("{}m", self.memory_mb);
        let mut args: Vec<String> = vec![
            "run".into(),
            "--name".into(),
            self.name.clone(),
            "--label".into(),
            SANDCELL_LABEL.into(),
            "--network".into(),
            "none".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            format!("/tmp:rw,noexec,nosuid,nodev,size={}m", TMPFS_SIZE_MB),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--user".into(),
            SANDBOX_USER.into(),
            "--memory".into(),
            memory.clone(),
            "--memory-swap".into(),
            memory,
            "--cpus".into(),
            "1".into(),
            "--pids-limit".into(),
            DEFAULT_MAX_PROCESSES.to_string(),
            "--ulimit".into(),
            format!("nofile={0}:{0}", DEFAULT_MAX_OPEN_FILES),
            "--ulimit".into(),
            format!(
                "fsize={0}:{0}",
                DEFAULT_FILE_SIZE_LIMIT_MB * 1024 * 1024
            ),
            "--ulimit".into(),
            "core=0:0".into(),
            "--env".into(),
            "HOME=/tmp".into(),
            "--env".into(),
            "SANDCELL_SANDBOX=1".into(),
            "--stop-timeout".into(),
            "1".into(),
        ];
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// What the client call for a container run observed.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    /// Exit status of the client (mirrors the container's exit code)
    pub exit_code: Option<i32>,
    /// The client was killed after the wall-clock budget ran out
    pub timed_out: bool,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed: Duration,
}

/// Engine-side state of a finished container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    /// The container process was started at least once
    pub started: bool,
    pub exit_code: Option<i32>,
    pub oom_killed: bool,
}

/// Date prefix of the zero `StartedAt` of a container that never started.
const NEVER_STARTED: &str = "0001-01-01";

impl ContainerState {
    /// Parse `{{.State.StartedAt}} {{.State.ExitCode}} {{.State.OOMKilled}}`.
    /// Podman prints `StartedAt` with spaces, so fields are taken from the right.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().rsplitn(3, char::is_whitespace);
        let oom_killed = fields.next()? == "true";
        let exit_code = fields.next()?.parse::<i32>().ok()?;
        let started_at = fields.next()?.trim();
        Some(Self {
            started: !started_at.is_empty() && !started_at.starts_with(NEVER_STARTED),
            exit_code: Some(exit_code),
            oom_killed,
        })
    }
}

/// Container runtime operations used by the isolation layer.
pub trait ContainerEngine: Send + Sync {
    /// Short engine name for logs and results
    fn name(&self) -> &str;

    /// `Ok` when the binary resolves and the daemon answers, otherwise the reason.
    fn check_available(&self) -> Result<(), String>;

    /// Build `tag` from the prepared `context` directory.
    /// Fails with [`SandboxError::BuildFailed`] carrying the build log.
    fn build(&self, context: &Path, tag: &str, base_image: &str) -> Result<(), SandboxError>;

    /// Run a container to completion or until `ContainerRunSpec::timeout`.
    fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRun, SandboxError>;

    fn kill(&self, name: &str) -> Result<(), SandboxError>;

    /// The engine's own record of how the container ended.
    fn inspect(&self, name: &str) -> Result<ContainerState, SandboxError>;

    fn remove_container(&self, name: &str) -> Result<(), SandboxError>;

    fn remove_image(&self, tag: &str) -> Result<(), SandboxError>;
}

/// `docker` / `podman` command-line client.
#[derive(Debug, Clone)]
pub struct CliEngine {
    /// Configured binary name or path; `None` autodetects
    binary: Option<String>,
    check_timeout: Duration,
    build_timeout: Duration,
    /// Budget for kill / inspect / rm / rmi calls
    control_timeout: Duration,
}

impl CliEngine {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            binary: settings.container_engine.clone(),
            check_timeout: Duration::from_secs(settings.engine_check_timeout_secs),
            build_timeout: Duration::from_secs(settings.build_timeout_secs),
            control_timeout: Duration::from_secs(settings.engine_check_timeout_secs.max(10)),
        }
    }

    /// Resolve the client binary. Resolution happens per call so an engine
    /// that disappears between runs is noticed by the next availability check.
    fn resolve(&self) -> Option<PathBuf> {
        match &self.binary {
            Some(configured) => which::which(configured).ok(),
            None => ENGINE_CANDIDATES
                .iter()
                .find_map(|candidate| which::which(candidate).ok()),
        }
    }

    fn invoke<I, S>(
        &self,
        args: I,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<ContainerRun, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let binary = self
            .resolve()
            .ok_or_else(|| SandboxError::Engine("container engine binary not found".into()))?;
        let mut cmd = Command::new(&binary);
        cmd.args(args.into_iter().map(Into::<OsString>::into))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            runtime: binary.display().to_string(),
            source,
        })?;
        let run = supervise(
            &mut child,
            &Supervision {
                timeout,
                rss_limit_bytes: None,
                max_output_bytes,
            },
        )
        .map_err(SandboxError::Supervise)?;

        let (exit_code, timed_out) = match run.termination {
            Termination::Exited(code) => (Some(code), false),
            Termination::TimedOut => (None, true),
            Termination::Signaled(_) | Termination::MemoryKilled { .. } => (None, false),
        };
        Ok(ContainerRun {
            exit_code,
            timed_out,
            stdout: run.stdout,
            stderr: run.stderr,
            elapsed: run.elapsed,
        })
    }

    /// Control call that tolerates the object already being gone.
    fn control(&self, args: &[&str], missing_marker: &str) -> Result<(), SandboxError> {
        let run = self.invoke(args.iter().copied(), self.control_timeout, 64 * 1024)?;
        if run.exit_code == Some(0) || run.stderr.text.contains(missing_marker) {
            return Ok(());
        }
        Err(SandboxError::Engine(format!(
            "`{}` failed: {}",
            args.join(" "),
            failure_text(&run)
        )))
    }
}

fn failure_text(run: &ContainerRun) -> String {
    if run.timed_out {
        return "timed out".to_string();
    }
    let stderr = run.stderr.text.trim();
    if stderr.is_empty() {
        format!("exit status {:?}", run.exit_code)
    } else {
        stderr.lines().last().unwrap_or(stderr).to_string()
    }
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        self.binary.as_deref().unwrap_or("auto")
    }

    fn check_available(&self) -> Result<(), String> {
        if self.resolve().is_none() {
            return Err(match &self.binary {
                Some(b) => format!("container engine '{}' not found on PATH", b),
                None => "no container engine (docker, podman) found on PATH".to_string(),
            });
        }
        let run = self
            .invoke(["info"], self.check_timeout, 64 * 1024)
            .map_err(|e| e.to_string())?;
        if run.exit_code == Some(0) {
            Ok(())
        } else {
            Err(format!(
                "container engine not answering: {}",
                failure_text(&run)
            ))
        }
    }

    fn build(&self, context: &Path, tag: &str, base_image: &str) -> Result<(), SandboxError> {
        let args: Vec<OsString> = vec![
            "build".into(),
            "--quiet".into(),
            "--network".into(),
            "none".into(),
            "--label".into(),
            SANDCELL_LABEL.into(),
            "--build-arg".into(),
            format!("BASE_IMAGE={}", base_image).into(),
            "--tag".into(),
            tag.into(),
            context.as_os_str().to_os_string(),
        ];
        let run = self.invoke(args, self.build_timeout, 256 * 1024)?;
        if run.exit_code == Some(0) {
            return Ok(());
        }
        let mut log = run.stderr.text;
        if run.timed_out {
            log.push_str(&format!(
                "\nbuild exceeded {}s and was aborted\n",
                self.build_timeout.as_secs()
            ));
        }
        Err(SandboxError::BuildFailed { log })
    }

    fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRun, SandboxError> {
        self.invoke(spec.to_args(), spec.timeout, spec.max_output_bytes)
    }

    fn kill(&self, name: &str) -> Result<(), SandboxError> {
        self.control(&["kill", name], "No such container")
    }

    fn inspect(&self, name: &str) -> Result<ContainerState, SandboxError> {
        let run = self.invoke(
            [
                "inspect",
                "--format",
                "{{.State.StartedAt}} {{.State.ExitCode}} {{.State.OOMKilled}}",
                name,
            ],
            self.control_timeout,
            4096,
        )?;
        if run.exit_code != Some(0) {
            return Err(SandboxError::Engine(format!(
                "`inspect {}` failed: {}",
                name,
                failure_text(&run)
            )));
        }
        ContainerState::parse(run.stdout.text.trim()).ok_or_else(|| {
            SandboxError::Engine(format!(
                "unexpected inspect output for {}: {:?}",
                name,
                run.stdout.text.trim()
            ))
        })
    }

    fn remove_container(&self, name: &str) -> Result<(), SandboxError> {
        self.control(&["rm", "--force", name], "No such container")
    }

    fn remove_image(&self, tag: &str) -> Result<(), SandboxError> {
        self.control(&["rmi", "--force", tag], "No such image")
    }
}
