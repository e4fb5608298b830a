//! Container isolation layer.
//!
//! Each submission gets its own image and container, both named from a fresh
//! UUID and never reused:
//!
//! ```text
//! CheckEngineAvailable ──► BuildImage ──► RunContainer ──► Collect ──► Teardown
//!          └─────────────► FallbackRoute
//! ```
//!
//! Any step after `BuildImage` starts proceeds to `Teardown`. When the availability check
//! fails the job is routed to the [`FallbackCoordinator`] and the result is
//! marked degraded.

pub mod engine;
#[cfg(test)]
pub(crate) mod fake;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sandcell_core::observability;
use tempfile::TempDir;

pub use engine::{CliEngine, ContainerEngine, ContainerRun, ContainerRunSpec};

use crate::config::SandboxSettings;
use crate::error::SandboxError;
use crate::executor::{breach_from_stderr, ExecutionJob, ProcessOutcome};
use crate::fallback::FallbackCoordinator;
use crate::normalizer::RawOutcome;
use crate::runner::{IsolationTier, Language, LimitKind, ResourceUsage};

/// Extra wall-clock allowance for container start-up on top of the submission timeout
pub const CONTAINER_STARTUP_GRACE_SECS: u64 = 2;

/// Client exit statuses that mean either the engine failed or the container exited with them
const ENGINE_FAILURE_EXITS: [i32; 3] = [125, 126, 127];
/// 128 + SIGKILL
const KILLED_EXIT: i32 = 137;

const DOCKERFILE: &str = "\
ARG BASE_IMAGE
FROM ${BASE_IMAGE}
COPY main.* /sandbox/
WORKDIR /sandbox
USER 65534:65534
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStage {
    CheckEngineAvailable,
    BuildImage,
    RunContainer,
    Collect,
    Teardown,
    FallbackRoute,
}

/// Result of one pass through the stage machine.
#[derive(Debug)]
pub struct IsolatedOutcome {
    /// Stages visited, in order
    pub stages: Vec<ContainerStage>,
    pub outcome: Result<RawOutcome, SandboxError>,
    pub tier_used: IsolationTier,
    pub degraded: bool,
    pub fallback_reason: Option<String>,
}

/// Command run inside the container for `language`.
pub fn container_command(language: Language, memory_mb: u64) -> Vec<String> {
    let script = format!("/sandbox/{}", language.script_name());
    match language {
        Language::Python => vec!["python3".into(), "-I".into(), "-B".into(), script],
        Language::Node => vec![
            "node".into(),
            format!("--max-old-space-size={}", memory_mb),
            script,
        ],
        Language::Bash => vec![
            "bash".into(),
            "--noprofile".into(),
            "--norc".into(),
            script,
        ],
    }
}

/// Per-submission image, container and build context.
///
/// `teardown` removes them and logs failures; `Drop` runs it if the caller
/// returned early.
struct ContainerArtifact {
    engine: Arc<dyn ContainerEngine>,
    image_tag: String,
    container_name: String,
    context: Option<TempDir>,
    build_attempted: bool,
    run_attempted: bool,
    torn_down: bool,
}

impl ContainerArtifact {
    fn create(engine: Arc<dyn ContainerEngine>, scratch_root: Option<&Path>) -> Result<Self, SandboxError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let prefix = format!("sandcell-build-{}-", id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let context = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;
        Ok(Self {
            engine,
            image_tag: format!("sandcell-run-{}", id),
            container_name: format!("sandcell-{}", id),
            context: Some(context),
            build_attempted: false,
            run_attempted: false,
            torn_down: false,
        })
    }

    fn context_path(&self) -> Option<PathBuf> {
        self.context.as_ref().map(|c| c.path().to_path_buf())
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if self.run_attempted {
            if let Err(e) = self.engine.remove_container(&self.container_name) {
                tracing::warn!(container = %self.container_name, "Failed to remove container: {}", e);
            }
        }
        if self.build_attempted {
            if let Err(e) = self.engine.remove_image(&self.image_tag) {
                tracing::warn!(image = %self.image_tag, "Failed to remove image: {}", e);
            }
        }
        if let Some(context) = self.context.take() {
            let path = context.path().to_path_buf();
            if let Err(e) = context.close() {
                tracing::warn!(path = %path.display(), "Failed to remove build context: {}", e);
            }
        }
    }
}

impl Drop for ContainerArtifact {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Runs jobs in hardened per-submission containers, falling back when no engine answers.
pub struct ContainerIsolation {
    engine: Option<Arc<dyn ContainerEngine>>,
    fallback: FallbackCoordinator,
    settings: SandboxSettings,
}

impl ContainerIsolation {
    pub fn new(
        engine: Option<Arc<dyn ContainerEngine>>,
        fallback: FallbackCoordinator,
        settings: SandboxSettings,
    ) -> Self {
        Self {
            engine,
            fallback,
            settings,
        }
    }

    pub fn engine(&self) -> Option<&Arc<dyn ContainerEngine>> {
        self.engine.as_ref()
    }

    /// Check the configured engine without running anything.
    pub fn check_engine(&self) -> Result<(), String> {
        match &self.engine {
            Some(engine) => engine.check_available(),
            None => Err("no container engine configured".to_string()),
        }
    }

    pub fn run_isolated(&self, job: &ExecutionJob) -> IsolatedOutcome {
        let mut stages = vec![ContainerStage::CheckEngineAvailable];

        let checked = match &self.engine {
            Some(engine) => engine.check_available().map(|()| Arc::clone(engine)),
            None => Err("no container engine configured".to_string()),
        };
        let engine = match checked {
            Ok(engine) => engine,
            Err(reason) => {
                stages.push(ContainerStage::FallbackRoute);
                observability::audit_fallback_engaged(&job.session_id, &reason);
                return IsolatedOutcome {
                    stages,
                    outcome: self.fallback.route(job),
                    tier_used: IsolationTier::Process,
                    degraded: true,
                    fallback_reason: Some(reason),
                };
            }
        };

        let outcome = self.run_in_container(job, engine, &mut stages);
        IsolatedOutcome {
            stages,
            outcome,
            tier_used: IsolationTier::Container,
            degraded: false,
            fallback_reason: None,
        }
    }

    fn run_in_container(
        &self,
        job: &ExecutionJob,
        engine: Arc<dyn ContainerEngine>,
        stages: &mut Vec<ContainerStage>,
    ) -> Result<RawOutcome, SandboxError> {
        let language = job.language();
        let submission = &job.submission;
        let mut artifact = ContainerArtifact::create(Arc::clone(&engine), self.settings.scratch_root.as_deref())?;

        stages.push(ContainerStage::BuildImage);
        let built = self.build_image(job, &engine, &mut artifact);
        if let Err(e) = built {
            stages.push(ContainerStage::Teardown);
            artifact.teardown();
            return Err(e);
        }

        stages.push(ContainerStage::RunContainer);
        crate::info_log!(
            session_id = %job.session_id,
            container = %artifact.container_name,
            engine = engine.name(),
            "container: running"
        );
        let spec = ContainerRunSpec {
            name: artifact.container_name.clone(),
            image: artifact.image_tag.clone(),
            memory_mb: submission.memory_limit_mb() + language.rss_allowance_mb(),
            command: container_command(language, submission.memory_limit_mb()),
            timeout: job.timeout() + Duration::from_secs(CONTAINER_STARTUP_GRACE_SECS),
            max_output_bytes: self.settings.max_output_bytes,
        };
        artifact.run_attempted = true;
        let run = engine.run(&spec);

        let result = run.and_then(|run| {
            stages.push(ContainerStage::Collect);
            collect(engine.as_ref(), &artifact.container_name, run)
        });

        stages.push(ContainerStage::Teardown);
        artifact.teardown();
        result
    }

    fn build_image(
        &self,
        job: &ExecutionJob,
        engine: &Arc<dyn ContainerEngine>,
        artifact: &mut ContainerArtifact,
    ) -> Result<(), SandboxError> {
        let language = job.language();
        let context = artifact
            .context_path()
            .ok_or_else(|| SandboxError::Engine("build context already removed".into()))?;
        std::fs::write(context.join("Dockerfile"), DOCKERFILE).map_err(SandboxError::Workspace)?;
        std::fs::write(
            context.join(language.script_name()),
            job.submission.source().as_bytes(),
        )
        .map_err(SandboxError::Workspace)?;

        tracing::debug!(
            session_id = %job.session_id,
            image = %artifact.image_tag,
            base = self.settings.base_image(language),
            "container: building image"
        );
        artifact.build_attempted = true;
        engine.build(&context, &artifact.image_tag, self.settings.base_image(language))
    }
}

fn engine_failure(run: &ContainerRun, default: &str) -> SandboxError {
    let message = run
        .stderr
        .text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(default)
        .trim()
        .to_string();
    SandboxError::Engine(message)
}

/// Turn the client's view of a container run into a process outcome.
/// Ambiguous client statuses are settled by the engine's record of the container.
fn collect(
    engine: &dyn ContainerEngine,
    name: &str,
    run: ContainerRun,
) -> Result<RawOutcome, SandboxError> {
    let usage = ResourceUsage::from_outputs(&run.stdout, &run.stderr);

    if run.timed_out {
        if let Err(e) = engine.kill(name) {
            tracing::warn!(container = %name, "Failed to kill timed-out container: {}", e);
        }
        return Ok(RawOutcome::Container(ProcessOutcome {
            exit_code: None,
            signal: Some(libc::SIGKILL),
            timed_out: true,
            limit_exceeded: None,
            stdout: run.stdout,
            stderr: run.stderr,
            usage,
            duration: run.elapsed,
        }));
    }

    let code = run.exit_code;
    let (exit_code, signal, limit_exceeded) = match code {
        Some(c) if ENGINE_FAILURE_EXITS.contains(&c) => match engine.inspect(name) {
            Ok(state) if state.started => (state.exit_code.or(code), None, None),
            Ok(_) => return Err(engine_failure(&run, "container was never started")),
            Err(e) => {
                tracing::debug!(container = %name, "inspect failed: {}", e);
                return Err(engine_failure(&run, "container failed to start"));
            }
        },
        Some(KILLED_EXIT) => {
            let limit = match engine.inspect(name) {
                Ok(state) => state.oom_killed.then_some(LimitKind::Memory),
                Err(e) => {
                    tracing::debug!(container = %name, "inspect failed: {}", e);
                    None
                }
            };
            (None, Some(libc::SIGKILL), limit)
        }
        Some(c) => (Some(c), None, None),
        None => (None, None, None),
    };
    let limit_exceeded = limit_exceeded.or_else(|| breach_from_stderr(&run.stderr.text));

    Ok(RawOutcome::Container(ProcessOutcome {
        exit_code,
        signal,
        timed_out: false,
        limit_exceeded,
        stdout: run.stdout,
        stderr: run.stderr,
        usage,
        duration: run.elapsed,
    }))
}
