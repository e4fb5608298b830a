//! Fallback coordinator: reduced-isolation route used when no container engine answers.
//!
//! The submission still runs under the resource-limited executor, wrapped by
//! a fixed per-language supervisor that enforces the capability allow-list at
//! the language's own import / command-resolution boundary. Source and policy
//! reach the supervisor as files; nothing is spliced into executable text.

use std::path::Path;

use sandcell_core::observability;

use crate::error::SandboxError;
use crate::executor::{ExecutionJob, LaunchSpec, ProcessOutcome, ResourceLimitedExecutor, Workspace};
use crate::normalizer::RawOutcome;
use crate::runner::Language;
use crate::security::capability::CAPABILITY_DENIED_EXIT_CODE;
use crate::security::CapabilityPolicy;

const PYTHON_SUPERVISOR: &str = include_str!("supervisor.py");
const NODE_SUPERVISOR: &str = include_str!("supervisor.js");

/// Note attached to every fallback-routed result
pub const DEGRADED_NOTE: &str =
    "container isolation unavailable: ran as a resource-limited process with in-process capability restriction";

#[derive(Debug, Clone)]
pub struct FallbackCoordinator {
    executor: ResourceLimitedExecutor,
}

impl FallbackCoordinator {
    pub fn new(executor: ResourceLimitedExecutor) -> Self {
        Self { executor }
    }

    /// Run `job` through the capability-restricted supervisor.
    pub fn route(&self, job: &ExecutionJob) -> Result<RawOutcome, SandboxError> {
        let language = job.language();
        let policy = CapabilityPolicy::for_language(language);

        crate::info_log!(
            session_id = %job.session_id,
            language = %language,
            "fallback: running under capability restriction"
        );
        let mut outcome = self
            .executor
            .run_with(job, |ws, _runtime| prepare_launch(job, &policy, ws))?;

        match take_denial(language, &policy, &mut outcome) {
            Some(target) => {
                observability::security_capability_denied(&job.session_id, language.as_str(), &target);
                Ok(RawOutcome::CapabilityDenied { target, outcome })
            }
            None => Ok(RawOutcome::Process(outcome)),
        }
    }
}

fn prepare_launch(
    job: &ExecutionJob,
    policy: &CapabilityPolicy,
    ws: &Workspace,
) -> Result<LaunchSpec, SandboxError> {
    let language = job.language();
    let policy_json = policy
        .to_json()
        .map_err(|e| SandboxError::Workspace(std::io::Error::other(e)))?;
    let policy_path = ws.write_file("policy.json", policy_json.as_bytes())?;
    let source_path = ws.write_file(language.script_name(), job.submission.source().as_bytes())?;

    let spec = match language {
        Language::Python => {
            let supervisor = ws.write_file("supervisor.py", PYTHON_SUPERVISOR.as_bytes())?;
            LaunchSpec {
                args: vec![
                    "-I".into(),
                    "-S".into(),
                    "-B".into(),
                    supervisor.into_os_string(),
                    policy_path.into_os_string(),
                    source_path.into_os_string(),
                ],
                cap_address_space: true,
                ..LaunchSpec::default()
            }
        }
        Language::Node => {
            let supervisor = ws.write_file("supervisor.js", NODE_SUPERVISOR.as_bytes())?;
            LaunchSpec {
                args: vec![
                    "--disallow-code-generation-from-strings".into(),
                    format!("--max-old-space-size={}", job.submission.memory_limit_mb()).into(),
                    supervisor.into_os_string(),
                    policy_path.into_os_string(),
                    source_path.into_os_string(),
                ],
                cap_address_space: false,
                ..LaunchSpec::default()
            }
        }
        Language::Bash => {
            let bin = ws.path().join("bin");
            std::fs::create_dir(&bin).map_err(SandboxError::Workspace)?;
            link_allowed_commands(policy, &bin)?;
            LaunchSpec {
                args: vec![
                    "--restricted".into(),
                    "--noprofile".into(),
                    "--norc".into(),
                    source_path.into_os_string(),
                ],
                path: Some(bin.into_os_string()),
                cap_address_space: true,
                ..LaunchSpec::default()
            }
        }
    };
    Ok(spec)
}

/// Populate `bin` with symlinks to the allow-listed commands found on the host.
fn link_allowed_commands(policy: &CapabilityPolicy, bin: &Path) -> Result<(), SandboxError> {
    for command in &policy.allowed {
        match which::which(command) {
            Ok(target) => {
                std::os::unix::fs::symlink(&target, bin.join(command))
                    .map_err(SandboxError::Workspace)?;
            }
            Err(_) => tracing::debug!(command = %command, "allow-listed command not on host, skipping"),
        }
    }
    Ok(())
}

/// Detect a capability denial and strip the supervisor's marker from stderr.
/// Only marker lines carrying this run's token count.
fn take_denial(
    language: Language,
    policy: &CapabilityPolicy,
    outcome: &mut ProcessOutcome,
) -> Option<String> {
    if outcome.timed_out {
        return None;
    }
    match language {
        Language::Python | Language::Node => {
            if outcome.exit_code != Some(CAPABILITY_DENIED_EXIT_CODE) {
                return None;
            }
            let prefix = policy.denial_prefix();
            let stderr = &outcome.stderr.text;
            let target = stderr
                .lines()
                .find_map(|l| l.strip_prefix(prefix.as_str()))
                .map(|t| t.trim().to_string())?;
            outcome.stderr.text = stderr
                .lines()
                .filter(|l| !l.starts_with(prefix.as_str()))
                .map(|l| format!("{}\n", l))
                .collect();
            Some(target)
        }
        Language::Bash => restricted_shell_denial(&outcome.stderr.text),
    }
}

/// Parse bash's own diagnostics for a blocked command.
///
/// `main.sh: line 3: ls: command not found`
/// `main.sh: line 1: /bin/ls: restricted: cannot specify `/' in command names`
fn restricted_shell_denial(stderr: &str) -> Option<String> {
    stderr.lines().find_map(|line| {
        let head = if let Some(idx) = line.find(": command not found") {
            &line[..idx]
        } else if let Some(idx) = line.find(": restricted") {
            &line[..idx]
        } else {
            return None;
        };
        head.rsplit(": ").next().map(|t| t.trim().to_string())
    })
}
