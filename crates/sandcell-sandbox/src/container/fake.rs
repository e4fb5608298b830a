//! In-memory `ContainerEngine` for deterministic stage-machine tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::engine::{ContainerEngine, ContainerRun, ContainerRunSpec, ContainerState};
use crate::common::CapturedOutput;
use crate::error::SandboxError;

#[derive(Debug, Clone)]
pub struct FakeRun {
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

impl FakeRun {
    pub fn exited(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            timed_out: false,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn timed_out(stdout: &str) -> Self {
        Self {
            exit_code: None,
            timed_out: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }
}

/// Records every call as `op:argument`.
#[derive(Debug)]
pub struct FakeEngine {
    unavailable: Option<String>,
    build_error: Option<String>,
    run: FakeRun,
    oom: bool,
    started: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn available(run: FakeRun) -> Self {
        Self {
            unavailable: None,
            build_error: None,
            run,
            oom: false,
            started: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::available(FakeRun::exited(0, "", ""))
        }
    }

    pub fn failing_build(mut self, log: &str) -> Self {
        self.build_error = Some(log.to_string());
        self
    }

    pub fn oom(mut self) -> Self {
        self.oom = true;
        self
    }

    /// The engine reports the container was created but never started.
    pub fn never_started(mut self) -> Self {
        self.started = false;
        self
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("build:").map(str::to_string))
            .collect()
    }

    /// Every built image was removed, and so was every container that was started.
    pub fn assert_torn_down(&self) {
        let calls = self.calls();
        let with = |prefix: &str| -> HashSet<String> {
            calls
                .iter()
                .filter_map(|c| c.strip_prefix(prefix).map(str::to_string))
                .collect()
        };
        assert_eq!(with("build:"), with("rmi:"), "image teardown mismatch: {:?}", calls);
        assert_eq!(with("run:"), with("rm:"), "container teardown mismatch: {:?}", calls);
    }
}

impl ContainerEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_available(&self) -> Result<(), String> {
        self.record("check".to_string());
        match &self.unavailable {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn build(&self, context: &Path, tag: &str, _base_image: &str) -> Result<(), SandboxError> {
        self.record(format!("build:{}", tag));
        assert!(context.join("Dockerfile").is_file());
        match &self.build_error {
            Some(log) => Err(SandboxError::BuildFailed { log: log.clone() }),
            None => Ok(()),
        }
    }

    fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRun, SandboxError> {
        self.record(format!("run:{}", spec.name));
        Ok(ContainerRun {
            exit_code: self.run.exit_code,
            timed_out: self.run.timed_out,
            stdout: CapturedOutput::from_text(self.run.stdout.clone()),
            stderr: CapturedOutput::from_text(self.run.stderr.clone()),
            elapsed: Duration::from_millis(20),
        })
    }

    fn kill(&self, name: &str) -> Result<(), SandboxError> {
        self.record(format!("kill:{}", name));
        Ok(())
    }

    fn inspect(&self, name: &str) -> Result<ContainerState, SandboxError> {
        self.record(format!("inspect:{}", name));
        Ok(ContainerState {
            started: self.started,
            exit_code: self.run.exit_code,
            oom_killed: self.oom,
        })
    }

    fn remove_container(&self, name: &str) -> Result<(), SandboxError> {
        self.record(format!("rm:{}", name));
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<(), SandboxError> {
        self.record(format!("rmi:{}", tag));
        Ok(())
    }
}
