//! Kernel resource caps applied to a child between fork and exec.
//!
//! Limits are installed with `pre_exec` + `setrlimit` (pure Rust, no wrapper
//! script), and the child is made leader of its own process group so the
//! supervisor can kill every descendant at once.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::common::{CPU_GRACE_SECS, DEFAULT_FILE_SIZE_LIMIT_MB, DEFAULT_MAX_OPEN_FILES};

const MB: u64 = 1024 * 1024;

/// Caps for a single sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// RLIMIT_AS; `None` for runtimes that reserve large virtual ranges (V8)
    pub address_space_bytes: Option<u64>,
    /// RLIMIT_CPU soft limit in seconds (SIGXCPU); hard limit is one second later (SIGKILL)
    pub cpu_secs: u64,
    pub open_files: u64,
    pub file_size_bytes: u64,
}

impl ProcessLimits {
    /// Limits for a run with the given wall-clock timeout and memory ceiling.
    ///
    /// The address space is the ceiling plus `headroom_mb`: interpreters map
    /// shared libraries and arenas well beyond their resident size. The RSS
    /// monitor and the post-exit peak check enforce the ceiling itself.
    pub fn for_run(timeout_secs: u64, memory_mb: u64, headroom_mb: u64, cap_address_space: bool) -> Self {
        Self {
            address_space_bytes: cap_address_space
                .then(|| memory_mb.saturating_add(headroom_mb).saturating_mul(MB)),
            cpu_secs: timeout_secs.saturating_add(CPU_GRACE_SECS),
            open_files: DEFAULT_MAX_OPEN_FILES,
            file_size_bytes: DEFAULT_FILE_SIZE_LIMIT_MB * MB,
        }
    }
}

/// Lower `resource` to `soft`/`hard`, never above the inherited hard limit
/// (raising it needs privileges and would make the spawn fail).
fn lower(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    let (_, inherited_hard) = getrlimit(resource).map_err(io::Error::from)?;
    let hard = hard.min(inherited_hard as u64);
    let soft = soft.min(hard);
    setrlimit(resource, soft as _, hard as _).map_err(io::Error::from)
}

/// Install the caps and process-group isolation on `cmd`.
///
/// A failing `setrlimit` aborts the spawn: running without the caps is not
/// an acceptable degradation.
pub fn apply(cmd: &mut Command, limits: ProcessLimits) {
    cmd.process_group(0);
    // SAFETY: the closure only issues getrlimit/setrlimit syscalls, which are
    // async-signal-safe, and allocates nothing.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(bytes) = limits.address_space_bytes {
                lower(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            lower(
                Resource::RLIMIT_CPU,
                limits.cpu_secs,
                limits.cpu_secs.saturating_add(1),
            )?;
            lower(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files)?;
            lower(Resource::RLIMIT_FSIZE, limits.file_size_bytes, limits.file_size_bytes)?;
            lower(Resource::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn test_for_run_adds_headroom_and_grace() {
        let l = ProcessLimits::for_run(5, 32, 128, true);
        assert_eq!(l.address_space_bytes, Some(160 * MB));
        assert_eq!(l.cpu_secs, 6);
        assert_eq!(l.open_files, DEFAULT_MAX_OPEN_FILES);

        let node = ProcessLimits::for_run(5, 32, 128, false);
        assert_eq!(node.address_space_bytes, None);
    }

    #[test]
    fn test_apply_caps_child_limits() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "ulimit -n; ulimit -c"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        apply(&mut cmd, ProcessLimits::for_run(5, 64, 128, true));
        let out = cmd.output().unwrap();
        let text = String::from_utf8_lossy(&out.stdout);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["64", "0"]);
    }
}
