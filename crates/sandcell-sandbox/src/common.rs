//! Common utilities for sandbox execution
//!
//! Shared by the resource-limited executor and the container CLI engine:
//! default limits, bounded output capture and supervised waiting with
//! wall-clock timeout and RSS monitoring.

use std::io::{self, Read};
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default memory ceiling in MB
pub const DEFAULT_MAX_MEMORY_MB: u64 = 128;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default concurrent session ceiling
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Default number of completed sessions kept in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default captured bytes per output stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Address space granted to the interpreter on top of the memory ceiling
pub const DEFAULT_AS_HEADROOM_MB: u64 = 128;

/// File size limit in MB
pub const DEFAULT_FILE_SIZE_LIMIT_MB: u64 = 16;

/// Open file descriptor ceiling
pub const DEFAULT_MAX_OPEN_FILES: u64 = 64;

/// Maximum number of processes inside a container (fork bomb protection)
pub const DEFAULT_MAX_PROCESSES: u64 = 64;

/// CPU-time allowance beyond the wall-clock timeout
pub const CPU_GRACE_SECS: u64 = 1;

/// Image build timeout in seconds
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;

/// Container engine availability check timeout in seconds
pub const DEFAULT_ENGINE_CHECK_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_PYTHON_IMAGE: &str = "python:3.12-alpine";
pub const DEFAULT_NODE_IMAGE: &str = "node:20-alpine";
pub const DEFAULT_BASH_IMAGE: &str = "bash:5.2";

/// RSS sampling period while a child runs
pub const RSS_SAMPLE_INTERVAL_MS: u64 = 100;

/// How long output readers may keep draining after the child is gone
pub const OUTPUT_DRAIN_GRACE_MS: u64 = 500;

/// Appended to a stream that exceeded the capture cap
pub const TRUNCATION_MARKER: &str = "\n[sandcell: output truncated]\n";

/// Output captured from one stream, capped at a fixed number of bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    /// Bytes the child wrote, including the part that was dropped
    pub total_bytes: u64,
    pub truncated: bool,
}

impl CapturedOutput {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            total_bytes: text.len() as u64,
            text,
            truncated: false,
        }
    }
}

#[derive(Debug)]
struct StreamBuffer {
    bytes: Vec<u8>,
    total: u64,
    cap: usize,
}

impl StreamBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            total: 0,
            cap,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.cap.saturating_sub(self.bytes.len());
        let take = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..take]);
    }

    fn snapshot(&self) -> CapturedOutput {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        let truncated = self.total > self.bytes.len() as u64;
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        CapturedOutput {
            text,
            total_bytes: self.total,
            truncated,
        }
    }
}

/// Background reader for one pipe. The buffer is shared so a snapshot can be
/// taken even when the reader never sees EOF.
struct StreamReader {
    buffer: Arc<Mutex<StreamBuffer>>,
    handle: Option<JoinHandle<()>>,
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>, cap: usize) -> StreamReader {
    let buffer = Arc::new(Mutex::new(StreamBuffer::new(cap)));
    let handle = source.map(|mut src| {
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            // Keep draining past the cap so the child never blocks on a full pipe.
            let mut chunk = [0u8; 8192];
            loop {
                match src.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => match shared.lock() {
                        Ok(mut b) => b.push(&chunk[..n]),
                        Err(poisoned) => poisoned.into_inner().push(&chunk[..n]),
                    },
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
    });
    StreamReader { buffer, handle }
}

impl StreamReader {
    /// Wait for EOF until `deadline`, then snapshot. A reader still blocked
    /// on a pipe held open by an escaped descendant is detached.
    fn finish(mut self, deadline: Instant) -> CapturedOutput {
        if let Some(handle) = self.handle.take() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        match self.buffer.lock() {
            Ok(b) => b.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }
}

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// Killed by the supervisor after the wall-clock budget ran out
    TimedOut,
    /// Killed by the supervisor's RSS monitor
    MemoryKilled { rss_bytes: u64 },
}

/// Supervision parameters for [`supervise`].
#[derive(Debug, Clone, Copy)]
pub struct Supervision {
    pub timeout: Duration,
    /// Kill the process group when RSS goes above this many bytes
    pub rss_limit_bytes: Option<u64>,
    pub max_output_bytes: usize,
}

/// Everything observed about one supervised child.
#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub termination: Termination,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    /// Peak RSS of the child (rusage of that child only, merged with polling)
    pub peak_rss_bytes: Option<u64>,
    /// User + system CPU time of the child
    pub cpu_time: Option<Duration>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChildUsage {
    peak_rss_bytes: Option<u64>,
    cpu_time: Option<Duration>,
}

impl ChildUsage {
    fn from_rusage(usage: &libc::rusage) -> Self {
        let maxrss = usage.ru_maxrss as u64;
        // macOS reports ru_maxrss in bytes, Linux in kilobytes
        #[cfg(target_os = "macos")]
        let peak = maxrss;
        #[cfg(not(target_os = "macos"))]
        let peak = maxrss * 1024;

        let tv = |t: libc::timeval| {
            Duration::from_secs(t.tv_sec.max(0) as u64)
                + Duration::from_micros(t.tv_usec.max(0) as u64)
        };
        Self {
            peak_rss_bytes: (peak > 0).then_some(peak),
            cpu_time: Some(tv(usage.ru_utime) + tv(usage.ru_stime)),
        }
    }
}

/// Reap `pid` with `wait4` so the rusage covers this child only
/// (RUSAGE_CHILDREN would mix in concurrent sessions).
fn reap(pid: libc::pid_t, block: bool) -> io::Result<Option<(Termination, ChildUsage)>> {
    let flags = if block { 0 } else { libc::WNOHANG };
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: zeroed rusage is a valid out-parameter for wait4
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::wait4(pid, &mut status, flags, &mut usage) };
        if ret == 0 {
            return Ok(None);
        }
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        let termination = if libc::WIFEXITED(status) {
            Termination::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            Termination::Signaled(libc::WTERMSIG(status))
        } else {
            Termination::Exited(-1)
        };
        return Ok(Some((termination, ChildUsage::from_rusage(&usage))));
    }
}

/// SIGKILL the process group led by `pid`; falls back to the single pid
/// when the child is not a group leader.
pub fn terminate_group(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if killpg(pid, Signal::SIGKILL).is_err() {
        let _ = kill(pid, Signal::SIGKILL);
    }
}

/// Wait for `child` under a wall-clock budget and an optional RSS ceiling.
///
/// Both pipes are drained on background threads for the whole run, since a
/// child blocked on a full pipe would never exit.
///
/// On timeout or RSS breach the whole process group is killed, then reaped;
/// partial output captured up to that point is returned. The group is also
/// swept after a normal exit so no descendant outlives the run.
pub fn supervise(child: &mut Child, opts: &Supervision) -> io::Result<SupervisedRun> {
    let start = Instant::now();
    let raw_pid = child.id();
    let pid = raw_pid as libc::pid_t;
    let check_interval = Duration::from_millis(RSS_SAMPLE_INTERVAL_MS);

    let stdout = spawn_reader(child.stdout.take(), opts.max_output_bytes);
    let stderr = spawn_reader(child.stderr.take(), opts.max_output_bytes);

    let mut observed_rss: u64 = 0;
    let outcome: io::Result<(Termination, ChildUsage)> = loop {
        match reap(pid, false) {
            Ok(Some(done)) => break Ok(done),
            Ok(None) => {}
            Err(e) => break Err(e),
        }

        if start.elapsed() >= opts.timeout {
            terminate_group(raw_pid);
            break reap(pid, true)
                .map(|r| (Termination::TimedOut, r.map(|(_, u)| u).unwrap_or_default()));
        }

        if let Some(limit) = opts.rss_limit_bytes {
            if let Some(rss) = resident_set_bytes(raw_pid) {
                observed_rss = observed_rss.max(rss);
                if rss > limit {
                    terminate_group(raw_pid);
                    break reap(pid, true).map(|r| {
                        (
                            Termination::MemoryKilled { rss_bytes: rss },
                            r.map(|(_, u)| u).unwrap_or_default(),
                        )
                    });
                }
            }
        }

        let remaining = opts.timeout.saturating_sub(start.elapsed());
        thread::sleep(check_interval.min(remaining).max(Duration::from_millis(5)));
    };

    // Stragglers left in the group (background jobs, forks). The leader is
    // already reaped, so only the group is signalled: its pid may be reused.
    let _ = nix::sys::signal::killpg(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGKILL,
    );

    let deadline = Instant::now() + Duration::from_millis(OUTPUT_DRAIN_GRACE_MS);
    let stdout = stdout.finish(deadline);
    let stderr = stderr.finish(deadline);

    let (termination, usage) = outcome?;
    let peak_rss_bytes = match (usage.peak_rss_bytes, observed_rss) {
        (Some(p), o) => Some(p.max(o)),
        (None, 0) => None,
        (None, o) => Some(o),
    };

    Ok(SupervisedRun {
        termination,
        stdout,
        stderr,
        peak_rss_bytes,
        cpu_time: usage.cpu_time,
        elapsed: start.elapsed(),
    })
}

/// Resident set size of `pid` in bytes, from the `VmRSS` line of procfs.
#[cfg(target_os = "linux")]
pub fn resident_set_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(parse_kib)
}

/// Same as the Linux version, asking `ps` since there is no procfs.
#[cfg(not(target_os = "linux"))]
pub fn resident_set_bytes(pid: u32) -> Option<u64> {
    let out = std::process::Command::new("ps")
        .args(["-o", "rss=", "-p"])
        .arg(pid.to_string())
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    parse_kib(&String::from_utf8_lossy(&out.stdout))
}

/// `"  1234 kB"` or `"1234"` to bytes.
fn parse_kib(field: &str) -> Option<u64> {
    field
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
        .map(|kib| kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap()
    }

    fn opts(timeout_ms: u64) -> Supervision {
        Supervision {
            timeout: Duration::from_millis(timeout_ms),
            rss_limit_bytes: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    #[test]
    fn test_stream_buffer_truncates_with_marker() {
        let mut buf = StreamBuffer::new(4);
        buf.push(b"abc");
        buf.push(b"defgh");
        let out = buf.snapshot();
        assert!(out.truncated);
        assert_eq!(out.total_bytes, 8);
        assert!(out.text.starts_with("abcd"));
        assert!(out.text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_supervise_captures_exit_code_and_streams() {
        let mut child = spawn_sh("echo out; echo err >&2; exit 3");
        let run = supervise(&mut child, &opts(5_000)).unwrap();
        assert_eq!(run.termination, Termination::Exited(3));
        assert_eq!(run.stdout.text.trim(), "out");
        assert_eq!(run.stderr.text.trim(), "err");
        assert!(run.cpu_time.is_some());
    }

    #[test]
    fn test_supervise_timeout_kills_group_and_keeps_partial_output() {
        let mut child = spawn_sh("echo started; sleep 30 & sleep 30");
        let start = Instant::now();
        let run = supervise(&mut child, &opts(300)).unwrap();
        assert_eq!(run.termination, Termination::TimedOut);
        assert!(run.stdout.text.contains("started"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_supervise_caps_large_output() {
        let mut child = spawn_sh("i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done");
        let run = supervise(
            &mut child,
            &Supervision {
                max_output_bytes: 1024,
                ..opts(10_000)
            },
        )
        .unwrap();
        assert_eq!(run.termination, Termination::Exited(0));
        assert!(run.stdout.truncated);
        assert_eq!(run.stdout.total_bytes, 22_000);
    }

    #[test]
    fn test_supervise_kills_on_resident_set_breach() {
        if which::which("python3").is_err() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let mut child = Command::new("python3")
            .args([
                "-c",
                "import time\nblob = b'x' * (200 * 1024 * 1024)\nprint('allocated', flush=True)\ntime.sleep(10)\n",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let limit = 50 * 1024 * 1024;
        let start = Instant::now();
        let run = supervise(
            &mut child,
            &Supervision {
                rss_limit_bytes: Some(limit),
                ..opts(10_000)
            },
        )
        .unwrap();
        match run.termination {
            Termination::MemoryKilled { rss_bytes } => assert!(rss_bytes > limit),
            other => panic!("expected memory kill, got {:?}", other),
        }
        assert!(run.peak_rss_bytes.unwrap() > limit);
        assert!(start.elapsed() < Duration::from_secs(8));
    }
}
