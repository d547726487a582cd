//! Compiler invocation.
//!
//! [`CompilerInvoker`] is the seam between the orchestrator and the external
//! `compactc` process. [`ProcessInvoker`] is the production implementation;
//! tests substitute [`crate::fakes::ScriptedInvoker`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProbeError;

/// Default cap on captured stdout/stderr, per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default time allowed for a `--version` probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// A single compiler run against a prepared workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Resolved compiler executable.
    pub executable: PathBuf,
    /// Primary source file (first positional argument).
    pub source: PathBuf,
    /// Directory the compiler must create (second positional argument).
    pub output_dir: PathBuf,
    /// Working directory of the child process.
    pub working_dir: PathBuf,
    /// Hard wall-clock limit.
    pub timeout: Duration,
}

/// Classified result of running the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Exit status 0 and the output directory exists.
    Success { stdout: String, stderr: String },
    /// Non-zero exit, or exit 0 without an output directory.
    CompilerError {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The executable does not exist.
    ExecutableNotFound { executable: PathBuf },
    /// The deadline passed; the process group was killed.
    Timeout { limit: Duration },
    /// The process could not be started for a reason other than not-found.
    LaunchFailed { reason: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success { .. })
    }
}

/// Capability interface for running the external compiler.
#[async_trait]
pub trait CompilerInvoker: Send + Sync {
    /// Run the compiler described by `invocation`.
    async fn invoke(&self, invocation: &Invocation) -> InvocationOutcome;

    /// Ask `executable` for its version string (`<exe> --version`).
    async fn probe(&self, executable: &Path) -> Result<String, ProbeError>;

    /// Resolve `executable` to a path that exists, searching `PATH` for bare names.
    async fn locate(&self, executable: &Path) -> Option<PathBuf> {
        locate_executable(executable).await
    }
}

/// Spawns `compactc` as a child process in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    max_output_bytes: usize,
    probe_timeout: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ProcessInvoker {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            max_output_bytes,
            ..Self::default()
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

#[async_trait]
impl CompilerInvoker for ProcessInvoker {
    async fn invoke(&self, invocation: &Invocation) -> InvocationOutcome {
        let mut command = Command::new(&invocation.executable);
        command
            .arg(&invocation.source)
            .arg(&invocation.output_dir)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return InvocationOutcome::ExecutableNotFound {
                    executable: invocation.executable.clone(),
                };
            }
            Err(err) => {
                return InvocationOutcome::LaunchFailed {
                    reason: err.to_string(),
                };
            }
        };

        // Kills descendants left behind on every exit path, including when
        // this future is dropped mid-flight.
        let _group = ProcessGroupGuard::new(child.id());
        debug!(pid = ?child.id(), executable = %invocation.executable.display(), "compiler spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let waited = tokio::time::timeout(invocation.timeout, async {
            tokio::join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait()
            )
        })
        .await;

        let (stdout, stderr, status) = match waited {
            Ok(finished) => finished,
            Err(_elapsed) => {
                if let Some(pid) = child.id() {
                    kill_process_group(pid);
                }
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to reap timed-out compiler");
                }
                return InvocationOutcome::Timeout {
                    limit: invocation.timeout,
                };
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(err) => {
                return InvocationOutcome::LaunchFailed {
                    reason: format!("failed to wait for compiler: {err}"),
                };
            }
        };

        if !status.success() {
            return InvocationOutcome::CompilerError {
                exit_code: status.code(),
                stdout,
                stderr,
            };
        }

        let produced_output = tokio::fs::metadata(&invocation.output_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if produced_output {
            InvocationOutcome::Success { stdout, stderr }
        } else {
            InvocationOutcome::CompilerError {
                exit_code: status.code(),
                stdout,
                stderr,
            }
        }
    }

    async fn probe(&self, executable: &Path) -> Result<String, ProbeError> {
        let output = Command::new(executable)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.probe_timeout, output)
            .await
            .map_err(|_| ProbeError::Timeout {
                path: executable.to_path_buf(),
                limit_ms: self.probe_timeout.as_millis() as u64,
            })?
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    ProbeError::NotFound(executable.to_path_buf())
                } else {
                    ProbeError::Io {
                        path: executable.to_path_buf(),
                        source: err,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: executable.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Resolve an executable path.
///
/// Paths with more than one component must point at an existing file. Bare
/// names are looked up in each directory of `PATH`.
pub async fn locate_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 {
        return is_file(executable).await.then(|| executable.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&search_path) {
        let candidate = dir.join(executable);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Read a child stream to EOF, keeping at most `limit` bytes.
///
/// Bytes past the limit are drained and discarded so the child never blocks
/// on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
                if n > room {
                    truncated = true;
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to read compiler output");
                break;
            }
        }
    }

    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: killpg takes plain integers; an unknown group only yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}
