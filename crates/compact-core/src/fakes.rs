//! In-memory fakes for the compiler seam (testing only)
//!
//! [`ScriptedInvoker`] satisfies [`CompilerInvoker`] without launching a
//! process: it writes scripted artifacts into the requested output directory
//! and records every invocation it receives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::invoker::{CompilerInvoker, Invocation, InvocationOutcome};

/// Behaviour of a scripted compiler run.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Create the output directory, write these files, exit 0.
    Emit {
        artifacts: Vec<(String, String)>,
        stdout: String,
    },
    /// Exit non-zero with the given stderr.
    Fail { exit_code: i32, stderr: String },
    /// Exit 0 without creating the output directory.
    NoOutput,
    /// Never finish; reported as a timeout once the deadline passes.
    Hang,
    /// Behave as if the executable vanished between lookup and launch.
    Missing,
}

impl ScriptedStep {
    pub fn emit<const N: usize>(artifacts: [(&str, &str); N]) -> Self {
        ScriptedStep::Emit {
            artifacts: artifacts
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            stdout: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        ScriptedStep::Fail {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

/// Scripted stand-in for `compactc`.
#[derive(Debug)]
pub struct ScriptedInvoker {
    step: ScriptedStep,
    executables_present: bool,
    probes: BTreeMap<PathBuf, String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Invocation>>,
}

impl ScriptedInvoker {
    pub fn new(step: ScriptedStep) -> Self {
        Self {
            step,
            executables_present: true,
            probes: BTreeMap::new(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Report every executable as missing from `locate`.
    pub fn without_executables(mut self) -> Self {
        self.executables_present = false;
        self
    }

    /// Answer `probe(executable)` with `version`. Unlisted executables are not found.
    pub fn with_probe(mut self, executable: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        self.probes.insert(executable.into(), version.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompilerInvoker for ScriptedInvoker {
    async fn invoke(&self, invocation: &Invocation) -> InvocationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(invocation.clone());

        match &self.step {
            ScriptedStep::Emit { artifacts, stdout } => {
                for (relative, content) in artifacts {
                    let path = invocation.output_dir.join(relative);
                    if let Some(parent) = path.parent() {
                        if let Err(err) = tokio::fs::create_dir_all(parent).await {
                            return InvocationOutcome::LaunchFailed {
                                reason: err.to_string(),
                            };
                        }
                    }
                    if let Err(err) = tokio::fs::write(&path, content).await {
                        return InvocationOutcome::LaunchFailed {
                            reason: err.to_string(),
                        };
                    }
                }
                if let Err(err) = tokio::fs::create_dir_all(&invocation.output_dir).await {
                    return InvocationOutcome::LaunchFailed {
                        reason: err.to_string(),
                    };
                }
                InvocationOutcome::Success {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                }
            }
            ScriptedStep::Fail { exit_code, stderr } => InvocationOutcome::CompilerError {
                exit_code: Some(*exit_code),
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            ScriptedStep::NoOutput => InvocationOutcome::CompilerError {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            },
            ScriptedStep::Hang => {
                tokio::time::sleep(invocation.timeout).await;
                InvocationOutcome::Timeout {
                    limit: invocation.timeout,
                }
            }
            ScriptedStep::Missing => InvocationOutcome::ExecutableNotFound {
                executable: invocation.executable.clone(),
            },
        }
    }

    async fn probe(&self, executable: &Path) -> Result<String, ProbeError> {
        self.probes
            .get(executable)
            .cloned()
            .ok_or_else(|| ProbeError::NotFound(executable.to_path_buf()))
    }

    async fn locate(&self, executable: &Path) -> Option<PathBuf> {
        self.executables_present.then(|| executable.to_path_buf())
    }
}
