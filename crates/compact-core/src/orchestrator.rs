//! Compilation orchestrator.
//!
//! Drives one request through
//! `Validating -> WorkspaceReady -> Invoking -> Harvesting -> Completed`.
//! Any stage may fail; the workspace created in `WorkspaceReady` is removed
//! on every path out of the run, including panics and cancellation (the
//! [`Workspace`] guard removes its tree on drop).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::harvest::{harvest_blocking, HarvestLimits};
use crate::invoker::{CompilerInvoker, Invocation, InvocationOutcome, DEFAULT_MAX_OUTPUT_BYTES};
use crate::obs;
use crate::registry::VersionRegistry;
use crate::request::{CompilationRequest, ValidatedRequest};
use crate::result::{CompilationFailure, CompilationOutcome, CompilationResult, FailureKind};
use crate::workspace::{Workspace, WorkspaceManager};

/// Message used when the compiler exits 0 but writes nothing.
const NO_OUTPUT_MESSAGE: &str = "Compilation failed - no output generated";

/// Message used when launching the compiler reports not-found.
const COMPILER_MISSING_MESSAGE: &str = "compactc not found. Please install the Compact compiler.";

/// Lifecycle stage of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    WorkspaceReady,
    Invoking,
    Harvesting,
    Completed,
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Hard wall-clock limit for one compiler run (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of compiler processes running at once.
    pub max_concurrent: usize,
    /// Cap on captured stdout/stderr, per stream.
    pub max_output_bytes: usize,
    /// Bounds on the artifact harvest.
    pub harvest: HarvestLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            harvest: HarvestLimits::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Composition root: registry + workspaces + invoker + invocation limiter.
pub struct Orchestrator {
    registry: Arc<VersionRegistry>,
    workspaces: WorkspaceManager,
    invoker: Arc<dyn CompilerInvoker>,
    permits: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<VersionRegistry>,
        workspaces: WorkspaceManager,
        invoker: Arc<dyn CompilerInvoker>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            registry,
            workspaces,
            invoker,
            permits,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn invoker(&self) -> &Arc<dyn CompilerInvoker> {
        &self.invoker
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Compile one request. Never panics on request content; every failure is
    /// reported through the returned [`CompilationResult`].
    pub async fn compile(&self, request: CompilationRequest) -> CompilationResult {
        let compile_id = Uuid::new_v4().to_string();
        let span = obs::compile_span(
            &compile_id,
            request.contract_name(),
            request.compiler_version(&self.registry),
        );
        self.run(compile_id, request).instrument(span).await
    }

    async fn run(&self, compile_id: String, request: CompilationRequest) -> CompilationResult {
        let started = Instant::now();
        let contract_name = request.contract_name().to_string();
        let compiler_version = request.compiler_version(&self.registry).to_string();

        obs::emit_stage(Stage::Validating);
        let outcome = match request.validate(&self.registry) {
            Err(err) => CompilationOutcome::Failed(err.into()),
            Ok(validated) => {
                obs::emit_compile_started(&validated.contract_name, &validated.version.id);
                match self.workspaces.create().await {
                    Err(err) => {
                        tracing::warn!(
                            root = %self.workspaces.root().display(),
                            error = %err,
                            "workspace allocation failed"
                        );
                        CompilationOutcome::Failed(CompilationFailure::new(
                            FailureKind::Environment,
                            Stage::WorkspaceReady,
                            err.to_string(),
                        ))
                    }
                    Ok(workspace) => {
                        let outcome = self.drive(&request, &validated, &workspace).await;
                        workspace.destroy().await;
                        outcome
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (artifacts, label) = match &outcome {
            CompilationOutcome::Succeeded { artifacts, .. } => (artifacts.len(), "success"),
            CompilationOutcome::Failed(failure) => (0, failure_label(failure.kind)),
        };
        obs::emit_compile_finished(duration_ms, artifacts, label);

        CompilationResult {
            compile_id,
            contract_name,
            compiler_version,
            duration_ms,
            outcome,
        }
    }

    /// Everything between workspace creation and cleanup.
    async fn drive(
        &self,
        request: &CompilationRequest,
        validated: &ValidatedRequest,
        workspace: &Workspace,
    ) -> CompilationOutcome {
        obs::emit_stage(Stage::WorkspaceReady);
        let source = match workspace
            .materialize(&validated.source_file, &request.source, &request.project_files)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(workspace = %workspace.id(), error = %err, "materialize failed");
                return CompilationOutcome::Failed(CompilationFailure::new(
                    FailureKind::Environment,
                    Stage::WorkspaceReady,
                    err.to_string(),
                ));
            }
        };

        let Some(executable) = self.invoker.locate(&validated.version.executable).await else {
            return CompilationOutcome::Failed(CompilationFailure::new(
                FailureKind::Environment,
                Stage::WorkspaceReady,
                format!("Compiler not found for version {}", validated.version.id),
            ));
        };

        let invocation = Invocation {
            executable,
            source,
            output_dir: workspace.path().join(&validated.output_dir),
            working_dir: workspace.path().to_path_buf(),
            timeout: self.config.timeout(),
        };

        let outcome = {
            let Ok(_permit) = self.permits.acquire().await else {
                return CompilationOutcome::Failed(CompilationFailure::new(
                    FailureKind::Environment,
                    Stage::Invoking,
                    "compiler pool is shut down",
                ));
            };
            obs::emit_stage(Stage::Invoking);
            self.invoker.invoke(&invocation).await
        };

        match outcome {
            InvocationOutcome::Success { stdout, stderr } => {
                obs::emit_stage(Stage::Harvesting);
                let harvest = harvest_blocking(invocation.output_dir, self.config.harvest).await;
                for warning in &harvest.warnings {
                    obs::emit_harvest_warning(&warning.path, &warning.reason);
                }
                obs::emit_stage(Stage::Completed);
                CompilationOutcome::Succeeded {
                    artifacts: harvest.artifacts,
                    stdout,
                    stderr,
                    warnings: harvest.warnings,
                }
            }
            InvocationOutcome::CompilerError {
                exit_code,
                stdout,
                stderr,
            } => {
                let message = if !stderr.trim().is_empty() {
                    stderr.clone()
                } else if exit_code == Some(0) {
                    NO_OUTPUT_MESSAGE.to_string()
                } else {
                    match exit_code {
                        Some(code) => format!("compactc exited with status {code}"),
                        None => "compactc was terminated by a signal".to_string(),
                    }
                };
                CompilationOutcome::Failed(
                    CompilationFailure::new(FailureKind::Compiler, Stage::Invoking, message)
                        .with_output(stdout, stderr),
                )
            }
            InvocationOutcome::ExecutableNotFound { .. } => CompilationOutcome::Failed(
                CompilationFailure::new(
                    FailureKind::Environment,
                    Stage::Invoking,
                    COMPILER_MISSING_MESSAGE,
                ),
            ),
            InvocationOutcome::Timeout { limit } => {
                CompilationOutcome::Failed(CompilationFailure::new(
                    FailureKind::Timeout,
                    Stage::Invoking,
                    format!(
                        "Compilation timed out after {} seconds",
                        format_seconds(limit)
                    ),
                ))
            }
            InvocationOutcome::LaunchFailed { reason } => {
                CompilationOutcome::Failed(CompilationFailure::new(
                    FailureKind::Environment,
                    Stage::Invoking,
                    format!("failed to launch compactc: {reason}"),
                ))
            }
        }
    }
}

fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Client => "client_error",
        FailureKind::Environment => "environment_error",
        FailureKind::Compiler => "compiler_error",
        FailureKind::Timeout => "timeout",
    }
}

fn format_seconds(limit: Duration) -> String {
    if limit.subsec_millis() == 0 {
        limit.as_secs().to_string()
    } else {
        format!("{:.1}", limit.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedInvoker, ScriptedStep};

    fn orchestrator(root: &std::path::Path, invoker: Arc<ScriptedInvoker>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(VersionRegistry::reference("/opt/compact")),
            WorkspaceManager::new(root),
            invoker,
            OrchestratorConfig {
                timeout_ms: 100,
                ..OrchestratorConfig::default()
            },
        )
    }

    #[test]
    fn test_config_default() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert!(cfg.max_concurrent >= 1);
        assert_eq!(cfg.harvest, HarvestLimits::default());
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_secs(30)), "30");
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.5");
    }

    #[tokio::test]
    async fn test_success_collects_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::emit([
            ("Foo.ts", "export {}"),
            ("Foo.wasm", "\0asm"),
        ])));
        let orch = orchestrator(root.path(), invoker.clone());

        let result = orch
            .compile(CompilationRequest::new("contract Foo {}").with_contract_name("Foo"))
            .await;

        assert!(result.is_success(), "{result:?}");
        let artifacts = result.artifacts().unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts["Foo.ts"], "export {}");
        assert_eq!(invoker.call_count(), 1);

        let seen = invoker.invocations();
        assert!(seen[0].source.ends_with("Foo.compact"));
        assert!(seen[0].output_dir.ends_with("managed/Foo"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_compiler_error_uses_stderr() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::fail(
            3,
            "syntax error line 1",
        )));
        let orch = orchestrator(root.path(), invoker);

        let result = orch.compile(CompilationRequest::new("contract Foo {}")).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Compiler);
        assert!(failure.message.contains("syntax error line 1"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_zero_exit_without_output() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));
        let orch = orchestrator(root.path(), invoker);

        let result = orch.compile(CompilationRequest::new("x")).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Compiler);
        assert_eq!(failure.message, NO_OUTPUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_timeout_reports_distinct_kind() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::Hang));
        let orch = orchestrator(root.path(), invoker);

        let result = orch.compile(CompilationRequest::new("x")).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(result.artifacts().is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_version_never_creates_workspace() {
        let root = tempfile::tempdir().unwrap();
        let temp_root = root.path().join("temp");
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));
        let orch = orchestrator(&temp_root, invoker.clone());

        let result = orch
            .compile(CompilationRequest::new("x").with_compiler_version("9.9.9"))
            .await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Client);
        assert_eq!(failure.stage, Stage::Validating);
        assert_eq!(result.compiler_version, "9.9.9");
        assert!(!temp_root.exists());
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unplaceable_project_files_are_client_errors() {
        let root = tempfile::tempdir().unwrap();
        let temp_root = root.path().join("temp");
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));
        let orch = orchestrator(&temp_root, invoker.clone());

        let requests = [
            CompilationRequest::new("x")
                .with_contract_name("Foo")
                .with_project_file("managed/Foo/Foo.ts", "injected"),
            CompilationRequest::new("x")
                .with_contract_name("Foo")
                .with_project_file("Foo.compact", "aux"),
            CompilationRequest::new("x")
                .with_project_file("lib", "file")
                .with_project_file("lib/a.compact", "nested"),
            CompilationRequest::new("x").with_contract_name("a".repeat(300)),
        ];
        for request in requests {
            let result = orch.compile(request).await;
            let failure = result.failure().unwrap();
            assert_eq!(failure.kind, FailureKind::Client, "{failure:?}");
            assert_eq!(failure.stage, Stage::Validating);
            assert!(!failure.message.contains(&*temp_root.to_string_lossy()));
        }
        assert_eq!(invoker.call_count(), 0);
        assert!(!temp_root.exists());
    }

    #[tokio::test]
    async fn test_missing_executable_is_environment_error() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput).without_executables());
        let orch = orchestrator(root.path(), invoker.clone());

        let result = orch
            .compile(CompilationRequest::new("x").with_compiler_version("0.23.0"))
            .await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Environment);
        assert_eq!(failure.message, "Compiler not found for version 0.23.0");
        assert_eq!(invoker.call_count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
