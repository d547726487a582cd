//! Compilation results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::harvest::HarvestWarning;
use crate::orchestrator::Stage;

/// Why a compilation failed, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed request or unknown version. Nothing was touched.
    Client,
    /// The host could not run the compiler (missing binary, unwritable temp root).
    Environment,
    /// The compiler ran and rejected the input.
    Compiler,
    /// The compiler exceeded its time limit and was killed.
    Timeout,
}

impl FailureKind {
    pub fn is_client_error(&self) -> bool {
        matches!(self, FailureKind::Client)
    }

    pub fn is_compiler_error(&self) -> bool {
        matches!(self, FailureKind::Compiler)
    }
}

/// A classified failure with whatever compiler output was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationFailure {
    pub kind: FailureKind,
    /// Stage the run was in when it failed.
    pub stage: Stage,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl CompilationFailure {
    pub fn new(kind: FailureKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }
}

impl From<ValidationError> for CompilationFailure {
    fn from(err: ValidationError) -> Self {
        Self::new(FailureKind::Client, Stage::Validating, err.to_string())
    }
}

/// What a compilation run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompilationOutcome {
    Succeeded {
        artifacts: BTreeMap<String, String>,
        stdout: String,
        stderr: String,
        warnings: Vec<HarvestWarning>,
    },
    Failed(CompilationFailure),
}

/// The result returned to the caller for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub compile_id: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub duration_ms: u64,
    pub outcome: CompilationOutcome,
}

impl CompilationResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CompilationOutcome::Succeeded { .. })
    }

    pub fn artifacts(&self) -> Option<&BTreeMap<String, String>> {
        match &self.outcome {
            CompilationOutcome::Succeeded { artifacts, .. } => Some(artifacts),
            CompilationOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&CompilationFailure> {
        match &self.outcome {
            CompilationOutcome::Failed(failure) => Some(failure),
            CompilationOutcome::Succeeded { .. } => None,
        }
    }

    pub fn stdout(&self) -> &str {
        match &self.outcome {
            CompilationOutcome::Succeeded { stdout, .. } => stdout,
            CompilationOutcome::Failed(failure) => &failure.stdout,
        }
    }

    pub fn stderr(&self) -> &str {
        match &self.outcome {
            CompilationOutcome::Succeeded { stderr, .. } => stderr,
            CompilationOutcome::Failed(failure) => &failure.stderr,
        }
    }

    pub fn warnings(&self) -> &[HarvestWarning] {
        match &self.outcome {
            CompilationOutcome::Succeeded { warnings, .. } => warnings,
            CompilationOutcome::Failed(_) => &[],
        }
    }
}
