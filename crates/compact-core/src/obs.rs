//! Structured observability hooks for the compilation lifecycle.
//!
//! Events are emitted at `info!` level unless noted. Filter with `RUST_LOG`;
//! JSON output is selected in [`crate::telemetry::init_tracing`].

use tracing::{debug, info, warn, Span};

use crate::orchestrator::Stage;

/// Span tagged with the compile id, contract name and requested version.
///
/// Attach it with `tracing::Instrument` so every event of a run carries the
/// same identifiers.
pub fn compile_span(compile_id: &str, contract_name: &str, compiler_version: &str) -> Span {
    tracing::info_span!(
        "compact.compile",
        compile_id = %compile_id,
        contract = %contract_name,
        version = %compiler_version,
    )
}

/// Emit event: compilation accepted and about to allocate a workspace.
pub fn emit_compile_started(contract_name: &str, compiler_version: &str) {
    info!(
        event = "compile.started",
        contract = %contract_name,
        version = %compiler_version,
    );
}

/// Emit event: compilation finished, successfully or not.
pub fn emit_compile_finished(duration_ms: u64, artifacts: usize, outcome: &str) {
    info!(
        event = "compile.finished",
        duration_ms = duration_ms,
        artifacts = artifacts,
        outcome = %outcome,
    );
}

/// Emit event: orchestrator entered a new stage (debug level).
pub fn emit_stage(stage: Stage) {
    debug!(event = "compile.stage", stage = ?stage);
}

/// Emit event: an output file was left out of the harvest (warning level).
pub fn emit_harvest_warning(path: &str, reason: &str) {
    warn!(event = "harvest.warning", path = %path, reason = %reason);
}

/// Emit event: workspace removal failed (warning level).
pub fn emit_cleanup_failed(workspace_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "workspace.cleanup_failed", workspace = %workspace_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_span_create() {
        let span = compile_span("id-1", "Foo", "0.24.0");
        let _entered = span.enter();
        emit_stage(Stage::Validating);
    }
}
