use std::path::PathBuf;

use clap::Parser;
use compact_core::invoker::DEFAULT_MAX_OUTPUT_BYTES;
use compact_core::registry::{DEFAULT_COMPILER, DEFAULT_INSTALL_ROOT};
use compact_core::{init_tracing, OrchestratorConfig};
use compactd::{build_router, AppState, ServiceConfig};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "compactd", version, about = "Compact smart-contract compiler service")]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// TCP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3002)]
    port: u16,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Emit JSON log lines.
    #[arg(long, env = "COMPACT_LOG_JSON", default_value_t = false)]
    json_logs: bool,
    /// Parent directory for per-request workspaces.
    #[arg(long, env = "COMPACT_TEMP_ROOT", default_value = "./temp")]
    temp_root: PathBuf,
    /// Directory holding compact-<version>/compactc installs.
    #[arg(long, env = "COMPACT_COMPILER_ROOT", default_value = DEFAULT_INSTALL_ROOT)]
    compiler_root: PathBuf,
    /// Compiler probed by /check-compiler; bare names are looked up on PATH.
    #[arg(long, env = "COMPACT_DEFAULT_COMPILER", default_value = DEFAULT_COMPILER)]
    default_compiler: PathBuf,
    /// Wall-clock limit for one compiler run.
    #[arg(long, env = "COMPACT_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
    /// Maximum compiler processes running at once (defaults to available parallelism).
    #[arg(long, env = "COMPACT_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,
    /// Cap on captured stdout/stderr, per stream.
    #[arg(long, env = "COMPACT_MAX_OUTPUT_BYTES", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        let defaults = OrchestratorConfig::default();
        ServiceConfig {
            temp_root: self.temp_root.clone(),
            compiler_root: self.compiler_root.clone(),
            default_compiler: self.default_compiler.clone(),
            orchestrator: OrchestratorConfig {
                timeout_ms: self.timeout_secs.saturating_mul(1000),
                max_concurrent: self.max_concurrent.unwrap_or(defaults.max_concurrent),
                max_output_bytes: self.max_output_bytes,
                ..defaults
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs, &cli.log_level);

    let state = AppState::bootstrap(cli.service_config()).await?;

    let registry = state.orchestrator.registry();
    let statuses = registry
        .list_available(state.orchestrator.invoker().as_ref())
        .await;
    for (id, status) in &statuses {
        if status.is_available() {
            info!(version = %id, output = status.display_text(), "compiler available");
        } else {
            warn!(version = %id, "compiler not available");
        }
    }

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        default_version = registry.default_version(),
        temp_root = %cli.temp_root.display(),
        "compact compiler service listening"
    );

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("compact compiler service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_explicit_flags_flow_into_service_config() {
        let cli = Cli::try_parse_from([
            "compactd",
            "--port",
            "4000",
            "--temp-root",
            "/tmp/compact",
            "--timeout-secs",
            "5",
            "--max-concurrent",
            "2",
        ])
        .unwrap();

        let config = cli.service_config();
        assert_eq!(cli.port, 4000);
        assert_eq!(config.temp_root, PathBuf::from("/tmp/compact"));
        assert_eq!(config.orchestrator.timeout_ms, 5000);
        assert_eq!(config.orchestrator.max_concurrent, 2);
    }
}
