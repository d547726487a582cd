//! Compact Compiler Core
//!
//! Turns Compact contract source into compiled artifacts by running an
//! installed `compactc` toolchain inside a throwaway workspace.
//!
//! ## Key Components
//!
//! - [`VersionRegistry`]: immutable table of installed toolchains
//! - [`WorkspaceManager`] / [`Workspace`]: per-request build directories
//! - [`CompilerInvoker`] / [`ProcessInvoker`]: bounded, killable compiler runs
//! - [`harvest`](harvest::harvest): recursive artifact collection
//! - [`Orchestrator`]: drives a request end to end and always cleans up

pub mod error;
pub mod fakes;
pub mod harvest;
pub mod invoker;
pub mod obs;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod result;
pub mod telemetry;
pub mod workspace;

pub use error::{PathError, ProbeError, RegistryError, ValidationError, WorkspaceError};
pub use harvest::{Harvest, HarvestLimits, HarvestWarning};
pub use invoker::{
    locate_executable, CompilerInvoker, Invocation, InvocationOutcome, ProcessInvoker,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Stage};
pub use registry::{CompilerVersion, VersionRegistry, VersionStatus};
pub use request::{CompilationRequest, ValidatedRequest, DEFAULT_CONTRACT_NAME};
pub use result::{CompilationFailure, CompilationOutcome, CompilationResult, FailureKind};
pub use telemetry::init_tracing;
pub use workspace::{Workspace, WorkspaceManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
