//! HTTP surface of the Compact compiler service.
//!
//! Thin axum layer over [`compact_core::Orchestrator`]: request decoding,
//! early client-error checks, and status-code mapping. All compilation
//! semantics live in `compact-core`.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use compact_core::registry::{DEFAULT_COMPILER, DEFAULT_INSTALL_ROOT};
use compact_core::{
    CompilationRequest, CompilationResult, HarvestWarning, Orchestrator, OrchestratorConfig,
    ProcessInvoker, ValidationError, VersionRegistry, WorkspaceError, WorkspaceManager,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted JSON request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const SERVICE_NAME: &str = "compact-compiler";
const SERVICE_MESSAGE: &str = "Compact Compiler Service for Web3Fast";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Parent directory for per-request workspaces.
    pub temp_root: PathBuf,
    /// Directory holding `compact-<version>/compactc` installs.
    pub compiler_root: PathBuf,
    /// Executable probed by `/check-compiler`, looked up on `PATH` when bare.
    pub default_compiler: PathBuf,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp"),
            compiler_root: PathBuf::from(DEFAULT_INSTALL_ROOT),
            default_compiler: PathBuf::from(DEFAULT_COMPILER),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wire the reference registry to a process-backed invoker and make sure
    /// the temp root is writable before accepting requests.
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            temp_root,
            compiler_root,
            default_compiler,
            orchestrator,
        } = config;

        let registry =
            VersionRegistry::reference(compiler_root).with_fallback_executable(default_compiler);
        let workspaces = WorkspaceManager::new(temp_root);
        workspaces
            .prepare()
            .await
            .map_err(|source| ServiceError::TempRoot {
                root: workspaces.root().to_path_buf(),
                source,
            })?;
        let invoker = ProcessInvoker::new(orchestrator.max_output_bytes);

        Ok(Self::new(Orchestrator::new(
            Arc::new(registry),
            workspaces,
            Arc::new(invoker),
            orchestrator,
        )))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_status))
        .route("/check-compiler", get(check_compiler))
        .route("/api/compiler-versions", get(compiler_versions))
        .route("/compile", post(compile))
        .route("/api/compile", post(compile))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("temp root {} unusable: {source}", root.display())]
    TempRoot {
        root: PathBuf,
        #[source]
        source: WorkspaceError,
    },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Http { status, message } => (status, message),
            ApiError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

/// `POST /compile` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileBody {
    pub contract_code: Option<String>,
    pub contract_name: Option<String>,
    pub compiler_version: Option<String>,
    pub project_files: Option<BTreeMap<String, String>>,
}

impl CompileBody {
    /// Reject what can be rejected without touching the orchestrator.
    fn into_request(self, registry: &VersionRegistry) -> Result<CompilationRequest, ApiError> {
        let source = self
            .contract_code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ApiError::bad_request(ValidationError::MissingSource.to_string()))?;

        if let Some(version) = &self.compiler_version {
            registry.resolve(version)?;
        }

        let mut request = CompilationRequest::new(source);
        request.contract_name = self.contract_name;
        request.compiler_version = self.compiler_version;
        request.project_files = self.project_files.unwrap_or_default();
        Ok(request)
    }
}

/// `POST /compile` response, for both outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub success: bool,
    pub compile_id: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compiler_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<HarvestWarning>,
}

impl CompileResponse {
    fn status(result: &CompilationResult) -> StatusCode {
        match result.failure() {
            None => StatusCode::OK,
            Some(failure) if failure.kind.is_client_error() => StatusCode::BAD_REQUEST,
            Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CompilationResult> for CompileResponse {
    fn from(result: CompilationResult) -> Self {
        let mut response = Self {
            success: result.is_success(),
            compile_id: result.compile_id.clone(),
            contract_name: result.contract_name.clone(),
            compiler_version: result.compiler_version.clone(),
            duration_ms: result.duration_ms,
            artifacts: result.artifacts().cloned(),
            stdout: result.stdout().to_string(),
            stderr: result.stderr().to_string(),
            message: None,
            error: None,
            is_compiler_error: None,
            warnings: result.warnings().to_vec(),
        };
        match result.failure() {
            None => {
                response.message = Some(format!(
                    "Compact contract compiled successfully with compactc {}",
                    result.compiler_version
                ));
            }
            Some(failure) => {
                response.error = Some(failure.message.clone());
                response.is_compiler_error = Some(failure.kind.is_compiler_error());
            }
        }
        response
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub message: String,
    pub service: String,
    pub versions: Vec<String>,
}

/// `GET /check-compiler` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerCheck {
    pub success: bool,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerVersions {
    pub available: Vec<String>,
    pub default: String,
    pub recommended: BTreeMap<String, String>,
    pub notes: BTreeMap<String, String>,
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "ok".to_string(),
        message: SERVICE_MESSAGE.to_string(),
        service: SERVICE_NAME.to_string(),
        versions: version_ids(state.orchestrator.registry()),
    })
}

async fn check_compiler(State(state): State<AppState>) -> Json<CompilerCheck> {
    let registry = state.orchestrator.registry();
    let invoker = state.orchestrator.invoker().as_ref();

    let (statuses, default) = tokio::join!(
        registry.list_available(invoker),
        registry.probe_default(invoker)
    );

    let check = match default {
        Ok(default_version) => CompilerCheck {
            success: true,
            available: true,
            default_version: Some(default_version),
            versions: Some(
                statuses
                    .iter()
                    .map(|(id, status)| (id.clone(), status.display_text().to_string()))
                    .collect(),
            ),
            error: None,
            message: "Compact compiler service with multi-version support".to_string(),
        },
        Err(err) => {
            tracing::warn!(error = %err, "default compiler probe failed");
            CompilerCheck {
                success: false,
                available: false,
                default_version: None,
                versions: None,
                error: Some(format!(
                    "{} not found in PATH",
                    registry.fallback_executable().display()
                )),
                message: "Please install the Compact compiler".to_string(),
            }
        }
    };
    Json(check)
}

async fn compiler_versions(State(state): State<AppState>) -> Json<CompilerVersions> {
    let registry = state.orchestrator.registry();
    Json(CompilerVersions {
        available: version_ids(registry),
        default: registry.default_version().to_string(),
        recommended: registry.recommendations(),
        notes: registry.notes(),
    })
}

async fn compile(
    State(state): State<AppState>,
    Json(body): Json<CompileBody>,
) -> Result<(StatusCode, Json<CompileResponse>), ApiError> {
    let request = body.into_request(state.orchestrator.registry())?;
    let result = state.orchestrator.compile(request).await;
    let status = CompileResponse::status(&result);
    Ok((status, Json(CompileResponse::from(result))))
}

fn version_ids(registry: &VersionRegistry) -> Vec<String> {
    registry.ids().into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use compact_core::fakes::{ScriptedInvoker, ScriptedStep};
    use serde_json::Value;
    use std::path::Path;
    use tower::ServiceExt;

    fn app(temp_root: &Path, invoker: Arc<ScriptedInvoker>) -> Router {
        let orchestrator = Orchestrator::new(
            Arc::new(VersionRegistry::reference("/opt/compact")),
            WorkspaceManager::new(temp_root),
            invoker,
            OrchestratorConfig::default(),
        );
        build_router(AppState::new(orchestrator))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_lists_registered_versions() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));

        let (status, body) = send(app(root.path(), invoker), get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "compact-compiler");
        assert_eq!(body["versions"], serde_json::json!(["0.23.0", "0.24.0"]));
    }

    #[tokio::test]
    async fn test_compiler_versions_reports_recommendations() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));

        let (status, body) =
            send(app(root.path(), invoker), get("/api/compiler-versions")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default"], "0.24.0");
        assert_eq!(body["recommended"]["openzeppelin-examples"], "0.23.0");
        assert_eq!(body["recommended"]["latest-syntax"], "0.24.0");
        assert_eq!(
            body["notes"]["0.23.0"],
            "Compatible with OpenZeppelin examples and assert statements"
        );
    }

    #[tokio::test]
    async fn test_check_compiler_marks_unprobed_versions_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(
            ScriptedInvoker::new(ScriptedStep::NoOutput)
                .with_probe("compactc", "compactc 0.24.0")
                .with_probe("/opt/compact/compact-0.24.0/compactc", "compactc 0.24.0"),
        );

        let (status, body) = send(app(root.path(), invoker), get("/check-compiler")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["defaultVersion"], "compactc 0.24.0");
        assert_eq!(body["versions"]["0.24.0"], "compactc 0.24.0");
        assert_eq!(body["versions"]["0.23.0"], "Not available");
    }

    #[tokio::test]
    async fn test_check_compiler_without_default_reports_missing() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput).without_executables());

        let (status, body) = send(app(root.path(), invoker), get("/check-compiler")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["available"], false);
        assert_eq!(body["error"], "compactc not found in PATH");
        assert!(body.get("versions").is_none());
    }

    #[tokio::test]
    async fn test_compile_returns_artifacts_and_message() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::emit([
            ("Foo.ts", "export {}"),
            ("Foo.wasm", "wasm"),
        ])));

        let (status, body) = send(
            app(root.path(), invoker),
            post_json(
                "/compile",
                serde_json::json!({ "contractCode": "contract Foo {}", "contractName": "Foo" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["contractName"], "Foo");
        assert_eq!(body["compilerVersion"], "0.24.0");
        assert_eq!(body["artifacts"]["Foo.ts"], "export {}");
        assert_eq!(
            body["message"],
            "Compact contract compiled successfully with compactc 0.24.0"
        );
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_api_compile_alias_behaves_like_compile() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::emit([("a.ts", "a")])));

        let (status, body) = send(
            app(root.path(), invoker),
            post_json(
                "/api/compile",
                serde_json::json!({ "contractCode": "x", "compilerVersion": "0.23.0" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contractName"], "contract");
        assert_eq!(body["compilerVersion"], "0.23.0");
    }

    #[tokio::test]
    async fn test_missing_contract_code_is_rejected_before_orchestration() {
        let root = tempfile::tempdir().unwrap();
        let temp_root = root.path().join("temp");
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));

        let (status, body) = send(
            app(&temp_root, invoker.clone()),
            post_json("/compile", serde_json::json!({ "contractName": "Foo" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing required field: contractCode");
        assert_eq!(invoker.call_count(), 0);
        assert!(!temp_root.exists());
    }

    #[tokio::test]
    async fn test_unknown_version_is_bad_request() {
        let root = tempfile::tempdir().unwrap();
        let temp_root = root.path().join("temp");
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));

        let (status, body) = send(
            app(&temp_root, invoker.clone()),
            post_json(
                "/compile",
                serde_json::json!({ "contractCode": "x", "compilerVersion": "9.9.9" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Unsupported compiler version: 9.9.9. Supported: 0.23.0, 0.24.0"
        );
        assert_eq!(invoker.call_count(), 0);
        assert!(!temp_root.exists());
    }

    #[tokio::test]
    async fn test_compiler_rejection_is_flagged() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::fail(
            3,
            "syntax error line 1",
        )));

        let (status, body) = send(
            app(root.path(), invoker),
            post_json("/compile", serde_json::json!({ "contractCode": "contract Foo {" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["isCompilerError"], true);
        assert_eq!(body["stderr"], "syntax error line 1");
        assert_eq!(body["compilerVersion"], "0.24.0");
        assert!(body.get("artifacts").is_none());
    }

    #[tokio::test]
    async fn test_missing_compiler_is_not_a_compiler_error() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::Missing));

        let (status, body) = send(
            app(root.path(), invoker),
            post_json("/compile", serde_json::json!({ "contractCode": "x" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["isCompilerError"], false);
        assert_eq!(
            body["error"],
            "compactc not found. Please install the Compact compiler."
        );
    }

    #[tokio::test]
    async fn test_traversing_project_file_is_bad_request() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::NoOutput));

        let (status, body) = send(
            app(root.path(), invoker.clone()),
            post_json(
                "/compile",
                serde_json::json!({
                    "contractCode": "x",
                    "projectFiles": { "../../etc/passwd": "nope" }
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["isCompilerError"], false);
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_project_file_shadowing_source_is_bad_request() {
        let root = tempfile::tempdir().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new(ScriptedStep::emit([("o", "x")])));

        let (status, body) = send(
            app(root.path(), invoker.clone()),
            post_json(
                "/compile",
                serde_json::json!({
                    "contractCode": "real",
                    "contractName": "Foo",
                    "projectFiles": { "Foo.compact": "aux", "managed/Foo/Foo.ts": "seed" }
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["isCompilerError"], false);
        assert!(body.get("artifacts").is_none());
        assert_eq!(invoker.call_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bootstrap_reports_unusable_temp_root() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = AppState::bootstrap(ServiceConfig {
            temp_root: blocker.join("temp"),
            ..ServiceConfig::default()
        })
        .await
        .err()
        .unwrap();

        assert!(err.to_string().contains(&*blocker.to_string_lossy()));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_temp_root() {
        let root = tempfile::tempdir().unwrap();
        let temp_root = root.path().join("nested/temp");

        let state = AppState::bootstrap(ServiceConfig {
            temp_root: temp_root.clone(),
            ..ServiceConfig::default()
        })
        .await
        .unwrap();

        assert!(temp_root.is_dir());
        assert_eq!(state.orchestrator.registry().default_version(), "0.24.0");
    }
}
