//! Error taxonomy for the compilation orchestrator.
//!
//! Only failures that stop a compilation from being attempted are modelled as
//! `Error` types here. Once the compiler has been launched, every outcome
//! (including timeouts) is reported through [`crate::CompilationResult`].

use std::io;
use std::path::PathBuf;

/// Rejections of a compilation request. All of these are raised before any
/// filesystem or process side effect and map to a client error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: contractCode")]
    MissingSource,

    #[error("Unsupported compiler version: {requested}. Supported: {supported}")]
    UnsupportedVersion { requested: String, supported: String },

    #[error("invalid contract name {name:?}: {reason}")]
    InvalidContractName { name: String, reason: String },

    #[error("invalid project file path {path:?}: {source}")]
    InvalidProjectPath {
        path: String,
        #[source]
        source: PathError,
    },
}

/// Reasons a relative path cannot be placed inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("absolute paths are not allowed")]
    Absolute,

    #[error("path escapes the workspace root")]
    Escapes,

    #[error("path component is longer than 255 bytes")]
    TooLong,

    #[error("path lies inside the compiler output directory")]
    Reserved,

    #[error("path collides with the contract source file")]
    CollidesWithSource,

    #[error("path collides with another project file")]
    Conflicts,
}

/// Workspace lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Display omits `root`; callers that need it log it themselves.
    #[error("failed to create workspace: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid workspace path {path:?}: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: PathError,
    },

    /// `path` is relative to the workspace.
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Registry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry must contain at least one compiler version")]
    Empty,

    #[error("compiler version registered twice: {0}")]
    DuplicateVersion(String),

    #[error("default version {0} is not registered")]
    UnknownDefault(String),
}

/// Failures while querying a compiler executable for its version.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    #[error("{path} --version timed out after {limit_ms}ms")]
    Timeout { path: PathBuf, limit_ms: u64 },

    #[error("{path} --version exited with status {code:?}: {stderr}")]
    Failed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to launch {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_matches_wire_text() {
        assert_eq!(
            ValidationError::MissingSource.to_string(),
            "Missing required field: contractCode"
        );
    }

    #[test]
    fn test_unsupported_version_lists_supported() {
        let err = ValidationError::UnsupportedVersion {
            requested: "9.9.9".to_string(),
            supported: "0.23.0, 0.24.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("9.9.9"));
        assert!(msg.contains("0.23.0, 0.24.0"));
    }

    #[test]
    fn test_invalid_project_path_carries_reason() {
        let err = ValidationError::InvalidProjectPath {
            path: "../etc/passwd".to_string(),
            source: PathError::Escapes,
        };
        assert!(err.to_string().contains("escapes the workspace root"));
    }

    #[test]
    fn test_workspace_errors_hide_host_paths() {
        let create = WorkspaceError::Create {
            root: PathBuf::from("/srv/compact/temp"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!create.to_string().contains("/srv/compact"));

        let write = WorkspaceError::Write {
            path: "lib/Math.compact".to_string(),
            source: io::Error::new(io::ErrorKind::StorageFull, "disk full"),
        };
        assert_eq!(write.to_string(), "failed to write lib/Math.compact: disk full");
    }
}
