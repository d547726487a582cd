//! Compilation requests and their validation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PathError, ValidationError};
use crate::registry::{CompilerVersion, VersionRegistry};
use crate::workspace::{contained_path, MAX_COMPONENT_BYTES};

/// Contract name used when the request omits one.
pub const DEFAULT_CONTRACT_NAME: &str = "contract";

/// Extension of the primary source file.
pub const SOURCE_EXTENSION: &str = "compact";

/// Directory, relative to the workspace, under which compiler output lands.
pub const OUTPUT_ROOT: &str = "managed";

/// One compilation job as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilationRequest {
    /// Contract source text.
    pub source: String,
    /// Contract name; names the source file and the output directory.
    #[serde(default)]
    pub contract_name: Option<String>,
    /// Requested compiler version; the registry default when absent.
    #[serde(default)]
    pub compiler_version: Option<String>,
    /// Auxiliary files, relative path -> content.
    #[serde(default)]
    pub project_files: BTreeMap<String, String>,
}

impl CompilationRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_contract_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    pub fn with_compiler_version(mut self, version: impl Into<String>) -> Self {
        self.compiler_version = Some(version.into());
        self
    }

    pub fn with_project_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.project_files.insert(path.into(), content.into());
        self
    }

    /// The contract name, falling back to [`DEFAULT_CONTRACT_NAME`].
    pub fn contract_name(&self) -> &str {
        self.contract_name.as_deref().unwrap_or(DEFAULT_CONTRACT_NAME)
    }

    /// The requested version, falling back to the registry default.
    pub fn compiler_version<'a>(&'a self, registry: &'a VersionRegistry) -> &'a str {
        self.compiler_version
            .as_deref()
            .unwrap_or_else(|| registry.default_version())
    }

    /// Check the request against `registry` without touching the filesystem.
    pub fn validate(&self, registry: &VersionRegistry) -> Result<ValidatedRequest, ValidationError> {
        if self.source.is_empty() {
            return Err(ValidationError::MissingSource);
        }

        let version = registry.resolve(self.compiler_version(registry))?.clone();

        let contract_name = self.contract_name().to_string();
        check_contract_name(&contract_name)?;

        let source_file = format!("{contract_name}.{SOURCE_EXTENSION}");
        check_project_paths(&self.project_files, &source_file)?;

        Ok(ValidatedRequest {
            source_file,
            output_dir: PathBuf::from(OUTPUT_ROOT).join(&contract_name),
            contract_name,
            version,
        })
    }
}

/// A request that passed validation, with derived file layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub contract_name: String,
    pub version: CompilerVersion,
    /// `<name>.compact`, relative to the workspace.
    pub source_file: String,
    /// `managed/<name>`, relative to the workspace.
    pub output_dir: PathBuf,
}

fn check_contract_name(name: &str) -> Result<(), ValidationError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() + SOURCE_EXTENSION.len() + 1 > MAX_COMPONENT_BYTES {
        Some("name is too long for a source file name")
    } else if name == "." || name == ".." {
        Some("name is a relative directory reference")
    } else if name.contains(|c| c == '/' || c == '\\') {
        Some("name must not contain path separators")
    } else if name.contains('\0') {
        Some("name must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidContractName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Every project file must land on its own path inside the workspace,
/// away from the contract source and the compiler output root.
fn check_project_paths(
    files: &BTreeMap<String, String>,
    source_file: &str,
) -> Result<(), ValidationError> {
    let invalid = |path: &str, source: PathError| ValidationError::InvalidProjectPath {
        path: path.to_string(),
        source,
    };

    let mut normalized = Vec::with_capacity(files.len());
    for path in files.keys() {
        let relative = contained_path(path).map_err(|source| invalid(path, source))?;
        if relative.starts_with(OUTPUT_ROOT) {
            return Err(invalid(path, PathError::Reserved));
        }
        if relative.starts_with(source_file) {
            return Err(invalid(path, PathError::CollidesWithSource));
        }
        normalized.push((relative, path));
    }

    // Component-wise ordering puts a directory directly before its descendants.
    normalized.sort();
    for pair in normalized.windows(2) {
        let (earlier, _) = &pair[0];
        let (later, original) = &pair[1];
        if later.starts_with(earlier) {
            return Err(invalid(original, PathError::Conflicts));
        }
    }
    Ok(())
}
