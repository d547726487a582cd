//! Compiler version registry.
//!
//! An immutable table of the `compactc` toolchains installed on the host.
//! Built once at startup and shared read-only between requests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, RegistryError, ValidationError};
use crate::invoker::CompilerInvoker;

/// Default install root for versioned toolchains.
pub const DEFAULT_INSTALL_ROOT: &str = "/usr/local/bin";

/// Bare executable name used when a toolchain is resolved through `PATH`.
pub const DEFAULT_COMPILER: &str = "compactc";

/// Version used when a request does not name one.
pub const DEFAULT_VERSION: &str = "0.24.0";

/// Status text reported for a toolchain that cannot be probed.
pub const UNAVAILABLE: &str = "Not available";

/// One installed compiler toolchain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilerVersion {
    /// Version identifier, e.g. `0.24.0`.
    pub id: String,
    /// Path of the `compactc` binary for this version.
    pub executable: PathBuf,
    /// Human-readable compatibility note.
    #[serde(default)]
    pub note: String,
    /// Use-cases this version is recommended for. Informational only.
    #[serde(default)]
    pub recommended_for: Vec<String>,
}

impl CompilerVersion {
    pub fn new(id: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            executable: executable.into(),
            note: String::new(),
            recommended_for: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn recommended_for<const N: usize>(mut self, tags: [&str; N]) -> Self {
        self.recommended_for = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }
}

/// Availability of a registered toolchain, as observed by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VersionStatus {
    Available { version: String },
    Unavailable { reason: String },
}

impl VersionStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, VersionStatus::Available { .. })
    }

    /// Text shown to clients: the probe output, or [`UNAVAILABLE`].
    pub fn display_text(&self) -> &str {
        match self {
            VersionStatus::Available { version } => version,
            VersionStatus::Unavailable { .. } => UNAVAILABLE,
        }
    }
}

/// Immutable version table.
#[derive(Debug, Clone)]
pub struct VersionRegistry {
    versions: BTreeMap<String, CompilerVersion>,
    default_version: String,
    fallback_executable: PathBuf,
}

impl VersionRegistry {
    pub fn new(
        versions: Vec<CompilerVersion>,
        default_version: impl Into<String>,
        fallback_executable: impl Into<PathBuf>,
    ) -> Result<Self, RegistryError> {
        if versions.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut table = BTreeMap::new();
        for version in versions {
            if table.contains_key(&version.id) {
                return Err(RegistryError::DuplicateVersion(version.id));
            }
            table.insert(version.id.clone(), version);
        }

        let default_version = default_version.into();
        if !table.contains_key(&default_version) {
            return Err(RegistryError::UnknownDefault(default_version));
        }

        Ok(Self {
            versions: table,
            default_version,
            fallback_executable: fallback_executable.into(),
        })
    }

    /// The two-toolchain deployment: `0.23.0` and `0.24.0` under `install_root`.
    pub fn reference(install_root: impl AsRef<Path>) -> Self {
        let root = install_root.as_ref();
        let versions = vec![
            CompilerVersion::new("0.23.0", Self::install_path(root, "0.23.0"))
                .with_note("Compatible with OpenZeppelin examples and assert statements")
                .recommended_for(["openzeppelin-examples", "assert-statements"]),
            CompilerVersion::new("0.24.0", Self::install_path(root, "0.24.0"))
                .with_note("Latest version with breaking syntax changes")
                .recommended_for(["new-development", "latest-syntax"]),
        ];
        let versions = versions.into_iter().map(|v| (v.id.clone(), v)).collect();
        Self {
            versions,
            default_version: DEFAULT_VERSION.to_string(),
            fallback_executable: PathBuf::from(DEFAULT_COMPILER),
        }
    }

    /// Replace the `PATH` fallback executable.
    pub fn with_fallback_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.fallback_executable = executable.into();
        self
    }

    /// `<install_root>/compact-<version>/compactc`
    pub fn install_path(install_root: &Path, version: &str) -> PathBuf {
        install_root
            .join(format!("compact-{version}"))
            .join(DEFAULT_COMPILER)
    }

    /// Look up a version. Unknown identifiers are a client error.
    pub fn resolve(&self, id: &str) -> Result<&CompilerVersion, ValidationError> {
        self.versions
            .get(id)
            .ok_or_else(|| ValidationError::UnsupportedVersion {
                requested: id.to_string(),
                supported: self.ids().join(", "),
            })
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn fallback_executable(&self) -> &Path {
        &self.fallback_executable
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }

    pub fn versions(&self) -> impl Iterator<Item = &CompilerVersion> {
        self.versions.values()
    }

    /// Recommendation tag -> version id.
    pub fn recommendations(&self) -> BTreeMap<String, String> {
        self.versions
            .values()
            .flat_map(|v| v.recommended_for.iter().map(|tag| (tag.clone(), v.id.clone())))
            .collect()
    }

    /// Version id -> note, skipping versions without one.
    pub fn notes(&self) -> BTreeMap<String, String> {
        self.versions
            .values()
            .filter(|v| !v.note.is_empty())
            .map(|v| (v.id.clone(), v.note.clone()))
            .collect()
    }

    /// Probe every registered toolchain concurrently.
    ///
    /// A failing probe marks that version unavailable and never aborts the listing.
    pub async fn list_available(
        &self,
        invoker: &dyn CompilerInvoker,
    ) -> BTreeMap<String, VersionStatus> {
        let probes = self.versions.values().map(|version| async move {
            let status = match invoker.probe(&version.executable).await {
                Ok(output) => VersionStatus::Available { version: output },
                Err(err) => {
                    tracing::debug!(version = %version.id, error = %err, "compiler probe failed");
                    VersionStatus::Unavailable {
                        reason: err.to_string(),
                    }
                }
            };
            (version.id.clone(), status)
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Probe the `PATH` fallback compiler.
    pub async fn probe_default(&self, invoker: &dyn CompilerInvoker) -> Result<String, ProbeError> {
        let executable = invoker
            .locate(&self.fallback_executable)
            .await
            .ok_or_else(|| ProbeError::NotFound(self.fallback_executable.clone()))?;
        invoker.probe(&executable).await
    }
}
