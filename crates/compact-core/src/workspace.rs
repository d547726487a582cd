//! Per-request build workspaces.
//!
//! Every compilation gets a fresh directory under the manager's temp root.
//! Directories are created with exclusive-create semantics, so two requests
//! can never share one. A [`Workspace`] removes its tree when it is destroyed
//! or, failing that, when it is dropped.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{PathError, WorkspaceError};
use crate::obs;

static NEXT_WORKSPACE: AtomicU64 = AtomicU64::new(0);

/// Longest file name most filesystems accept.
pub const MAX_COMPONENT_BYTES: usize = 255;

/// Allocates workspaces under a dedicated temp root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the temp root if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                root: self.root.clone(),
                source,
            })
    }

    /// Allocate a fresh, uniquely named workspace directory.
    pub async fn create(&self) -> Result<Workspace, WorkspaceError> {
        let root = self.root.clone();
        let created = tokio::task::spawn_blocking(move || -> io::Result<TempDir> {
            std::fs::create_dir_all(&root)?;
            let seq = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            tempfile::Builder::new()
                .prefix(&format!("ws-{seq:06}-"))
                .rand_bytes(10)
                .tempdir_in(&root)
        })
        .await
        .unwrap_or_else(|join_err| Err(io::Error::other(join_err)));

        let dir = created.map_err(|source| WorkspaceError::Create {
            root: self.root.clone(),
            source,
        })?;
        let path = dir.path().to_path_buf();
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(workspace = %id, path = %path.display(), "workspace created");

        Ok(Workspace {
            id,
            path,
            dir: Some(dir),
        })
    }
}

/// An exclusively owned build directory.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the primary source file and the auxiliary project files.
    ///
    /// Every path is validated before anything is written. Returns the path
    /// of the primary source file.
    pub async fn materialize(
        &self,
        primary_name: &str,
        primary_content: &str,
        auxiliary: &BTreeMap<String, String>,
    ) -> Result<PathBuf, WorkspaceError> {
        let primary = self.contain(primary_name)?;
        let planned = auxiliary
            .iter()
            .map(|(relative, content)| Ok((self.contain(relative)?, content.as_str())))
            .collect::<Result<Vec<_>, WorkspaceError>>()?;

        self.write_file(&primary, primary_content).await?;
        for (relative, content) in planned {
            if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(self.path.join(parent))
                    .await
                    .map_err(|source| write_error(parent, source))?;
            }
            self.write_file(&relative, content).await?;
        }

        debug!(
            workspace = %self.id,
            auxiliary_files = auxiliary.len(),
            "workspace materialized"
        );
        Ok(self.path.join(primary))
    }

    /// Recursively remove the workspace.
    ///
    /// Never fails: a tree that is already gone is fine, anything else is
    /// logged as a cleanup warning.
    pub async fn destroy(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let id = self.id.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => debug!(workspace = %id, "workspace removed"),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                debug!(workspace = %id, "workspace already removed");
            }
            Ok(Err(err)) => obs::emit_cleanup_failed(&id, &err),
            Err(join_err) => obs::emit_cleanup_failed(&id, &join_err),
        }
    }

    /// Normalised workspace-relative path.
    fn contain(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        contained_path(relative).map_err(|source| WorkspaceError::InvalidPath {
            path: relative.to_string(),
            source,
        })
    }

    async fn write_file(&self, relative: &Path, content: &str) -> Result<(), WorkspaceError> {
        tokio::fs::write(self.path.join(relative), content)
            .await
            .map_err(|source| write_error(relative, source))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.is_some() {
            // TempDir removes the tree when the field drops.
            warn!(workspace = %self.id, "workspace dropped before destroy; removing");
        }
    }
}

fn write_error(relative: &Path, source: io::Error) -> WorkspaceError {
    WorkspaceError::Write {
        path: relative.display().to_string(),
        source,
    }
}

/// Lexically normalise `relative` and make sure it stays below the root.
///
/// `.` segments are dropped and `..` pops the previous segment; popping past
/// the root, absolute paths, over-long components and paths that normalise to
/// nothing are rejected.
pub fn contained_path(relative: &str) -> Result<PathBuf, PathError> {
    if relative.is_empty() {
        return Err(PathError::Empty);
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) if part.len() > MAX_COMPONENT_BYTES => {
                return Err(PathError::TooLong);
            }
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PathError::Escapes);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Absolute),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(normalized)
}
