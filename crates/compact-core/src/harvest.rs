//! Artifact harvesting.
//!
//! Loads every regular file under the compiler's output directory into a map
//! keyed by `/`-separated relative path. Unreadable or oversized files are
//! skipped with a warning rather than failing the compilation.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Defensive bounds on a single harvest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarvestLimits {
    /// Maximum number of artifacts collected.
    pub max_files: usize,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
    /// Files that would push the running total past this are skipped.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
}

fn default_max_total_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for HarvestLimits {
    fn default() -> Self {
        Self {
            max_files: 1_000,
            max_file_bytes: 16 * 1024 * 1024,
            max_total_bytes: default_max_total_bytes(),
        }
    }
}

/// A file that was left out of the harvest, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestWarning {
    pub path: String,
    pub reason: String,
}

/// Collected artifacts plus the files that could not be collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    pub artifacts: BTreeMap<String, String>,
    pub warnings: Vec<HarvestWarning>,
}

/// Walk `output_dir` and read every regular file.
///
/// A missing output directory yields an empty harvest. Symlinks are not
/// followed. Contents are decoded as UTF-8 with lossy replacement.
pub fn harvest(output_dir: &Path, limits: &HarvestLimits) -> Harvest {
    harvest_with(output_dir, limits, |path| std::fs::read(path))
}

fn harvest_with<F>(output_dir: &Path, limits: &HarvestLimits, mut read: F) -> Harvest
where
    F: FnMut(&Path) -> io::Result<Vec<u8>>,
{
    let mut harvest = Harvest::default();
    let mut total_bytes: u64 = 0;
    if !output_dir.is_dir() {
        return harvest;
    }

    let walker = WalkDir::new(output_dir)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| relative_key(output_dir, p))
                    .unwrap_or_default();
                harvest.warn(path, err.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let key = relative_key(output_dir, entry.path());
        if harvest.artifacts.len() >= limits.max_files {
            harvest.warn(
                key,
                format!("artifact limit of {} files reached", limits.max_files),
            );
            break;
        }

        let len = match entry.metadata() {
            Ok(meta) if meta.len() > limits.max_file_bytes => {
                harvest.warn(
                    key,
                    format!(
                        "file is {} bytes, limit is {}",
                        meta.len(),
                        limits.max_file_bytes
                    ),
                );
                continue;
            }
            Ok(meta) => meta.len(),
            Err(err) => {
                harvest.warn(key, err.to_string());
                continue;
            }
        };

        if total_bytes.saturating_add(len) > limits.max_total_bytes {
            harvest.warn(
                key,
                format!(
                    "total artifact size limit of {} bytes reached",
                    limits.max_total_bytes
                ),
            );
            continue;
        }

        match read(entry.path()) {
            Ok(bytes) => {
                total_bytes = total_bytes.saturating_add(bytes.len() as u64);
                harvest
                    .artifacts
                    .insert(key, String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(err) => harvest.warn(key, err.to_string()),
        }
    }

    harvest
}

/// [`harvest`] on the blocking thread pool.
pub async fn harvest_blocking(output_dir: PathBuf, limits: HarvestLimits) -> Harvest {
    let dir = output_dir.clone();
    match tokio::task::spawn_blocking(move || harvest(&dir, &limits)).await {
        Ok(harvest) => harvest,
        Err(join_err) => Harvest {
            artifacts: BTreeMap::new(),
            warnings: vec![HarvestWarning {
                path: output_dir.display().to_string(),
                reason: format!("harvest task failed: {join_err}"),
            }],
        },
    }
}

impl Harvest {
    fn warn(&mut self, path: String, reason: String) {
        self.warnings.push(HarvestWarning { path, reason });
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
