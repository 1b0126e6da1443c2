use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::StateError;

/// Suffix of files that are still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Snapshot of the files below the destination directory
///
/// Taken once per run before any download starts and never updated, so every
/// worker sees the same answer to "is this episode already on disk".
#[derive(Debug, Clone, Default)]
pub struct ExistingFiles {
    files: HashSet<PathBuf>,
    /// Number of partial files that were cleaned up during the scan
    pub partial_files_cleaned: usize,
}

impl ExistingFiles {
    /// Recursively scan the destination directory, creating it if missing
    ///
    /// Leftover `.partial` files from interrupted downloads are removed and
    /// not recorded.
    pub fn scan(destination: &Path) -> Result<Self, StateError> {
        let mut snapshot = Self::default();

        if !destination.exists() {
            std::fs::create_dir_all(destination).map_err(|e| {
                StateError::CreateDirectoryFailed {
                    path: destination.to_path_buf(),
                    source: e,
                }
            })?;
            return Ok(snapshot);
        }

        let mut pending = vec![destination.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| StateError::ReadDirectoryFailed {
                path: dir.clone(),
                source: e,
            })?;

            for entry in entries {
                let entry = entry.map_err(|e| StateError::ReadDirectoryFailed {
                    path: dir.clone(),
                    source: e,
                })?;
                let path = entry.path();

                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                let is_partial = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));

                if is_partial {
                    if std::fs::remove_file(&path).is_ok() {
                        snapshot.partial_files_cleaned += 1;
                    }
                    continue;
                }

                snapshot.files.insert(path);
            }
        }

        Ok(snapshot)
    }

    /// Build a snapshot from known paths
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: paths.into_iter().collect(),
            partial_files_cleaned: 0,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
