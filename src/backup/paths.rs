// Path utilities and sequential tree walking
// Walks are strictly ordered and synchronous: diff correctness depends on a
// consistent view of both trees

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::error::BackupError;
use super::exclude::{ExcludeRules, FileTypeFilter};
use crate::logging::warn;
use crate::store;

/// Clean a path by removing redundant components like "." and ".."
/// without requiring the path to exist.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                    continue;
                }
                components.push(component);
            }
            _ => components.push(component),
        }
    }

    let mut result = PathBuf::new();
    for component in components {
        result.push(component);
    }

    if result.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        result
    }
}

/// True when one path is contained in the other. A mapping whose trees
/// contain each other would walk into its own output.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Map a source file to its corresponding target path.
pub fn target_path_for(
    source_path: &Path,
    source_dir: &Path,
    target_dir: &Path,
) -> Result<PathBuf, BackupError> {
    let relative = source_path.strip_prefix(source_dir).map_err(|_| {
        BackupError::PathConflict {
            source: source_path.to_path_buf(),
            target: source_dir.to_path_buf(),
        }
    })?;
    Ok(target_dir.join(relative))
}

/// True for file names belonging to the snapshot store: the live index
/// (and its temp file), the lock file, and the rotation directory.
pub fn is_store_artifact(file_name: &str) -> bool {
    file_name.starts_with(store::STORE_FILE_NAME)
        || file_name == store::LOCK_FILE_NAME
        || file_name == store::SNAPSHOT_DIR_NAME
}

/// Result of one sequential tree walk.
#[derive(Debug, Default)]
pub struct TreeView {
    /// Absolute file paths, sorted.
    pub files: Vec<PathBuf>,
    /// Directory paths relative to the walk root, sorted.
    pub dirs: BTreeSet<PathBuf>,
}

/// Walk a directory tree in sorted order, honoring exclusion rules and the
/// file-type allow-list, and skipping snapshot-store artifacts. A missing
/// root yields an empty view; unreadable entries are logged and skipped.
pub fn walk_tree(
    root: &Path,
    exclude: &ExcludeRules,
    filter: &FileTypeFilter,
) -> Result<TreeView, BackupError> {
    let mut view = TreeView::default();
    if !root.exists() {
        return Ok(view);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if is_store_artifact(&name) {
                return false;
            }
            if entry.file_type().is_dir() && exclude.is_excluded(entry.path()) {
                return false;
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot read directory entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_dir() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                view.dirs.insert(relative.to_path_buf());
            }
        } else if entry.file_type().is_file() {
            let name = entry.file_name().to_string_lossy();
            if filter.allows(&name) {
                view.files.push(entry.path().to_path_buf());
            }
        }
        // Symlinks and other special files are skipped.
    }

    Ok(view)
}
