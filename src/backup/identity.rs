// File identity computation
// Derives the comparison key for a file under the active hash mode, cached
// per path for the lifetime of one run. Caches are owned by the run that
// created them, never shared process-wide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::BackupError;
use super::file_ops;
use super::modes::HashMode;

/// Per-run identity cache.
#[derive(Debug, Default)]
pub struct IdentityCache {
    mode: HashMode,
    cache: HashMap<PathBuf, String>,
}

impl IdentityCache {
    pub fn new(mode: HashMode) -> Self {
        Self {
            mode,
            cache: HashMap::new(),
        }
    }

    /// Build a cache pre-seeded with already-known identities.
    pub fn with_seed(mode: HashMode, seed: HashMap<PathBuf, String>) -> Self {
        Self { mode, cache: seed }
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Compute (or recall) the identity of a file under the active mode.
    ///
    /// `root` is the tree the path belongs to; name-and-parent identities
    /// are derived relative to it so that files at the tree root compare
    /// equal across trees. Unreadable files surface a hash-computation
    /// error rather than being silently skipped.
    pub fn identity(&mut self, path: &Path, root: &Path) -> Result<String, BackupError> {
        if let Some(identity) = self.cache.get(path) {
            return Ok(identity.clone());
        }
        let identity = match self.mode {
            HashMode::FileName => file_name_of(path)?,
            HashMode::FileNameAndParent => {
                let name = file_name_of(path)?;
                let parent = path
                    .strip_prefix(root)
                    .ok()
                    .and_then(|relative| relative.parent())
                    .and_then(|parent| parent.file_name())
                    .map(|parent| parent.to_string_lossy().into_owned());
                match parent {
                    Some(parent) => format!("{}/{}", parent, name),
                    None => name,
                }
            }
            HashMode::Sha256 => file_ops::file_sha256(path).map_err(|e| match e {
                BackupError::Io { source, .. } => BackupError::HashFailed {
                    path: path.to_path_buf(),
                    reason: source.to_string(),
                },
                other => other,
            })?,
        };
        self.cache.insert(path.to_path_buf(), identity.clone());
        Ok(identity)
    }

    /// Record an identity computed elsewhere (e.g. recalled from the
    /// snapshot store for an unchanged file).
    pub fn insert(&mut self, path: PathBuf, identity: String) {
        self.cache.insert(path, identity);
    }

    /// The cached identity for a path, if any.
    pub fn cached(&self, path: &Path) -> Option<&String> {
        self.cache.get(path)
    }

    /// Whether two files share an identity under the active mode.
    pub fn files_match(
        &mut self,
        a: &Path,
        a_root: &Path,
        b: &Path,
        b_root: &Path,
    ) -> Result<bool, BackupError> {
        Ok(self.identity(a, a_root)? == self.identity(b, b_root)?)
    }

    /// Copy of the cache contents, used to seed a sibling cache.
    pub fn snapshot(&self) -> HashMap<PathBuf, String> {
        self.cache.clone()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn file_name_of(path: &Path) -> Result<String, BackupError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BackupError::HashFailed {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })
}
