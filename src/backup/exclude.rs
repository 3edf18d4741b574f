// Exclusion rules for backup mappings
// Excluded directories are never walked; removal-exempt directories may be
// copied into but are never deleted from

use std::path::{Path, PathBuf};

/// Directory exclusion rules for one mapping.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    exclude_dirs: Vec<PathBuf>,
    exclude_removal_dirs: Vec<PathBuf>,
}

impl ExcludeRules {
    pub fn new(exclude_dirs: Vec<PathBuf>, exclude_removal_dirs: Vec<PathBuf>) -> Self {
        Self {
            exclude_dirs,
            exclude_removal_dirs,
        }
    }

    pub fn exclude_dirs(&self) -> &[PathBuf] {
        &self.exclude_dirs
    }

    pub fn exclude_removal_dirs(&self) -> &[PathBuf] {
        &self.exclude_removal_dirs
    }

    /// True when the path lies in (or is) an excluded directory.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// True when the path lies in (or is) a removal-exempt directory.
    pub fn is_removal_excluded(&self, path: &Path) -> bool {
        self.exclude_removal_dirs.iter().any(|dir| path.starts_with(dir))
    }
}

/// File-type allow-list. An empty list allows every file.
#[derive(Debug, Clone, Default)]
pub struct FileTypeFilter {
    extensions: Vec<String>,
}

impl FileTypeFilter {
    /// Build a filter from extension strings. Entries are normalized to
    /// lowercase; a missing leading dot is added.
    pub fn new(extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| {
                let ext = ext.to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();
        Self { extensions }
    }

    pub fn allows_all(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Match a file name against the allow-list, case-insensitively.
    pub fn allows(&self, file_name: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let lower = file_name.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}
