// Pre/post-state validation for a mapping run
// Walks source and target trees into file sets and checks the
// post-condition invariants of the active mode

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::error::BackupError;
use super::exclude::{ExcludeRules, FileTypeFilter};
use super::identity::IdentityCache;
use super::modes::{BackupMode, FileMode, HashMode};
use super::paths;

/// Run-scoped validation state. Created at the start of `backup()` and
/// discarded at the end, never persisted.
pub struct BackupState {
    source_dir: PathBuf,
    target_dir: PathBuf,
    mode: BackupMode,
    file_mode: FileMode,
    exclude: ExcludeRules,
    filter: FileTypeFilter,
    pub source_files: BTreeSet<PathBuf>,
    pub target_files: BTreeSet<PathBuf>,
    identity: IdentityCache,
}

impl BackupState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_dir: PathBuf,
        target_dir: PathBuf,
        mode: BackupMode,
        hash_mode: HashMode,
        file_mode: FileMode,
        exclude: ExcludeRules,
        filter: FileTypeFilter,
        identity_seed: HashMap<PathBuf, String>,
    ) -> Self {
        Self {
            source_dir,
            target_dir,
            mode,
            file_mode,
            exclude,
            filter,
            source_files: BTreeSet::new(),
            target_files: BTreeSet::new(),
            identity: IdentityCache::with_seed(hash_mode, identity_seed),
        }
    }

    /// Walk the source tree and collect its file set.
    ///
    /// Runs before the transaction executes. For content-based hashing the
    /// identity cache is pre-warmed here, so verification can still compare
    /// identities of files a move-mode run has since deleted.
    pub fn validate_source(&mut self) -> Result<(), BackupError> {
        if !self.source_dir.exists() {
            return Err(BackupError::SourceMissing {
                path: self.source_dir.clone(),
            });
        }
        if self.file_mode == FileMode::DirsOnly {
            return Ok(());
        }
        let view = paths::walk_tree(&self.source_dir, &self.exclude, &self.filter)?;
        for file in view.files {
            if self.identity.mode() == HashMode::Sha256 && self.identity.cached(&file).is_none() {
                self.identity.identity(&file, &self.source_dir)?;
            }
            self.source_files.insert(file);
        }
        Ok(())
    }

    /// Walk the target tree and collect its file set. Runs after the
    /// transaction executes so the set reflects the run's outcome.
    pub fn validate_target(&mut self) -> Result<(), BackupError> {
        if !self.target_dir.exists() {
            return Err(BackupError::TargetMissing {
                path: self.target_dir.clone(),
            });
        }
        if self.file_mode == FileMode::DirsOnly {
            return Ok(());
        }
        let view = paths::walk_tree(&self.target_dir, &self.exclude, &self.filter)?;
        for file in view.files {
            self.target_files.insert(file);
        }
        Ok(())
    }

    /// Check the post-condition invariants of the active mode.
    ///
    /// Push modes: every validated source file must be present at the
    /// target with a matching identity. Mirror: the relative-path sets must
    /// be equal (after exclusions) and every pair must match by identity.
    /// Duplicate-tolerant modes compare identity sets instead, since
    /// bucket collapse makes exact path equality unattainable.
    ///
    /// `removals_applied` is false when the mirror removal phase was
    /// declined; verification then downgrades to the push-style check.
    pub fn verify_integrity(&mut self, removals_applied: bool) -> Result<(), BackupError> {
        if self.file_mode == FileMode::DirsOnly {
            return Ok(());
        }
        if self.mode.is_push() || !removals_applied {
            if self.mode.allows_duplicates() {
                self.verify_identity_presence()
            } else {
                self.verify_mapped_targets()
            }
        } else if self.mode.allows_duplicates() {
            self.verify_identity_sets()
        } else {
            self.verify_exact_mirror()
        }
    }

    /// Discard both file sets and the identity cache.
    pub fn clear(&mut self) {
        self.source_files.clear();
        self.target_files.clear();
        self.identity.clear();
    }

    fn verify_mapped_targets(&mut self) -> Result<(), BackupError> {
        for source_file in &self.source_files {
            let target_file =
                paths::target_path_for(source_file, &self.source_dir, &self.target_dir)?;
            if !target_file.exists() {
                return Err(BackupError::VerificationFailed {
                    reason: format!("missing target file: {}", target_file.display()),
                });
            }
            let source_identity = self.identity.identity(source_file, &self.source_dir)?;
            let target_identity = self.identity.identity(&target_file, &self.target_dir)?;
            if source_identity != target_identity {
                return Err(BackupError::VerificationFailed {
                    reason: format!(
                        "hash mismatch between {} and {}",
                        source_file.display(),
                        target_file.display()
                    ),
                });
            }
        }
        Ok(())
    }

    fn verify_identity_presence(&mut self) -> Result<(), BackupError> {
        let target_identities = self.collect_identities(true)?;
        for source_file in &self.source_files {
            let identity = self.identity.identity(source_file, &self.source_dir)?;
            if !target_identities.contains(&identity) {
                return Err(BackupError::VerificationFailed {
                    reason: format!(
                        "content of {} missing from target",
                        source_file.display()
                    ),
                });
            }
        }
        Ok(())
    }

    fn verify_identity_sets(&mut self) -> Result<(), BackupError> {
        let source_identities = self.collect_identities(false)?;
        let target_identities = self.collect_identities(true)?;
        let mut problems = Vec::new();
        let missing: Vec<_> = source_identities.difference(&target_identities).collect();
        if !missing.is_empty() {
            problems.push(format!("{} source identities missing from target", missing.len()));
        }
        let extra: Vec<_> = target_identities.difference(&source_identities).collect();
        if !extra.is_empty() {
            problems.push(format!("{} stale identities remain in target", extra.len()));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BackupError::VerificationFailed {
                reason: problems.join("; "),
            })
        }
    }

    fn verify_exact_mirror(&mut self) -> Result<(), BackupError> {
        let source_relative: BTreeSet<PathBuf> = self
            .source_files
            .iter()
            .filter_map(|f| f.strip_prefix(&self.source_dir).ok())
            .map(Path::to_path_buf)
            .collect();
        // Removal-exempt target content is allowed to linger.
        let target_relative: BTreeSet<PathBuf> = self
            .target_files
            .iter()
            .filter(|f| !self.exclude.is_removal_excluded(f))
            .filter_map(|f| f.strip_prefix(&self.target_dir).ok())
            .map(Path::to_path_buf)
            .collect();

        if source_relative != target_relative {
            let mut problems = Vec::new();
            let missing: Vec<String> = source_relative
                .difference(&target_relative)
                .map(|p| p.display().to_string())
                .collect();
            if !missing.is_empty() {
                problems.push(format!("files missing in target: {}", missing.join(", ")));
            }
            let extra: Vec<String> = target_relative
                .difference(&source_relative)
                .map(|p| p.display().to_string())
                .collect();
            if !extra.is_empty() {
                problems.push(format!("extra files in target: {}", extra.join(", ")));
            }
            return Err(BackupError::VerificationFailed {
                reason: problems.join("\n"),
            });
        }

        for relative in &source_relative {
            let source_file = self.source_dir.join(relative);
            let target_file = self.target_dir.join(relative);
            if !self.identity.files_match(
                &source_file,
                &self.source_dir,
                &target_file,
                &self.target_dir,
            )? {
                return Err(BackupError::VerificationFailed {
                    reason: format!("hash mismatch: {}", relative.display()),
                });
            }
        }
        Ok(())
    }

    fn collect_identities(&mut self, target: bool) -> Result<BTreeSet<String>, BackupError> {
        let (files, root) = if target {
            (self.target_files.clone(), self.target_dir.clone())
        } else {
            (self.source_files.clone(), self.source_dir.clone())
        };
        let mut identities = BTreeSet::new();
        for file in files {
            identities.insert(self.identity.identity(&file, &root)?);
        }
        Ok(identities)
    }
}
