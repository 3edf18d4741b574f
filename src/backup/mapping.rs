// Backup mapping: the diff-and-transfer algorithm
// Walks source and target into hash-bucket indices, decides per-bucket
// actions, issues them into a transaction, and verifies the outcome

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use super::error::{BackupError, Failure, FailureKind};
use super::exclude::{ExcludeRules, FileTypeFilter};
use super::file_ops::SafeFileOps;
use super::identity::IdentityCache;
use super::manager::Confirmer;
use super::modes::{BackupMode, FileMode, HashMode};
use super::paths;
use super::state::BackupState;
use super::transaction::BackupTransaction;
use crate::cancel::CancellationToken;
use crate::logging::{info, warn};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::store::SnapshotStore;

/// One decided file operation. The planner emits these in a deterministic
/// order; `backup()` either logs them (dry run) or turns them into
/// transaction steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    CreateDir { path: PathBuf },
    Copy { source: PathBuf, target: PathBuf },
    Move { source: PathBuf, target: PathBuf },
    /// Rename matching content already at the target to its newly-mapped
    /// path instead of re-transferring it.
    Relocate { from: PathBuf, to: PathBuf },
    /// Remove a source file whose content is verified present at target.
    RemoveSource { source: PathBuf, expected_target: PathBuf },
    RemoveStaleFile { path: PathBuf },
    RemoveStaleDir { path: PathBuf },
}

impl PlannedOp {
    /// The target-side path this operation writes, if any.
    fn written_target(&self) -> Option<&PathBuf> {
        match self {
            PlannedOp::Copy { target, .. } | PlannedOp::Move { target, .. } => Some(target),
            PlannedOp::Relocate { to, .. } => Some(to),
            _ => None,
        }
    }
}

impl fmt::Display for PlannedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedOp::CreateDir { path } => write!(f, "create directory {}", path.display()),
            PlannedOp::Copy { source, target } => {
                write!(f, "copy {} -> {}", source.display(), target.display())
            }
            PlannedOp::Move { source, target } => {
                write!(f, "move {} -> {}", source.display(), target.display())
            }
            PlannedOp::Relocate { from, to } => {
                write!(f, "relocate {} -> {}", from.display(), to.display())
            }
            PlannedOp::RemoveSource { source, .. } => {
                write!(f, "remove backed-up source file {}", source.display())
            }
            PlannedOp::RemoveStaleFile { path } => {
                write!(f, "remove stale file {}", path.display())
            }
            PlannedOp::RemoveStaleDir { path } => {
                write!(f, "remove stale directory {}", path.display())
            }
        }
    }
}

/// What one `backup()` call actually did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dry_run: bool,
    pub planned_ops: usize,
    pub dirs_created: usize,
    pub files_copied: usize,
    pub files_moved: usize,
    pub files_relocated: usize,
    pub source_files_removed: usize,
    pub stale_files_removed: usize,
    pub stale_dirs_removed: usize,
    pub rolled_back: bool,
    pub failures: usize,
}

#[derive(Debug, Clone, Default)]
struct OpCounters {
    dirs_created: usize,
    files_copied: usize,
    files_moved: usize,
    files_relocated: usize,
    source_files_removed: usize,
    stale_files_removed: usize,
    stale_dirs_removed: usize,
}

/// One configured source-to-target relationship, reused across runs.
///
/// Run-scoped children (a transaction and a validation state) are created
/// at the start of `backup()` and discarded at the end.
pub struct BackupMapping {
    name: String,
    source_dir: PathBuf,
    target_dir: PathBuf,
    file_types: FileTypeFilter,
    mode: BackupMode,
    file_mode: FileMode,
    hash_mode: HashMode,
    exclude: ExcludeRules,
    pub will_run: bool,
    pub failures: Vec<Failure>,
    pub modified_target_files: Vec<PathBuf>,
    source_index: BTreeMap<String, Vec<PathBuf>>,
    target_index: BTreeMap<PathBuf, String>,
    source_dirs: BTreeSet<PathBuf>,
    target_dirs: BTreeSet<PathBuf>,
    identity: IdentityCache,
    store: Option<SnapshotStore>,
    progress: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for BackupMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupMapping")
            .field("name", &self.name)
            .field("source_dir", &self.source_dir)
            .field("target_dir", &self.target_dir)
            .field("mode", &self.mode)
            .field("file_mode", &self.file_mode)
            .field("hash_mode", &self.hash_mode)
            .field("will_run", &self.will_run)
            .field("failures", &self.failures)
            .field("modified_target_files", &self.modified_target_files)
            .finish_non_exhaustive()
    }
}

impl BackupMapping {
    /// Create a mapping between two directory trees.
    ///
    /// Paths are cleaned lexically. Trees that contain each other are
    /// rejected: a walk of one would recurse into the other's output.
    pub fn new(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
    ) -> Result<Self, BackupError> {
        let source_dir = paths::clean_path(&source_dir.into());
        let target_dir = paths::clean_path(&target_dir.into());
        if paths::paths_overlap(&source_dir, &target_dir) {
            return Err(BackupError::PathConflict {
                source: source_dir,
                target: target_dir,
            });
        }
        Ok(Self {
            name: name.into(),
            source_dir,
            target_dir,
            file_types: FileTypeFilter::default(),
            mode: BackupMode::default(),
            file_mode: FileMode::default(),
            hash_mode: HashMode::default(),
            exclude: ExcludeRules::default(),
            will_run: true,
            failures: Vec::new(),
            modified_target_files: Vec::new(),
            source_index: BTreeMap::new(),
            target_index: BTreeMap::new(),
            source_dirs: BTreeSet::new(),
            target_dirs: BTreeSet::new(),
            identity: IdentityCache::default(),
            store: None,
            progress: None,
        })
    }

    pub fn with_mode(mut self, mode: BackupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_hash_mode(mut self, hash_mode: HashMode) -> Self {
        self.hash_mode = hash_mode;
        self
    }

    pub fn with_file_mode(mut self, file_mode: FileMode) -> Self {
        self.file_mode = file_mode;
        self
    }

    pub fn with_file_types(mut self, extensions: &[String]) -> Self {
        self.file_types = FileTypeFilter::new(extensions);
        self
    }

    pub fn with_exclude_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.exclude = ExcludeRules::new(dirs, self.exclude.exclude_removal_dirs().to_vec());
        self
    }

    pub fn with_exclude_removal_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.exclude = ExcludeRules::new(self.exclude.exclude_dirs().to_vec(), dirs);
        self
    }

    pub fn with_will_run(mut self, will_run: bool) -> Self {
        self.will_run = will_run;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    pub fn file_mode(&self) -> FileMode {
        self.file_mode
    }

    /// Load the snapshot store and build both hash indices.
    ///
    /// Source identities cached in the store are reused for files whose
    /// mtime predates the store's last update; everything else is hashed
    /// fresh. The target index is always rebuilt.
    pub fn setup(&mut self, overwrite: bool, warn_duplicates: bool) -> Result<(), BackupError> {
        if !self.source_dir.exists() {
            return Err(BackupError::SourceMissing {
                path: self.source_dir.clone(),
            });
        }

        let mut store = SnapshotStore::load(&self.source_dir, overwrite)?;
        if let Some(callback) = &self.progress {
            store = store.with_progress(Arc::clone(callback));
        }
        let mut cached: HashMap<PathBuf, String> = HashMap::new();
        if self.hash_mode == HashMode::Sha256 {
            for (identity, files) in &store.hash_index {
                for file in files {
                    cached.insert(file.clone(), identity.clone());
                }
            }
        }
        let store_stamp = store.last_updated();

        self.identity = IdentityCache::new(self.hash_mode);
        self.source_index.clear();
        self.target_index.clear();

        let source_view = paths::walk_tree(&self.source_dir, &self.exclude, &self.file_types)?;
        self.source_dirs = source_view.dirs;
        let source_files = if self.file_mode == FileMode::DirsOnly {
            Vec::new()
        } else {
            source_view.files
        };
        for file in source_files {
            let identity = match cached.get(&file) {
                Some(known) if unchanged_since(&file, store_stamp) => {
                    self.identity.insert(file.clone(), known.clone());
                    known.clone()
                }
                _ => self.identity.identity(&file, &self.source_dir)?,
            };
            let bucket = self.source_index.entry(identity).or_default();
            if !bucket.contains(&file) {
                bucket.push(file);
            }
        }
        if warn_duplicates {
            for files in self.source_index.values() {
                if files.len() > 1 {
                    let listing: Vec<String> =
                        files.iter().map(|f| f.display().to_string()).collect();
                    warn!("duplicate content: {}", listing.join(", "));
                }
            }
        }
        store.hash_index = self.source_index.clone();
        self.store = Some(store);

        let target_view = paths::walk_tree(&self.target_dir, &self.exclude, &self.file_types)?;
        self.target_dirs = target_view.dirs;
        if self.file_mode != FileMode::DirsOnly {
            for file in target_view.files {
                let identity = self.identity.identity(&file, &self.target_dir)?;
                self.target_index.insert(file, identity);
            }
        }
        Ok(())
    }

    /// Plan and execute one run.
    ///
    /// With `dry_run` the plan is computed and logged but nothing is added
    /// to or executed by the transaction. For mirror modes the removal
    /// phase is gated on the confirmer; declining it is a deliberate
    /// no-op. After execution the mapping state is verified; a
    /// verification failure rolls the whole transaction back and is
    /// recorded as a failure.
    pub fn backup(
        &mut self,
        dry_run: bool,
        confirmer: &mut dyn Confirmer,
        cancel: &CancellationToken,
    ) -> Result<RunReport, BackupError> {
        let mut report = RunReport {
            dry_run,
            ..RunReport::default()
        };

        // Seed verification with source identities only: target files may
        // be rewritten during the run, which would stale their cached
        // identities and fail verification for content that is correct.
        let source_seed: HashMap<PathBuf, String> = self
            .identity
            .snapshot()
            .into_iter()
            .filter(|(path, _)| path.starts_with(&self.source_dir))
            .collect();
        let mut state = BackupState::new(
            self.source_dir.clone(),
            self.target_dir.clone(),
            self.mode,
            self.hash_mode,
            self.file_mode,
            self.exclude.clone(),
            self.file_types.clone(),
            source_seed,
        );
        state.validate_source()?;

        let copy_plan = self.plan_copy_phase()?;
        report.planned_ops = copy_plan.len();

        if dry_run {
            for op in &copy_plan {
                info!("[dry run] {}", op);
            }
            if self.mode.is_mirror() {
                let predicted: BTreeSet<PathBuf> = copy_plan
                    .iter()
                    .filter_map(|op| op.written_target().cloned())
                    .collect();
                let removal_plan = self.plan_removal_phase(&predicted);
                for op in &removal_plan {
                    info!("[dry run] {}", op);
                }
                report.planned_ops += removal_plan.len();
            }
            return Ok(report);
        }

        let failures: Rc<RefCell<Vec<Failure>>> = Rc::default();
        let modified: Rc<RefCell<Vec<PathBuf>>> = Rc::default();
        let counters: Rc<RefCell<OpCounters>> = Rc::default();

        let mut txn = BackupTransaction::new();
        self.add_steps(&mut txn, copy_plan, &failures, &modified, &counters);

        if let Err(e) = txn.execute(cancel, self.progress_fn()) {
            return self.finish_failed(e, &failures, &counters, report);
        }

        let mut removals_applied = !self.mode.is_mirror();
        if self.mode.is_mirror() {
            let modified_set: BTreeSet<PathBuf> =
                modified.borrow().iter().cloned().collect();
            let removal_plan = self.plan_removal_phase(&modified_set);
            report.planned_ops += removal_plan.len();
            if removal_plan.is_empty() {
                removals_applied = true;
            } else {
                let prompt = format!(
                    "Remove {} stale entries from {} to ensure parity?",
                    removal_plan.len(),
                    self.target_dir.display()
                );
                if confirmer.confirm(&prompt) {
                    self.add_steps(&mut txn, removal_plan, &failures, &modified, &counters);
                    if let Err(e) = txn.execute(cancel, self.progress_fn()) {
                        return self.finish_failed(e, &failures, &counters, report);
                    }
                    removals_applied = true;
                } else {
                    info!("stale removal declined; target extras left in place");
                }
            }
        }

        self.failures.extend(failures.borrow_mut().drain(..));
        self.modified_target_files
            .extend(modified.borrow_mut().drain(..));
        apply_counters(&mut report, &counters.borrow());

        state.validate_target()?;
        if let Err(e) = state.verify_integrity(removals_applied) {
            warn!("verification failed, rolling back: {}", e);
            txn.rollback();
            self.failures.push(Failure::new(
                FailureKind::HashVerification,
                e.to_string(),
                &self.target_dir,
                &self.source_dir,
            ));
            self.modified_target_files.clear();
            report.rolled_back = true;
        } else if !self.mode.is_move() {
            if let Some(store) = self.store.as_mut() {
                let description = format!("after {} run", self.name);
                match store.save(&description, cancel) {
                    Ok(()) => {}
                    Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                    Err(e) => warn!("could not persist snapshot store: {}", e),
                }
            }
        }

        report.failures = self.failures.len();
        Ok(report)
    }

    /// Reset run state: the failure list, the modified-target list, and
    /// the identity cache.
    pub fn clean(&mut self) {
        self.failures.clear();
        self.modified_target_files.clear();
        self.identity.clear();
    }

    /// Log a failure summary; when any failures exist, also dump them as
    /// JSON next to the working directory for later inspection.
    pub fn report_failures(&self) -> &[Failure] {
        if self.failures.is_empty() {
            info!(
                "no failures encountered for mapping: {} -> {}",
                self.source_dir.display(),
                self.target_dir.display()
            );
        } else {
            warn!(
                "{} failures encountered for mapping: {} -> {}",
                self.failures.len(),
                self.source_dir.display(),
                self.target_dir.display()
            );
            for failure in &self.failures {
                warn!("{}", failure);
            }
            match serde_json::to_string_pretty(&self.failures) {
                Ok(json) => {
                    if let Err(e) = fs::write("backup_failures.json", json) {
                        warn!("could not save failure data: {}", e);
                    } else {
                        info!("saved failure data to backup_failures.json");
                    }
                }
                Err(e) => warn!("could not serialize failure data: {}", e),
            }
        }
        &self.failures
    }

    /// Decide the copy-phase operations from the two hash indices.
    fn plan_copy_phase(&self) -> Result<Vec<PlannedOp>, BackupError> {
        let mut plan = Vec::new();

        // New directories first, even if empty of files.
        for relative in self.source_dirs.difference(&self.target_dirs) {
            plan.push(PlannedOp::CreateDir {
                path: self.target_dir.join(relative),
            });
        }
        if self.file_mode == FileMode::DirsOnly {
            return Ok(plan);
        }

        let mut targets_by_identity: BTreeMap<&str, Vec<&PathBuf>> = BTreeMap::new();
        for (path, identity) in &self.target_index {
            targets_by_identity
                .entry(identity.as_str())
                .or_default()
                .push(path);
        }
        let mut consumed_donors: BTreeSet<PathBuf> = BTreeSet::new();

        for (identity, source_paths) in &self.source_index {
            // Duplicate-tolerant modes collapse a multi-path bucket to its
            // first entry; one physical target file per identity.
            let ensure: &[PathBuf] = if self.mode.allows_duplicates() && source_paths.len() > 1 {
                &source_paths[..1]
            } else {
                &source_paths[..]
            };

            let known_targets = targets_by_identity.get(identity.as_str());
            for source_path in ensure {
                let mapped =
                    paths::target_path_for(source_path, &self.source_dir, &self.target_dir)?;
                let Some(target_paths) = known_targets else {
                    plan.push(self.transfer_op(source_path, mapped));
                    continue;
                };
                if self.target_index.get(&mapped).map(String::as_str) == Some(identity.as_str()) {
                    // Already in place; move semantics retire the source.
                    if self.mode.is_move() && !self.exclude.is_removal_excluded(source_path) {
                        plan.push(PlannedOp::RemoveSource {
                            source: source_path.clone(),
                            expected_target: mapped,
                        });
                    }
                    continue;
                }
                if target_paths.len() > 1 {
                    // Several target files share this identity; no safe way
                    // to pick one, so re-transfer unconditionally.
                    plan.push(self.transfer_op(source_path, mapped));
                    continue;
                }
                let donor = target_paths[0].clone();
                if donor != mapped && !consumed_donors.contains(&donor) && donor.exists() {
                    consumed_donors.insert(donor.clone());
                    plan.push(PlannedOp::Relocate {
                        from: donor,
                        to: mapped.clone(),
                    });
                    if self.mode.is_move() && !self.exclude.is_removal_excluded(source_path) {
                        plan.push(PlannedOp::RemoveSource {
                            source: source_path.clone(),
                            expected_target: mapped,
                        });
                    }
                } else {
                    plan.push(self.transfer_op(source_path, mapped));
                }
            }
        }
        Ok(plan)
    }

    /// Decide the mirror removal operations: target content whose identity
    /// is absent from the source index, plus target-only directories.
    /// Skips paths written earlier in this run and all exclusions.
    fn plan_removal_phase(&self, modified: &BTreeSet<PathBuf>) -> Vec<PlannedOp> {
        let mut plan = Vec::new();
        // Dirs-only mappings never touch files; the index is empty then.
        for (target_path, identity) in &self.target_index {
            if modified.contains(target_path) {
                continue;
            }
            if self.source_index.contains_key(identity) {
                continue;
            }
            if self.exclude.is_excluded(target_path)
                || self.exclude.is_removal_excluded(target_path)
            {
                continue;
            }
            if !target_path.exists() {
                // Consumed as a relocate donor during the copy phase.
                continue;
            }
            plan.push(PlannedOp::RemoveStaleFile {
                path: target_path.clone(),
            });
        }

        let mut stale_dirs: Vec<PathBuf> = self
            .target_dirs
            .difference(&self.source_dirs)
            .map(|relative| self.target_dir.join(relative))
            .filter(|dir| {
                !self.exclude.is_excluded(dir)
                    && !self.exclude.is_removal_excluded(dir)
                    && !self
                        .exclude
                        .exclude_removal_dirs()
                        .iter()
                        .any(|exempt| exempt.starts_with(dir))
            })
            .collect();
        // Deepest first so nested directories go before their parents.
        stale_dirs.sort_by(|a, b| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| b.cmp(a))
        });
        for dir in stale_dirs {
            plan.push(PlannedOp::RemoveStaleDir { path: dir });
        }
        plan
    }

    fn transfer_op(&self, source_path: &Path, target: PathBuf) -> PlannedOp {
        if self.mode.is_move() {
            PlannedOp::Move {
                source: source_path.to_path_buf(),
                target,
            }
        } else {
            PlannedOp::Copy {
                source: source_path.to_path_buf(),
                target,
            }
        }
    }

    /// Turn planned operations into transaction steps.
    ///
    /// Directory creation propagates its error and aborts the transaction:
    /// later steps depend on it. Per-file transfer and removal steps catch
    /// their own error, record a tagged failure, and let the run continue.
    fn add_steps(
        &self,
        txn: &mut BackupTransaction,
        plan: Vec<PlannedOp>,
        failures: &Rc<RefCell<Vec<Failure>>>,
        modified: &Rc<RefCell<Vec<PathBuf>>>,
        counters: &Rc<RefCell<OpCounters>>,
    ) {
        for op in plan {
            let label = op.to_string();
            match op {
                PlannedOp::CreateDir { path } => {
                    let created = Rc::new(Cell::new(false));
                    let created_done = Rc::clone(&created);
                    let counters = Rc::clone(counters);
                    let rollback_path = path.clone();
                    txn.add_with_rollback(
                        label,
                        move || {
                            if !path.exists() {
                                fs::create_dir_all(&path).map_err(|e| {
                                    BackupError::DirectoryFailed {
                                        path: path.clone(),
                                        reason: e.to_string(),
                                    }
                                })?;
                                created.set(true);
                                counters.borrow_mut().dirs_created += 1;
                            }
                            Ok(())
                        },
                        move || {
                            if created_done.get() {
                                let _ = fs::remove_dir(&rollback_path);
                            }
                            Ok(())
                        },
                    );
                }
                PlannedOp::Copy { source, target } => {
                    let done = Rc::new(Cell::new(false));
                    let done_flag = Rc::clone(&done);
                    let failures = Rc::clone(failures);
                    let modified = Rc::clone(modified);
                    let counters = Rc::clone(counters);
                    let rollback_target = target.clone();
                    txn.add_with_rollback(
                        label,
                        move || {
                            match SafeFileOps::atomic_copy(&source, &target, true) {
                                Ok(()) => {
                                    done.set(true);
                                    modified.borrow_mut().push(target.clone());
                                    counters.borrow_mut().files_copied += 1;
                                }
                                Err(e) => failures.borrow_mut().push(Failure::new(
                                    FailureKind::MoveFile,
                                    e.to_string(),
                                    &target,
                                    &source,
                                )),
                            }
                            Ok(())
                        },
                        move || {
                            if done_flag.get() {
                                fs::remove_file(&rollback_target).map_err(|e| {
                                    BackupError::from_io_error(
                                        e,
                                        "rolling back copy of",
                                        Some(rollback_target.clone()),
                                    )
                                })?;
                            }
                            Ok(())
                        },
                    );
                }
                PlannedOp::Move { source, target } => {
                    let done = Rc::new(Cell::new(false));
                    let done_flag = Rc::clone(&done);
                    let failures = Rc::clone(failures);
                    let modified = Rc::clone(modified);
                    let counters = Rc::clone(counters);
                    let rollback_source = source.clone();
                    let rollback_target = target.clone();
                    txn.add_with_rollback(
                        label,
                        move || {
                            match SafeFileOps::atomic_move(&source, &target, true) {
                                Ok(()) => {
                                    done.set(true);
                                    modified.borrow_mut().push(target.clone());
                                    counters.borrow_mut().files_moved += 1;
                                }
                                Err(e) => failures.borrow_mut().push(Failure::new(
                                    FailureKind::MoveFile,
                                    e.to_string(),
                                    &target,
                                    &source,
                                )),
                            }
                            Ok(())
                        },
                        move || {
                            if done_flag.get() {
                                SafeFileOps::rename(&rollback_target, &rollback_source)?;
                            }
                            Ok(())
                        },
                    );
                }
                PlannedOp::Relocate { from, to } => {
                    let done = Rc::new(Cell::new(false));
                    let done_flag = Rc::clone(&done);
                    let failures = Rc::clone(failures);
                    let modified = Rc::clone(modified);
                    let counters = Rc::clone(counters);
                    let rollback_from = from.clone();
                    let rollback_to = to.clone();
                    txn.add_with_rollback(
                        label,
                        move || {
                            match SafeFileOps::rename(&from, &to) {
                                Ok(()) => {
                                    done.set(true);
                                    modified.borrow_mut().push(to.clone());
                                    counters.borrow_mut().files_relocated += 1;
                                }
                                Err(e) => failures.borrow_mut().push(Failure::new(
                                    FailureKind::MoveFile,
                                    e.to_string(),
                                    &to,
                                    &from,
                                )),
                            }
                            Ok(())
                        },
                        move || {
                            if done_flag.get() {
                                SafeFileOps::rename(&rollback_to, &rollback_from)?;
                            }
                            Ok(())
                        },
                    );
                }
                PlannedOp::RemoveSource {
                    source,
                    expected_target,
                } => {
                    let failures = Rc::clone(failures);
                    let counters = Rc::clone(counters);
                    txn.add(label, move || {
                        if !expected_target.exists() {
                            failures.borrow_mut().push(Failure::new(
                                FailureKind::RemoveSourceFileTargetMissing,
                                "backup file not found",
                                &expected_target,
                                &source,
                            ));
                            return Ok(());
                        }
                        match SafeFileOps::soft_delete(&source) {
                            Ok(()) => counters.borrow_mut().source_files_removed += 1,
                            Err(e) => failures.borrow_mut().push(Failure::new(
                                FailureKind::RemoveSourceFile,
                                e.to_string(),
                                &expected_target,
                                &source,
                            )),
                        }
                        Ok(())
                    });
                }
                PlannedOp::RemoveStaleFile { path } => {
                    let failures = Rc::clone(failures);
                    let counters = Rc::clone(counters);
                    txn.add(label, move || {
                        match SafeFileOps::soft_delete(&path) {
                            Ok(()) => counters.borrow_mut().stale_files_removed += 1,
                            Err(e) => failures.borrow_mut().push(Failure::new(
                                FailureKind::RemoveStaleFile,
                                e.to_string(),
                                &path,
                                &path,
                            )),
                        }
                        Ok(())
                    });
                }
                PlannedOp::RemoveStaleDir { path } => {
                    let failures = Rc::clone(failures);
                    let counters = Rc::clone(counters);
                    txn.add(label, move || {
                        match SafeFileOps::soft_delete(&path) {
                            Ok(()) => counters.borrow_mut().stale_dirs_removed += 1,
                            Err(e) => failures.borrow_mut().push(Failure::new(
                                FailureKind::RemoveStaleDirectory,
                                e.to_string(),
                                &path,
                                &path,
                            )),
                        }
                        Ok(())
                    });
                }
            }
        }
    }

    fn progress_fn(&self) -> impl FnMut(u64, u64, &str) {
        let callback = self.progress.clone();
        move |current, total, message: &str| {
            if let Some(callback) = &callback {
                (callback.as_ref())(ProgressEvent {
                    current,
                    total,
                    message: message.to_string(),
                });
            }
        }
    }

    fn finish_failed(
        &mut self,
        error: BackupError,
        failures: &Rc<RefCell<Vec<Failure>>>,
        counters: &Rc<RefCell<OpCounters>>,
        mut report: RunReport,
    ) -> Result<RunReport, BackupError> {
        self.failures.extend(failures.borrow_mut().drain(..));
        if matches!(error, BackupError::Cancelled) {
            return Err(BackupError::Cancelled);
        }
        let kind = match error {
            BackupError::DirectoryFailed { .. } => FailureKind::DirectoryOperation,
            _ => FailureKind::BackupOperation,
        };
        self.failures.push(Failure::new(
            kind,
            error.to_string(),
            &self.target_dir,
            &self.source_dir,
        ));
        // Completed steps were rolled back; nothing at the target remains.
        self.modified_target_files.clear();
        apply_counters(&mut report, &counters.borrow());
        report.rolled_back = true;
        report.failures = self.failures.len();
        Ok(report)
    }
}

impl fmt::Display for BackupMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BackupMapping {{")?;
        writeln!(f, "    Name: {}", self.name)?;
        writeln!(f, "    Source: {}", self.source_dir.display())?;
        writeln!(f, "    Target: {}", self.target_dir.display())?;
        writeln!(f, "    Mode: {}", self.mode)?;
        writeln!(f, "    Hash mode: {}", self.hash_mode)?;
        if !self.file_types.allows_all() {
            writeln!(f, "    File types: {}", self.file_types.extensions().join(", "))?;
        }
        if !self.exclude.exclude_dirs().is_empty() {
            writeln!(f, "    Exclude dirs: {}", join_paths(self.exclude.exclude_dirs()))?;
        }
        if !self.exclude.exclude_removal_dirs().is_empty() {
            writeln!(
                f,
                "    Exclude removal dirs: {}",
                join_paths(self.exclude.exclude_removal_dirs())
            )?;
        }
        write!(f, "}}")
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn apply_counters(report: &mut RunReport, counters: &OpCounters) {
    report.dirs_created = counters.dirs_created;
    report.files_copied = counters.files_copied;
    report.files_moved = counters.files_moved;
    report.files_relocated = counters.files_relocated;
    report.source_files_removed = counters.source_files_removed;
    report.stale_files_removed = counters.stale_files_removed;
    report.stale_dirs_removed = counters.stale_dirs_removed;
}

/// Whether a file's mtime predates the given store timestamp (millis).
fn unchanged_since(path: &Path, stamp_millis: i64) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|since_epoch| (since_epoch.as_millis() as i64) < stamp_millis)
        .unwrap_or(false)
}
