// Tests for the mapping engine: planning, transfer, mirroring, exclusions

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;
use treesync::backup::error::BackupError;
use treesync::backup::{
    AutoConfirm, BackupManager, BackupMapping, BackupMode, Confirmer, FileMode, HashMode,
};
use treesync::cancel::CancellationToken;

struct DenyConfirm;

impl Confirmer for DenyConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        false
    }
}

/// Relative path -> content for every regular file in a tree, skipping
/// snapshot-store artifacts.
fn tree_contents(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut contents = BTreeMap::new();
    if !root.exists() {
        return contents;
    }
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("treesync_index.bin")
            || name == ".treesync_snapshots"
            || name == ".treesync.lock"
        {
            continue;
        }
        if entry.file_type().is_file() && !entry.path_is_symlink() {
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            if relative.starts_with(".treesync_snapshots") {
                continue;
            }
            contents.insert(relative, fs::read(entry.path()).unwrap());
        }
    }
    contents
}

fn mapping(source: &Path, target: &Path, mode: BackupMode) -> BackupMapping {
    BackupMapping::new("test", source, target)
        .unwrap()
        .with_mode(mode)
        .with_hash_mode(HashMode::Sha256)
}

fn run(mapping: &mut BackupMapping) -> treesync::backup::RunReport {
    mapping.setup(false, false).unwrap();
    mapping
        .backup(false, &mut AutoConfirm, &CancellationToken::new())
        .unwrap()
}

#[test]
fn test_push_copies_tree_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(source.join("sub").join("b.txt"), "beta").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Push);
    let report = run(&mut mapping);
    assert_eq!(report.files_copied, 2);
    assert_eq!(report.dirs_created, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(tree_contents(&source), tree_contents(&target));

    // A second run over an unchanged source transfers nothing.
    mapping.clean();
    let report = run(&mut mapping);
    assert_eq!(report.files_copied, 0);
    assert_eq!(report.files_moved, 0);
    assert_eq!(report.files_relocated, 0);
    assert_eq!(report.failures, 0);
}

#[test]
fn test_push_and_remove_completeness() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(source.join("sub").join("b.txt"), "beta").unwrap();
    let original = tree_contents(&source);

    let mut mapping = mapping(&source, &target, BackupMode::PushAndRemove);
    let report = run(&mut mapping);

    assert_eq!(report.files_moved, 2);
    assert_eq!(report.failures, 0);
    // Target is identical to the original source tree.
    assert_eq!(tree_contents(&target), original);
    // Source contains no transferred files any more.
    assert!(tree_contents(&source).is_empty());
}

#[test]
fn test_push_and_remove_retires_already_backed_up_source() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(target.join("a.txt"), "alpha").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::PushAndRemove);
    let report = run(&mut mapping);

    assert_eq!(report.files_moved, 0);
    assert_eq!(report.source_files_removed, 1);
    assert!(!source.join("a.txt").exists());
    assert!(target.join("a.txt").exists());
}

#[test]
fn test_mirror_converges_after_source_deletion() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(source.join("b.txt"), "beta").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Mirror);
    let report = run(&mut mapping);
    assert_eq!(report.files_copied, 2);
    assert_eq!(report.failures, 0);

    // Delete one file from source and re-run with confirmation accepted.
    fs::remove_file(source.join("b.txt")).unwrap();
    mapping.clean();
    let report = run(&mut mapping);

    assert_eq!(report.stale_files_removed, 1);
    assert_eq!(report.failures, 0);
    assert!(!target.join("b.txt").exists());
    assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "alpha");
    assert_eq!(tree_contents(&source), tree_contents(&target));
}

#[test]
fn test_mirror_removes_stale_directories() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("kept")).unwrap();
    fs::create_dir_all(target.join("kept")).unwrap();
    fs::create_dir_all(target.join("stale").join("nested")).unwrap();
    fs::write(source.join("kept").join("a.txt"), "alpha").unwrap();
    fs::write(target.join("kept").join("a.txt"), "alpha").unwrap();
    fs::write(target.join("stale").join("old.txt"), "old").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Mirror);
    let report = run(&mut mapping);

    assert_eq!(report.stale_files_removed, 1);
    assert!(report.stale_dirs_removed >= 1);
    assert!(!target.join("stale").exists());
    assert!(target.join("kept").join("a.txt").exists());
}

#[test]
fn test_mirror_declined_confirmation_is_a_no_op() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(target.join("stale.txt"), "old").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Mirror);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(false, &mut DenyConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.stale_files_removed, 0);
    assert_eq!(report.failures, 0);
    assert!(target.join("stale.txt").exists());
    assert!(target.join("a.txt").exists());
}

#[test]
fn test_duplicate_collapse_under_push_duplicates() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "identical content").unwrap();
    fs::write(source.join("b.txt"), "identical content").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::PushDuplicates);
    let report = run(&mut mapping);

    assert_eq!(report.files_copied, 1);
    assert_eq!(report.failures, 0);
    // Exactly one physical file carries the shared content.
    assert_eq!(tree_contents(&target).len(), 1);
}

#[test]
fn test_plain_push_transfers_every_duplicate() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "identical content").unwrap();
    fs::write(source.join("b.txt"), "identical content").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Push);
    let report = run(&mut mapping);

    assert_eq!(report.files_copied, 2);
    assert_eq!(tree_contents(&target).len(), 2);
}

#[test]
fn test_renamed_source_file_is_relocated_in_target() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("old-name.txt"), "large unchanged content").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Push);
    let report = run(&mut mapping);
    assert_eq!(report.files_copied, 1);

    // Rename at the source; the next run renames within the target
    // instead of re-transferring the content.
    fs::rename(source.join("old-name.txt"), source.join("new-name.txt")).unwrap();
    mapping.clean();
    let report = run(&mut mapping);

    assert_eq!(report.files_copied, 0);
    assert_eq!(report.files_relocated, 1);
    assert!(!target.join("old-name.txt").exists());
    assert_eq!(
        fs::read_to_string(target.join("new-name.txt")).unwrap(),
        "large unchanged content"
    );
}

#[test]
fn test_excluded_directories_are_never_walked() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("excluded")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(source.join("excluded").join("skip.txt"), "skipped").unwrap();

    let mut mapping = BackupMapping::new("test", &source, &target)
        .unwrap()
        .with_mode(BackupMode::Push)
        .with_hash_mode(HashMode::Sha256)
        .with_exclude_dirs(vec![source.join("excluded")]);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(false, &mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.files_copied, 1);
    assert!(target.join("a.txt").exists());
    assert!(!target.join("excluded").exists());
}

#[test]
fn test_removal_exempt_directories_survive_mirror() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(target.join("keep")).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();
    fs::write(target.join("keep").join("precious.txt"), "do not delete").unwrap();

    let mut mapping = BackupMapping::new("test", &source, &target)
        .unwrap()
        .with_mode(BackupMode::Mirror)
        .with_hash_mode(HashMode::Sha256)
        .with_exclude_removal_dirs(vec![target.join("keep")]);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(false, &mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.failures, 0);
    assert!(target.join("keep").join("precious.txt").exists());
    assert!(target.join("a.txt").exists());
}

#[test]
fn test_file_type_allow_list() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("photo.png"), "png bytes").unwrap();
    fs::write(source.join("notes.txt"), "text").unwrap();

    let mut mapping = BackupMapping::new("test", &source, &target)
        .unwrap()
        .with_mode(BackupMode::Push)
        .with_hash_mode(HashMode::Sha256)
        .with_file_types(&[".png".to_string()]);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(false, &mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.files_copied, 1);
    assert!(target.join("photo.png").exists());
    assert!(!target.join("notes.txt").exists());
}

#[test]
fn test_dirs_only_replicates_skeleton() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("alpha").join("beta")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("alpha").join("file.txt"), "content").unwrap();

    let mut mapping = BackupMapping::new("test", &source, &target)
        .unwrap()
        .with_mode(BackupMode::Push)
        .with_hash_mode(HashMode::Sha256)
        .with_file_mode(FileMode::DirsOnly);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(false, &mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.dirs_created, 2);
    assert_eq!(report.files_copied, 0);
    assert!(target.join("alpha").join("beta").is_dir());
    assert!(!target.join("alpha").join("file.txt").exists());
}

#[test]
fn test_dry_run_plans_without_touching_files() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();

    let mut mapping = mapping(&source, &target, BackupMode::Push);
    mapping.setup(false, false).unwrap();
    let report = mapping
        .backup(true, &mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.planned_ops, 2); // one directory, one copy
    assert!(tree_contents(&target).is_empty());
}

#[test]
fn test_overlapping_trees_are_rejected() {
    let err = BackupMapping::new("bad", "/data/photos", "/data/photos/backup").unwrap_err();
    assert!(matches!(err, BackupError::PathConflict { .. }));
    let err = BackupMapping::new("bad", "/data/photos/backup", "/data/photos").unwrap_err();
    assert!(matches!(err, BackupError::PathConflict { .. }));
}

#[test]
fn test_cancellation_aborts_cleanly() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut mapping = mapping(&source, &target, BackupMode::Push);
    mapping.setup(false, false).unwrap();
    let err = mapping.backup(false, &mut AutoConfirm, &cancel).unwrap_err();

    assert!(matches!(err, BackupError::Cancelled));
    assert!(tree_contents(&target).is_empty());
}

#[test]
fn test_manager_runs_active_mappings_only() {
    let dir = tempdir().unwrap();
    let source_a = dir.path().join("src-a");
    let source_b = dir.path().join("src-b");
    let target_a = dir.path().join("dst-a");
    let target_b = dir.path().join("dst-b");
    for path in [&source_a, &source_b, &target_a, &target_b] {
        fs::create_dir_all(path).unwrap();
    }
    fs::write(source_a.join("a.txt"), "alpha").unwrap();
    fs::write(source_b.join("b.txt"), "beta").unwrap();

    let active = mapping(&source_a, &target_a, BackupMode::Push);
    let inactive = mapping(&source_b, &target_b, BackupMode::Push).with_will_run(false);

    let mut manager = BackupManager::new("test")
        .with_mappings(vec![active, inactive])
        .with_test(false)
        .with_skip_confirm(true);
    let reports = manager
        .run_backup(&mut AutoConfirm, &CancellationToken::new())
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(target_a.join("a.txt").exists());
    assert!(!target_b.join("b.txt").exists());
}

#[test]
fn test_manager_declined_confirmation_makes_no_change() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a.txt"), "alpha").unwrap();

    let mut manager = BackupManager::new("test")
        .with_mappings(vec![mapping(&source, &target, BackupMode::Push)])
        .with_test(false);
    let reports = manager
        .run_backup(&mut DenyConfirm, &CancellationToken::new())
        .unwrap();

    assert!(reports.is_empty());
    assert!(tree_contents(&target).is_empty());
}
