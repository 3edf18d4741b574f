// Tests for the atomic file operations module

use std::fs;

use filetime::FileTime;
use tempfile::tempdir;
use treesync::backup::file_ops::{self, SafeFileOps};

#[test]
fn test_atomic_copy_creates_parents_and_content() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.txt");
    let dst = dir.path().join("deep").join("nested").join("dst.txt");
    fs::write(&src, "payload").unwrap();

    SafeFileOps::atomic_copy(&src, &dst, true).unwrap();

    assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
    assert!(src.exists());
}

#[test]
fn test_atomic_copy_replaces_existing_target() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.txt");
    let dst = dir.path().join("dst.txt");
    fs::write(&src, "new content").unwrap();
    fs::write(&dst, "old content").unwrap();

    SafeFileOps::atomic_copy(&src, &dst, true).unwrap();
    assert_eq!(fs::read_to_string(&dst).unwrap(), "new content");
}

#[test]
fn test_atomic_copy_missing_source_fails() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("missing.txt");
    let dst = dir.path().join("dst.txt");

    assert!(SafeFileOps::atomic_copy(&src, &dst, true).is_err());
    assert!(!dst.exists());
}

#[test]
fn test_atomic_move_removes_source() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.txt");
    let dst = dir.path().join("dst.txt");
    fs::write(&src, "moved").unwrap();

    SafeFileOps::atomic_move(&src, &dst, true).unwrap();

    assert!(!src.exists());
    assert_eq!(fs::read_to_string(&dst).unwrap(), "moved");
}

#[test]
fn test_rename_relocates_within_tree() {
    let dir = tempdir().unwrap();
    let from = dir.path().join("old.txt");
    let to = dir.path().join("moved").join("new.txt");
    fs::write(&from, "content").unwrap();

    SafeFileOps::rename(&from, &to).unwrap();

    assert!(!from.exists());
    assert_eq!(fs::read_to_string(&to).unwrap(), "content");
}

#[test]
fn test_copy_preserves_modification_time() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src.txt");
    let dst = dir.path().join("dst.txt");
    fs::write(&src, "stamped").unwrap();

    let stamp = FileTime::from_unix_time(1_500_000_000, 0);
    filetime::set_file_mtime(&src, stamp).unwrap();

    SafeFileOps::atomic_copy(&src, &dst, true).unwrap();

    let dst_mtime = FileTime::from_last_modification_time(&fs::metadata(&dst).unwrap());
    assert_eq!(dst_mtime.unix_seconds(), stamp.unix_seconds());
}

#[test]
fn test_soft_delete_file_and_directory() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("gone.txt");
    fs::write(&file, "x").unwrap();
    SafeFileOps::soft_delete(&file).unwrap();
    assert!(!file.exists());

    let sub = dir.path().join("subdir");
    fs::create_dir_all(sub.join("inner")).unwrap();
    fs::write(sub.join("inner").join("f.txt"), "x").unwrap();
    SafeFileOps::soft_delete(&sub).unwrap();
    assert!(!sub.exists());
}

#[test]
fn test_files_match() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let c = dir.path().join("c.txt");
    fs::write(&a, "same bytes").unwrap();
    fs::write(&b, "same bytes").unwrap();
    fs::write(&c, "different!").unwrap();

    assert!(file_ops::files_match(&a, &b).unwrap());
    assert!(!file_ops::files_match(&a, &c).unwrap());
    assert!(!file_ops::files_match(&a, &dir.path().join("missing.txt")).unwrap());
}

#[test]
fn test_file_sha256_known_digest() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("hello.txt");
    fs::write(&file, "hello").unwrap();
    assert_eq!(
        file_ops::file_sha256(&file).unwrap(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn test_bytes_to_hex() {
    assert_eq!(file_ops::bytes_to_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
}
