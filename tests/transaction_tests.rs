// Tests for the transaction module

use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;
use treesync::backup::error::BackupError;
use treesync::backup::BackupTransaction;
use treesync::cancel::CancellationToken;

fn create_file_step(path: PathBuf, content: &'static str) -> impl FnOnce() -> Result<(), BackupError> {
    move || {
        fs::write(&path, content)
            .map_err(|e| BackupError::from_io_error(e, "writing", Some(path.clone())))
    }
}

fn remove_file_rollback(path: PathBuf) -> impl FnOnce() -> Result<(), BackupError> {
    move || {
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| BackupError::from_io_error(e, "removing", Some(path.clone())))?;
        }
        Ok(())
    }
}

#[test]
fn test_successful_transaction() {
    let dir = tempdir().unwrap();
    let file1 = dir.path().join("file1.txt");
    let file2 = dir.path().join("file2.txt");

    let mut transaction = BackupTransaction::new();
    transaction.add_with_rollback(
        "create file1",
        create_file_step(file1.clone(), "content1"),
        remove_file_rollback(file1.clone()),
    );
    transaction.add_with_rollback(
        "create file2",
        create_file_step(file2.clone(), "content2"),
        remove_file_rollback(file2.clone()),
    );

    let result = transaction.execute(&CancellationToken::new(), |_, _, _| {});

    assert!(result.is_ok());
    assert_eq!(fs::read_to_string(&file1).unwrap(), "content1");
    assert_eq!(fs::read_to_string(&file2).unwrap(), "content2");
    assert_eq!(transaction.completed_len(), 2);
}

#[test]
fn test_failed_transaction_rolls_back_and_stops() {
    let dir = tempdir().unwrap();
    let file1 = dir.path().join("file1.txt");
    let file2 = dir.path().join("file2.txt");

    let mut transaction = BackupTransaction::new();
    transaction.add_with_rollback(
        "create file1",
        create_file_step(file1.clone(), "content1"),
        remove_file_rollback(file1.clone()),
    );
    transaction.add("fail", || {
        Err(BackupError::VerificationFailed {
            reason: "operation failed".to_string(),
        })
    });
    transaction.add_with_rollback(
        "create file2",
        create_file_step(file2.clone(), "content2"),
        remove_file_rollback(file2.clone()),
    );

    let err = transaction
        .execute(&CancellationToken::new(), |_, _, _| {})
        .unwrap_err();

    assert!(err.to_string().contains("operation failed"));
    // First step's effect is rolled back.
    assert!(!file1.exists());
    // Third step never executed.
    assert!(!file2.exists());
    assert_eq!(transaction.completed_len(), 0);
}

#[test]
fn test_rollback_failure_is_swallowed() {
    let dir = tempdir().unwrap();
    let file1 = dir.path().join("file1.txt");

    let mut transaction = BackupTransaction::new();
    transaction.add_with_rollback(
        "create file1",
        create_file_step(file1.clone(), "content1"),
        || {
            Err(BackupError::VerificationFailed {
                reason: "rollback failed".to_string(),
            })
        },
    );
    transaction.add("fail", || {
        Err(BackupError::VerificationFailed {
            reason: "operation failed".to_string(),
        })
    });

    // The failing rollback must not mask the triggering error.
    let err = transaction
        .execute(&CancellationToken::new(), |_, _, _| {})
        .unwrap_err();
    assert!(err.to_string().contains("operation failed"));
    // The rollback that failed left its file in place.
    assert!(file1.exists());
}

#[test]
fn test_retroactive_rollback_spans_phases() {
    let dir = tempdir().unwrap();
    let file1 = dir.path().join("file1.txt");
    let file2 = dir.path().join("file2.txt");

    let mut transaction = BackupTransaction::new();
    transaction.add_with_rollback(
        "create file1",
        create_file_step(file1.clone(), "content1"),
        remove_file_rollback(file1.clone()),
    );
    transaction
        .execute(&CancellationToken::new(), |_, _, _| {})
        .unwrap();

    transaction.add_with_rollback(
        "create file2",
        create_file_step(file2.clone(), "content2"),
        remove_file_rollback(file2.clone()),
    );
    transaction
        .execute(&CancellationToken::new(), |_, _, _| {})
        .unwrap();

    assert!(file1.exists());
    assert!(file2.exists());

    // A later rollback undoes both phases, newest first.
    transaction.rollback();
    assert!(!file1.exists());
    assert!(!file2.exists());
}

#[test]
fn test_cancellation_between_steps() {
    let dir = tempdir().unwrap();
    let file1 = dir.path().join("file1.txt");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut transaction = BackupTransaction::new();
    transaction.add_with_rollback(
        "create file1",
        create_file_step(file1.clone(), "content1"),
        remove_file_rollback(file1.clone()),
    );

    let err = transaction.execute(&cancel, |_, _, _| {}).unwrap_err();
    assert!(matches!(err, BackupError::Cancelled));
    assert!(!file1.exists());
}

#[test]
fn test_progress_reports_step_labels() {
    let mut transaction = BackupTransaction::new();
    transaction.add("first", || Ok(()));
    transaction.add("second", || Ok(()));

    let mut labels = Vec::new();
    transaction
        .execute(&CancellationToken::new(), |_, total, label| {
            assert_eq!(total, 2);
            if !label.is_empty() {
                labels.push(label.to_string());
            }
        })
        .unwrap();
    assert_eq!(labels, vec!["first", "second"]);
}
