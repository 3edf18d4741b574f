// Centralized error handling for the backup engine
// One context-rich error enum for fatal conditions, plus the tagged
// per-file Failure record accumulated on a mapping during a run

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Fatal errors for engine and snapshot-store operations.
#[derive(Debug)]
pub enum BackupError {
    /// File system errors with context
    SourceMissing { path: PathBuf },
    TargetMissing { path: PathBuf },
    Io { path: Option<PathBuf>, operation: String, source: io::Error },

    /// A mapping whose source and target trees contain each other would
    /// recurse into itself during a walk
    PathConflict { source: PathBuf, target: PathBuf },

    /// Identity computation errors
    HashFailed { path: PathBuf, reason: String },

    /// Post-run integrity verification errors
    VerificationFailed { reason: String },
    DirectoryFailed { path: PathBuf, reason: String },

    /// Snapshot store errors
    LockTimeout { path: PathBuf },
    ChecksumMismatch { path: PathBuf, expected: String, actual: String },
    InsufficientDiskSpace { required_mb: u64, available_mb: u64 },
    SnapshotTooLarge { size_mb: u64, limit_mb: u64 },
    VersionIncompatible { found: u32, supported: u32 },
    SnapshotNotFound { reason: String },
    InvalidSnapshot { path: PathBuf, reason: String },

    /// Cooperative cancellation observed between steps or chunks
    Cancelled,
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackupError::SourceMissing { path } => {
                write!(f, "Source directory does not exist: {}", path.display())
            }
            BackupError::TargetMissing { path } => {
                write!(f, "Target directory does not exist: {}", path.display())
            }
            BackupError::Io { path, operation, source } => {
                if let Some(p) = path {
                    write!(f, "I/O error while {} {}: {}", operation, p.display(), source)
                } else {
                    write!(f, "I/O error while {}: {}", operation, source)
                }
            }
            BackupError::PathConflict { source, target } => {
                write!(
                    f,
                    "Source and target trees overlap: {} / {}",
                    source.display(),
                    target.display()
                )
            }
            BackupError::HashFailed { path, reason } => {
                write!(f, "Failed to compute identity for {}: {}", path.display(), reason)
            }
            BackupError::VerificationFailed { reason } => {
                write!(f, "Integrity verification failed: {}", reason)
            }
            BackupError::DirectoryFailed { path, reason } => {
                write!(f, "Directory operation failed for {}: {}", path.display(), reason)
            }
            BackupError::LockTimeout { path } => {
                write!(f, "Timed out waiting for store lock: {}", path.display())
            }
            BackupError::ChecksumMismatch { path, expected, actual } => {
                write!(
                    f,
                    "Snapshot checksum mismatch for {}: expected {}, found {}",
                    path.display(),
                    expected,
                    actual
                )
            }
            BackupError::InsufficientDiskSpace { required_mb, available_mb } => {
                write!(
                    f,
                    "Insufficient disk space: required {}MB, available {}MB",
                    required_mb, available_mb
                )
            }
            BackupError::SnapshotTooLarge { size_mb, limit_mb } => {
                write!(f, "Snapshot size {}MB exceeds limit of {}MB", size_mb, limit_mb)
            }
            BackupError::VersionIncompatible { found, supported } => {
                write!(
                    f,
                    "Snapshot format version {} is newer than supported version {}",
                    found, supported
                )
            }
            BackupError::SnapshotNotFound { reason } => {
                write!(f, "No matching snapshot: {}", reason)
            }
            BackupError::InvalidSnapshot { path, reason } => {
                write!(f, "Invalid snapshot {}: {}", path.display(), reason)
            }
            BackupError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl BackupError {
    /// Create an Io error with context about the operation and optional path
    pub fn from_io_error(err: io::Error, operation: &str, path: Option<PathBuf>) -> Self {
        BackupError::Io {
            path,
            operation: operation.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        BackupError::from_io_error(err, "unknown operation", None)
    }
}

/// Category tag for a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MoveFile,
    RemoveSourceFile,
    RemoveSourceFileTargetMissing,
    RemoveStaleFile,
    RemoveStaleDirectory,
    BackupOperation,
    HashVerification,
    DirectoryOperation,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MoveFile => "move_file",
            FailureKind::RemoveSourceFile => "remove_source_file",
            FailureKind::RemoveSourceFileTargetMissing => "remove_source_file_target_missing",
            FailureKind::RemoveStaleFile => "remove_stale_file",
            FailureKind::RemoveStaleDirectory => "remove_stale_directory",
            FailureKind::BackupOperation => "backup_operation",
            FailureKind::HashVerification => "hash_verification",
            FailureKind::DirectoryOperation => "directory_operation",
        }
    }
}

/// One failed file operation. Failures accumulate on the mapping and are
/// surfaced in the end-of-run report; they never abort the run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub target: PathBuf,
    pub source: PathBuf,
}

impl Failure {
    pub fn new(
        kind: FailureKind,
        message: impl Into<String>,
        target: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            target: target.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            FailureKind::MoveFile => write!(
                f,
                "Failed to move {} to {}: {}",
                self.source.display(),
                self.target.display(),
                self.message
            ),
            FailureKind::RemoveSourceFile => {
                write!(f, "Failed to remove file {}: {}", self.source.display(), self.message)
            }
            FailureKind::RemoveSourceFileTargetMissing => write!(
                f,
                "Failed to remove file {} as could not verify target {}: {}",
                self.source.display(),
                self.target.display(),
                self.message
            ),
            FailureKind::RemoveStaleFile => {
                write!(f, "Failed to remove stale file {}: {}", self.target.display(), self.message)
            }
            FailureKind::RemoveStaleDirectory => write!(
                f,
                "Failed to remove stale directory {}: {}",
                self.target.display(),
                self.message
            ),
            FailureKind::BackupOperation => {
                write!(f, "Backup operation failed: {}", self.message)
            }
            FailureKind::HashVerification => {
                write!(f, "Verification failed: {}", self.message)
            }
            FailureKind::DirectoryOperation => {
                write!(f, "Directory operation failed for {}: {}", self.target.display(), self.message)
            }
        }
    }
}
