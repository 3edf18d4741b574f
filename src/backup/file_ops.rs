// Atomic file operations with verification
// Every mutation goes through a same-directory temp file plus a single
// atomic rename, so a destination is never left partially written

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::error::BackupError;
use crate::logging::warn;

/// Chunk size for streamed hashing.
pub const HASH_CHUNK_SIZE: usize = 65536;

/// Convert raw digest bytes to a lowercase hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Stream a file through SHA-256 in fixed-size chunks.
pub fn file_sha256(path: &Path) -> Result<String, BackupError> {
    let mut file = File::open(path).map_err(|e| {
        BackupError::from_io_error(e, "hashing", Some(path.to_path_buf()))
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(|e| {
            BackupError::from_io_error(e, "hashing", Some(path.to_path_buf()))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(bytes_to_hex(&hasher.finalize()))
}

/// Compare two files by size, then by content digest.
pub fn files_match(a: &Path, b: &Path) -> Result<bool, BackupError> {
    if !a.exists() || !b.exists() {
        return Ok(false);
    }
    let size_a = fs::metadata(a)?.len();
    let size_b = fs::metadata(b)?.len();
    if size_a != size_b {
        return Ok(false);
    }
    Ok(file_sha256(a)? == file_sha256(b)?)
}

/// Atomic file operations with optional post-copy verification.
pub struct SafeFileOps;

impl SafeFileOps {
    /// Copy `src` onto `dst` atomically.
    ///
    /// Creates `dst`'s parent directories if absent, writes to a temp file
    /// in the same directory, optionally verifies the temp content digest
    /// against the source, then renames onto `dst` in one step. Source
    /// timestamps are carried over afterwards. On any failure the temp
    /// file is removed and `dst` is untouched.
    pub fn atomic_copy(src: &Path, dst: &Path, verify: bool) -> Result<(), BackupError> {
        if !src.exists() {
            return Err(BackupError::from_io_error(
                io::Error::new(io::ErrorKind::NotFound, "source file does not exist"),
                "copying",
                Some(src.to_path_buf()),
            ));
        }
        let src_meta = fs::metadata(src).map_err(|e| {
            BackupError::from_io_error(e, "reading metadata of", Some(src.to_path_buf()))
        })?;

        let parent = dst.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| BackupError::DirectoryFailed {
            path: parent.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
            BackupError::from_io_error(e, "creating temp file in", Some(parent.to_path_buf()))
        })?;

        let mut reader = File::open(src).map_err(|e| {
            BackupError::from_io_error(e, "reading", Some(src.to_path_buf()))
        })?;
        io::copy(&mut reader, temp.as_file_mut()).map_err(|e| {
            BackupError::from_io_error(e, "copying", Some(src.to_path_buf()))
        })?;
        temp.as_file_mut().flush().map_err(|e| {
            BackupError::from_io_error(e, "flushing", Some(dst.to_path_buf()))
        })?;

        if verify && file_sha256(temp.path())? != file_sha256(src)? {
            // NamedTempFile removes itself on drop.
            return Err(BackupError::VerificationFailed {
                reason: format!("copied file does not match source: {}", src.display()),
            });
        }

        temp.persist(dst).map_err(|e| {
            BackupError::from_io_error(e.error, "renaming temp file onto", Some(dst.to_path_buf()))
        })?;

        Self::copy_times(&src_meta, dst);
        Ok(())
    }

    /// Move `src` to `dst` atomically: copy, then remove the source.
    ///
    /// If the source removal fails, the just-written destination is rolled
    /// back so the operation is all-or-nothing.
    pub fn atomic_move(src: &Path, dst: &Path, verify: bool) -> Result<(), BackupError> {
        Self::atomic_copy(src, dst, verify)?;
        if let Err(e) = fs::remove_file(src) {
            if let Err(cleanup) = fs::remove_file(dst) {
                warn!(
                    "could not roll back {} after failed source removal: {}",
                    dst.display(),
                    cleanup
                );
            }
            return Err(BackupError::from_io_error(
                e,
                "removing source file after copy",
                Some(src.to_path_buf()),
            ));
        }
        Ok(())
    }

    /// Rename a file within the target tree (relocate-in-place), creating
    /// the destination's parent directories if needed. Used instead of
    /// re-transferring identical content across a slow medium.
    pub fn rename(from: &Path, to: &Path) -> Result<(), BackupError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::DirectoryFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        fs::rename(from, to).map_err(|e| {
            BackupError::from_io_error(e, "renaming", Some(from.to_path_buf()))
        })
    }

    /// Soft-delete a file or directory, preferring the platform trash.
    /// Falls back to permanent deletion with a logged warning when the
    /// trash service is unavailable.
    pub fn soft_delete(path: &Path) -> Result<(), BackupError> {
        match trash::delete(path) {
            Ok(()) => Ok(()),
            Err(trash_err) => {
                warn!(
                    "could not send {} to trash ({}), deleting permanently",
                    path.display(),
                    trash_err
                );
                let result = if path.is_dir() {
                    fs::remove_dir_all(path)
                } else {
                    fs::remove_file(path)
                };
                result.map_err(|e| {
                    BackupError::from_io_error(e, "removing", Some(path.to_path_buf()))
                })
            }
        }
    }

    /// Carry modification and access times from the source metadata onto
    /// the destination. File creation time is only settable through
    /// platform-specific APIs (Windows); elsewhere this is the whole of
    /// what the filesystem lets us preserve, so failures are non-fatal.
    pub fn copy_times(src_meta: &fs::Metadata, dst: &Path) {
        let mtime = FileTime::from_last_modification_time(src_meta);
        let atime = FileTime::from_last_access_time(src_meta);
        if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
            warn!("could not set timestamps on {}: {}", dst.display(), e);
        }
    }
}
