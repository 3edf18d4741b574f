// Snapshot store
// Persistent, lockable, versioned record of a source directory's last
// known hash index. Saves are atomic; prior versions rotate into a
// sibling directory as checksummed, optionally-compressed snapshots whose
// creation is resumable after interruption.

pub mod format;
pub mod lock;
pub mod metadata;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::backup::error::BackupError;
use crate::backup::file_ops;
use crate::cancel::CancellationToken;
use crate::logging::{info, warn};
use crate::progress::{ProgressCallback, ProgressTracker};

pub use format::{StoreDocument, FORMAT_VERSION};
pub use lock::{StoreLock, StoreLockGuard};
pub use metadata::{MetadataIndex, SnapshotMetadata};

/// Live index file, kept inside the source directory.
pub const STORE_FILE_NAME: &str = "treesync_index.bin";
/// Rotation directory holding prior snapshots and their metadata.
pub const SNAPSHOT_DIR_NAME: &str = ".treesync_snapshots";
/// Lock file guarding the store against concurrent access.
pub const LOCK_FILE_NAME: &str = ".treesync.lock";

pub const MAX_SNAPSHOTS: usize = 5;
pub const MIN_FREE_SPACE_MB: u64 = 100;
pub const MAX_SNAPSHOT_SIZE_MB: u64 = 1000;
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const COPY_CHUNK_SIZE: usize = 8192;
const TEMP_SUFFIX: &str = ".tmp";
const COMPRESSION_LEVEL: u32 = 6;

/// Which snapshot a restore should use.
#[derive(Debug, Clone)]
pub enum RestoreSelector {
    MostRecent,
    NearestTo(DateTime<Utc>),
    /// Most recent snapshot whose description contains the given text.
    Description(String),
    ExplicitPath(PathBuf),
}

/// Filters for `find()`.
#[derive(Debug, Clone, Default)]
pub struct FindCriteria {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub min_files: Option<usize>,
    pub max_files: Option<usize>,
}

/// One rotation entry with its metadata.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub size: u64,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Loaded,
    Saving,
    Restoring,
}

/// One source directory's snapshot store.
pub struct SnapshotStore {
    source_dir: PathBuf,
    filepath: PathBuf,
    snapshot_dir: PathBuf,
    lock: StoreLock,
    pub hash_index: BTreeMap<String, Vec<PathBuf>>,
    pub use_compression: bool,
    last_updated: i64,
    version: u32,
    progress: ProgressTracker,
    state: StoreState,
}

impl SnapshotStore {
    /// Load the store for a source directory, or initialize a fresh one
    /// when none exists (or `overwrite` is set). An unreadable live index
    /// is logged and replaced with a fresh store rather than aborting.
    pub fn load(source_dir: &Path, overwrite: bool) -> Result<Self, BackupError> {
        let source_dir = source_dir.to_path_buf();
        let filepath = source_dir.join(STORE_FILE_NAME);
        let snapshot_dir = source_dir.join(SNAPSHOT_DIR_NAME);
        let lock = StoreLock::new(source_dir.join(LOCK_FILE_NAME));

        let mut store = Self {
            source_dir,
            filepath: filepath.clone(),
            snapshot_dir,
            lock,
            hash_index: BTreeMap::new(),
            use_compression: false,
            last_updated: now_millis(),
            version: FORMAT_VERSION,
            progress: ProgressTracker::new(),
            state: StoreState::Loaded,
        };

        if filepath.exists() && !overwrite {
            let loaded = fs::read(&filepath)
                .map_err(|e| {
                    BackupError::from_io_error(e, "reading store file", Some(filepath.clone()))
                })
                .and_then(|bytes| format::decode(&bytes, &filepath));
            match loaded {
                Ok(document) => {
                    store.hash_index = document.hash_index;
                    store.last_updated = document.last_updated;
                    store.use_compression = document.use_compression;
                    store.version = document.version;
                }
                Err(e) => {
                    warn!("could not load snapshot store, starting fresh: {}", e);
                }
            }
        }
        Ok(store)
    }

    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = ProgressTracker::with_callback(callback);
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn store_path(&self) -> &Path {
        &self.filepath
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn last_updated(&self) -> i64 {
        self.last_updated
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Acquire the store lock for scoped external use. Operations like
    /// `save` and `restore` take the lock themselves; do not hold a guard
    /// across them.
    pub fn acquire(&self, timeout: Duration) -> Result<StoreLockGuard, BackupError> {
        self.lock.acquire(timeout)
    }

    /// Persist the live index atomically, rotating the previous store
    /// file into the snapshot directory first.
    pub fn save(&mut self, description: &str, cancel: &CancellationToken) -> Result<(), BackupError> {
        let _guard = self.lock.acquire(LOCK_TIMEOUT)?;
        debug_assert_eq!(self.state, StoreState::Loaded);
        self.state = StoreState::Saving;
        let result = self.save_locked(description, cancel);
        self.state = StoreState::Loaded;
        result
    }

    fn save_locked(&mut self, description: &str, cancel: &CancellationToken) -> Result<(), BackupError> {
        self.snapshot_current(description, cancel)?;
        self.last_updated = now_millis();
        self.write_live_file()
    }

    /// Restore the hash index from a rotation snapshot.
    ///
    /// The candidate's checksum is verified before anything is touched,
    /// the current store is snapshotted as a safety net, and snapshots
    /// with a newer format version are rejected. With `files` given, only
    /// those entries are replaced; everything else currently tracked is
    /// preserved.
    pub fn restore(
        &mut self,
        selector: RestoreSelector,
        files: Option<&[PathBuf]>,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let _guard = self.lock.acquire(LOCK_TIMEOUT)?;
        debug_assert_eq!(self.state, StoreState::Loaded);
        self.state = StoreState::Restoring;
        let result = self.restore_locked(selector, files, cancel);
        self.state = StoreState::Loaded;
        result
    }

    fn restore_locked(
        &mut self,
        selector: RestoreSelector,
        files: Option<&[PathBuf]>,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let candidates = self.list()?;
        let candidate = match selector {
            RestoreSelector::MostRecent => candidates.first().cloned().ok_or_else(|| {
                BackupError::SnapshotNotFound {
                    reason: "no snapshots available".to_string(),
                }
            })?,
            RestoreSelector::NearestTo(target) => candidates
                .iter()
                .min_by_key(|c| {
                    c.metadata
                        .parsed_timestamp()
                        .map(|t| (t - target).num_milliseconds().abs())
                        .unwrap_or(i64::MAX)
                })
                .cloned()
                .ok_or_else(|| BackupError::SnapshotNotFound {
                    reason: "no snapshots available".to_string(),
                })?,
            RestoreSelector::Description(text) => {
                let needle = text.to_lowercase();
                candidates
                    .iter()
                    .find(|c| c.metadata.description.to_lowercase().contains(&needle))
                    .cloned()
                    .ok_or_else(|| BackupError::SnapshotNotFound {
                        reason: format!("no snapshot matching description '{}'", text),
                    })?
            }
            RestoreSelector::ExplicitPath(path) => candidates
                .iter()
                .find(|c| c.path == path)
                .cloned()
                .ok_or_else(|| BackupError::SnapshotNotFound {
                    reason: format!("snapshot file not found: {}", path.display()),
                })?,
        };

        self.progress.start(candidate.size, "Verifying snapshot integrity...");
        if candidate.metadata.checksum.is_empty() {
            return Err(BackupError::InvalidSnapshot {
                path: candidate.path.clone(),
                reason: "no checksum recorded".to_string(),
            });
        }
        let actual = file_ops::file_sha256(&candidate.path)?;
        if actual != candidate.metadata.checksum {
            return Err(BackupError::ChecksumMismatch {
                path: candidate.path.clone(),
                expected: candidate.metadata.checksum.clone(),
                actual,
            });
        }

        self.progress.update(0, Some("Creating safety snapshot..."));
        self.snapshot_current("Auto-snapshot before restore", cancel)?;

        self.progress.update(0, Some("Loading snapshot data..."));
        let raw = fs::read(&candidate.path).map_err(|e| {
            BackupError::from_io_error(e, "reading snapshot", Some(candidate.path.clone()))
        })?;
        let bytes = if candidate.metadata.compressed {
            // A resumed snapshot is a sequence of xz streams.
            let mut decoded = Vec::new();
            XzDecoder::new_multi_decoder(&raw[..])
                .read_to_end(&mut decoded)
                .map_err(|e| BackupError::InvalidSnapshot {
                    path: candidate.path.clone(),
                    reason: format!("could not decompress: {}", e),
                })?;
            decoded
        } else {
            raw
        };
        let document = format::decode(&bytes, &candidate.path)?;

        match files {
            Some(files) => self.merge_partial(&candidate, &document, files)?,
            None => self.hash_index = document.hash_index,
        }
        self.version = FORMAT_VERSION;
        self.last_updated = now_millis();
        self.write_live_file()?;
        self.progress.update(candidate.size, Some("Restore complete"));
        info!("restored snapshot store from {}", candidate.path.display());
        Ok(())
    }

    /// Enumerate rotation snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>, BackupError> {
        let metadata_index = MetadataIndex::load(&self.snapshot_dir);
        let mut infos = Vec::new();
        for (_, path) in self.available_snapshots()? {
            let name = file_name_of(&path);
            let metadata = metadata_index.get(&name).cloned().unwrap_or_default();
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            infos.push(SnapshotInfo { path, size, metadata });
        }
        Ok(infos)
    }

    /// Enumerate snapshots matching the given criteria.
    pub fn find(&self, criteria: &FindCriteria) -> Result<Vec<SnapshotInfo>, BackupError> {
        let needle = criteria.description.as_ref().map(|d| d.to_lowercase());
        Ok(self
            .list()?
            .into_iter()
            .filter(|info| {
                let timestamp = info.metadata.parsed_timestamp();
                if let Some(start) = criteria.start_date {
                    if timestamp.map(|t| t < start).unwrap_or(true) {
                        return false;
                    }
                }
                if let Some(end) = criteria.end_date {
                    if timestamp.map(|t| t > end).unwrap_or(true) {
                        return false;
                    }
                }
                if let Some(needle) = &needle {
                    if !info.metadata.description.to_lowercase().contains(needle) {
                        return false;
                    }
                }
                if let Some(min) = criteria.min_files {
                    if info.metadata.file_count < min {
                        return false;
                    }
                }
                if let Some(max) = criteria.max_files {
                    if info.metadata.file_count > max {
                        return false;
                    }
                }
                true
            })
            .collect())
    }

    /// Empty the live index.
    pub fn clear(&mut self) {
        self.hash_index.clear();
        self.last_updated = now_millis();
    }

    /// Rotate the current store file into the snapshot directory as a
    /// checksummed snapshot.
    ///
    /// Free disk space is checked up front. If a previous attempt left a
    /// matching partial temp file, the copy resumes from its recorded byte
    /// offset instead of restarting. The cancellation token is polled
    /// between chunks; a cancelled write keeps its partial metadata so a
    /// later save can resume it.
    fn snapshot_current(
        &mut self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, BackupError> {
        if !self.filepath.exists() {
            return Ok(None);
        }
        self.check_disk_space()?;
        fs::create_dir_all(&self.snapshot_dir).map_err(|e| {
            BackupError::from_io_error(
                e,
                "creating snapshot directory",
                Some(self.snapshot_dir.clone()),
            )
        })?;
        let mut metadata_index = MetadataIndex::load(&self.snapshot_dir);

        let source_size = fs::metadata(&self.filepath)
            .map_err(|e| {
                BackupError::from_io_error(e, "reading metadata of", Some(self.filepath.clone()))
            })?
            .len();

        let (temp_path, final_name, start_pos) =
            match self.find_partial(&metadata_index, source_size) {
                Some((temp_path, partial)) => {
                    self.progress
                        .start(source_size, "Resuming interrupted snapshot...");
                    let final_name = file_name_of(&temp_path)
                        .trim_end_matches(TEMP_SUFFIX)
                        .to_string();
                    (temp_path, final_name, partial.bytes_written)
                }
                None => {
                    self.progress.start(source_size, "Creating snapshot...");
                    let base = format!(
                        "{}.{}",
                        STORE_FILE_NAME,
                        Local::now().format("%Y%m%d_%H%M%S_%3f")
                    );
                    // Uniquify: back-to-back rotations can land in the
                    // same millisecond and must not overwrite each other.
                    let mut final_name = base.clone();
                    let mut counter = 1;
                    while self.snapshot_dir.join(&final_name).exists() {
                        final_name = format!("{}_{}", base, counter);
                        counter += 1;
                    }
                    let temp_path = self
                        .snapshot_dir
                        .join(format!("{}{}", final_name, TEMP_SUFFIX));
                    (temp_path, final_name, 0)
                }
            };
        let temp_name = file_name_of(&temp_path);

        // The metadata describes the file being rotated, which holds the
        // previously saved index, not the in-memory one.
        let rotated_index = fs::read(&self.filepath)
            .ok()
            .and_then(|bytes| format::decode(&bytes, &self.filepath).ok())
            .map(|document| document.hash_index);
        let tracked_files: BTreeSet<String> = rotated_index
            .as_ref()
            .unwrap_or(&self.hash_index)
            .values()
            .flatten()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut snapshot_meta = SnapshotMetadata::new(description, tracked_files.len());
        snapshot_meta.files = tracked_files;
        snapshot_meta.compressed = self.use_compression;
        snapshot_meta.partial = true;
        snapshot_meta.bytes_written = start_pos;

        let mut source = File::open(&self.filepath).map_err(|e| {
            BackupError::from_io_error(e, "reading store file", Some(self.filepath.clone()))
        })?;
        source.seek(SeekFrom::Start(start_pos)).map_err(|e| {
            BackupError::from_io_error(e, "seeking in", Some(self.filepath.clone()))
        })?;
        let destination = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&temp_path)
            .map_err(|e| {
                BackupError::from_io_error(e, "opening snapshot temp file", Some(temp_path.clone()))
            })?;

        let write_result = if self.use_compression {
            // Every write session is its own xz stream; the multi-stream
            // decoder reassembles them on restore.
            self.copy_chunks(
                &mut source,
                XzEncoder::new(destination, COMPRESSION_LEVEL),
                start_pos,
                &mut snapshot_meta,
                &mut metadata_index,
                &temp_name,
                cancel,
                |encoder| encoder.finish().map(|_| ()),
            )
        } else {
            self.copy_chunks(
                &mut source,
                destination,
                start_pos,
                &mut snapshot_meta,
                &mut metadata_index,
                &temp_name,
                cancel,
                |file| file.sync_all(),
            )
        };
        write_result?;

        let snapshot_size = fs::metadata(&temp_path)
            .map_err(|e| {
                BackupError::from_io_error(e, "reading metadata of", Some(temp_path.clone()))
            })?
            .len();
        let size_mb = snapshot_size / (1024 * 1024);
        if size_mb > MAX_SNAPSHOT_SIZE_MB {
            let _ = fs::remove_file(&temp_path);
            metadata_index.remove(&temp_name);
            metadata_index.save()?;
            return Err(BackupError::SnapshotTooLarge {
                size_mb,
                limit_mb: MAX_SNAPSHOT_SIZE_MB,
            });
        }

        snapshot_meta.partial = false;
        snapshot_meta.checksum = file_ops::file_sha256(&temp_path)?;
        let final_path = self.snapshot_dir.join(&final_name);
        fs::rename(&temp_path, &final_path).map_err(|e| {
            BackupError::from_io_error(e, "finalizing snapshot", Some(final_path.clone()))
        })?;
        metadata_index.remove(&temp_name);
        metadata_index.insert(final_name, snapshot_meta);
        metadata_index.save()?;

        self.prune_old(&mut metadata_index)?;
        self.progress.update(source_size, Some("Snapshot complete"));
        Ok(Some(final_path))
    }

    /// Chunked copy loop shared by the plain and compressing writers.
    /// Metadata and progress are updated after every chunk so an
    /// interruption can resume at the last completed chunk boundary.
    #[allow(clippy::too_many_arguments)]
    fn copy_chunks<W: Write>(
        &mut self,
        source: &mut File,
        mut writer: W,
        start_pos: u64,
        snapshot_meta: &mut SnapshotMetadata,
        metadata_index: &mut MetadataIndex,
        temp_name: &str,
        cancel: &CancellationToken,
        finish: impl FnOnce(W) -> std::io::Result<()>,
    ) -> Result<(), BackupError> {
        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        let mut copied = start_pos;
        loop {
            if cancel.is_cancelled() {
                // Close out the current stream so the partial file stays
                // decodable, then leave the partial metadata for resume.
                let _ = finish(writer);
                metadata_index.insert(temp_name.to_string(), snapshot_meta.clone());
                metadata_index.save()?;
                return Err(BackupError::Cancelled);
            }
            let read = source.read(&mut buffer).map_err(|e| {
                BackupError::from_io_error(e, "reading store file", Some(self.filepath.clone()))
            })?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).map_err(|e| {
                BackupError::from_io_error(e, "writing snapshot chunk", None)
            })?;
            copied += read as u64;
            snapshot_meta.bytes_written = copied;
            metadata_index.insert(temp_name.to_string(), snapshot_meta.clone());
            metadata_index.save()?;
            self.progress.update(copied, None);
        }
        finish(writer)
            .map_err(|e| BackupError::from_io_error(e, "finalizing snapshot stream", None))
    }

    /// Find a resumable partial temp file compatible with the current
    /// store file and compression setting.
    fn find_partial(
        &self,
        metadata_index: &MetadataIndex,
        source_size: u64,
    ) -> Option<(PathBuf, SnapshotMetadata)> {
        for (name, meta) in metadata_index.entries() {
            if !meta.partial || !name.ends_with(TEMP_SUFFIX) || !name.starts_with(STORE_FILE_NAME) {
                continue;
            }
            if meta.compressed != self.use_compression {
                continue;
            }
            if meta.bytes_written > source_size {
                continue;
            }
            let path = self.snapshot_dir.join(name);
            if path.exists() {
                return Some((path, meta.clone()));
            }
        }
        None
    }

    /// Remove rotation entries beyond the retention count, oldest first.
    fn prune_old(&self, metadata_index: &mut MetadataIndex) -> Result<(), BackupError> {
        let snapshots = self.available_snapshots()?;
        let mut pruned = false;
        for (_, path) in snapshots.into_iter().skip(MAX_SNAPSHOTS) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    metadata_index.remove(&file_name_of(&path));
                    pruned = true;
                }
                Err(e) => warn!("could not remove old snapshot {}: {}", path.display(), e),
            }
        }
        if pruned {
            metadata_index.save()?;
        }
        Ok(())
    }

    /// Snapshot files on disk, newest first by modification time.
    fn available_snapshots(&self) -> Result<Vec<(SystemTime, PathBuf)>, BackupError> {
        if !self.snapshot_dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        let entries = fs::read_dir(&self.snapshot_dir).map_err(|e| {
            BackupError::from_io_error(
                e,
                "reading snapshot directory",
                Some(self.snapshot_dir.clone()),
            )
        })?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("cannot read snapshot directory entry: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(STORE_FILE_NAME) || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            snapshots.push((modified, entry.path()));
        }
        // Names embed a millisecond timestamp; tie-break on them when
        // modification times have coarse resolution.
        snapshots.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(snapshots)
    }

    fn merge_partial(
        &mut self,
        candidate: &SnapshotInfo,
        document: &StoreDocument,
        files: &[PathBuf],
    ) -> Result<(), BackupError> {
        let requested: BTreeSet<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let unknown: Vec<String> = requested
            .iter()
            .filter(|f| !candidate.metadata.files.contains(*f))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(BackupError::InvalidSnapshot {
                path: candidate.path.clone(),
                reason: format!("files not found in snapshot: {}", unknown.join(", ")),
            });
        }

        let mut merged: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (identity, snapshot_files) in &document.hash_index {
            let restored: Vec<PathBuf> = snapshot_files
                .iter()
                .filter(|f| requested.contains(&f.to_string_lossy().into_owned()))
                .cloned()
                .collect();
            if !restored.is_empty() {
                merged.insert(identity.clone(), restored);
            }
        }
        for (identity, current_files) in &self.hash_index {
            let kept: Vec<PathBuf> = current_files
                .iter()
                .filter(|f| !requested.contains(&f.to_string_lossy().into_owned()))
                .cloned()
                .collect();
            if kept.is_empty() {
                continue;
            }
            let bucket = merged.entry(identity.clone()).or_default();
            for file in kept {
                if !bucket.contains(&file) {
                    bucket.push(file);
                }
            }
        }
        self.hash_index = merged;
        Ok(())
    }

    fn write_live_file(&self) -> Result<(), BackupError> {
        let document = StoreDocument {
            version: FORMAT_VERSION,
            last_updated: self.last_updated,
            use_compression: self.use_compression,
            hash_index: self.hash_index.clone(),
        };
        let bytes = format::encode(&document);
        let temp_path = PathBuf::from(format!("{}{}", self.filepath.display(), TEMP_SUFFIX));
        let result = (|| -> Result<(), BackupError> {
            let mut file = File::create(&temp_path).map_err(|e| {
                BackupError::from_io_error(e, "creating", Some(temp_path.clone()))
            })?;
            file.write_all(&bytes)
                .and_then(|_| file.sync_all())
                .map_err(|e| BackupError::from_io_error(e, "writing", Some(temp_path.clone())))?;
            fs::rename(&temp_path, &self.filepath).map_err(|e| {
                BackupError::from_io_error(e, "renaming onto", Some(self.filepath.clone()))
            })
        })();
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn check_disk_space(&self) -> Result<(), BackupError> {
        let available = fs2::available_space(&self.source_dir).map_err(|e| {
            BackupError::from_io_error(e, "checking disk space in", Some(self.source_dir.clone()))
        })?;
        let available_mb = available / (1024 * 1024);
        if available_mb < MIN_FREE_SPACE_MB {
            return Err(BackupError::InsufficientDiskSpace {
                required_mb: MIN_FREE_SPACE_MB,
                available_mb,
            });
        }
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
