// Snapshot metadata
// One record per rotation snapshot, persisted twice (primary + backup
// copy) so corruption of one file is recoverable from the other

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::error::BackupError;
use crate::logging::warn;

pub const METADATA_FILE: &str = "snapshot_metadata.json";
pub const METADATA_BACKUP_FILE: &str = "snapshot_metadata.backup.json";
const METADATA_TEMP_SUFFIX: &str = ".metadata.tmp";

/// Metadata describing one snapshot of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Creation time, RFC 3339.
    pub timestamp: String,
    pub description: String,
    pub file_count: usize,
    /// SHA-256 of the snapshot file once complete; empty while partial.
    pub checksum: String,
    pub version: u32,
    /// Files tracked by the snapshotted index, for partial restores.
    #[serde(default)]
    pub files: BTreeSet<String>,
    #[serde(default)]
    pub compressed: bool,
    /// True while the snapshot file is still being written.
    #[serde(default)]
    pub partial: bool,
    /// Source bytes consumed so far, for resuming an interrupted write.
    #[serde(default)]
    pub bytes_written: u64,
}

impl SnapshotMetadata {
    pub fn new(description: impl Into<String>, file_count: usize) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            description: description.into(),
            file_count,
            checksum: String::new(),
            version: super::format::FORMAT_VERSION,
            files: BTreeSet::new(),
            compressed: false,
            partial: false,
            bytes_written: 0,
        }
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self::new("", 0)
    }
}

/// All snapshot metadata for one rotation directory, keyed by snapshot
/// file name.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    dir: PathBuf,
    entries: BTreeMap<String, SnapshotMetadata>,
}

impl MetadataIndex {
    /// Load the metadata index, falling back to the backup copy when the
    /// primary is corrupt (and repairing the primary from it). Both files
    /// corrupt or absent yields an empty index.
    pub fn load(dir: &Path) -> Self {
        let primary = dir.join(METADATA_FILE);
        let backup = dir.join(METADATA_BACKUP_FILE);

        if let Some(entries) = read_entries(&primary) {
            return Self {
                dir: dir.to_path_buf(),
                entries,
            };
        }
        if let Some(entries) = read_entries(&backup) {
            warn!(
                "primary snapshot metadata unreadable, recovered from backup copy in {}",
                dir.display()
            );
            let index = Self {
                dir: dir.to_path_buf(),
                entries,
            };
            // Repair the primary from the recovered contents.
            if let Err(e) = index.save() {
                warn!("could not repair snapshot metadata: {}", e);
            }
            return index;
        }
        Self {
            dir: dir.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotMetadata> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, metadata: SnapshotMetadata) {
        self.entries.insert(name.into(), metadata);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &SnapshotMetadata)> {
        self.entries.iter()
    }

    /// Write the index atomically, primary first, then the backup copy.
    pub fn save(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            BackupError::from_io_error(e, "creating snapshot directory", Some(self.dir.clone()))
        })?;
        let json = serde_json::to_vec_pretty(&self.entries).map_err(|e| {
            BackupError::InvalidSnapshot {
                path: self.dir.join(METADATA_FILE),
                reason: format!("could not serialize metadata: {}", e),
            }
        })?;
        atomic_write(&self.dir.join(METADATA_FILE), &json)?;
        atomic_write(&self.dir.join(METADATA_BACKUP_FILE), &json)?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Option<BTreeMap<String, SnapshotMetadata>> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write bytes via a temp file, fsync, and a single atomic rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), BackupError> {
    let temp_path = PathBuf::from(format!("{}{}", path.display(), METADATA_TEMP_SUFFIX));
    let result = (|| -> Result<(), BackupError> {
        let mut file = File::create(&temp_path).map_err(|e| {
            BackupError::from_io_error(e, "creating", Some(temp_path.clone()))
        })?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| BackupError::from_io_error(e, "writing", Some(temp_path.clone())))?;
        fs::rename(&temp_path, path)
            .map_err(|e| BackupError::from_io_error(e, "renaming onto", Some(path.to_path_buf())))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
