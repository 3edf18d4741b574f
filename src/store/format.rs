// On-disk index format
// Explicit length-prefixed binary layout with a version header, so schema
// evolution happens through explicit migration instead of implicit object
// graphs. Layout (v2, all integers little-endian):
//
//   magic "TSIX" | u32 version | i64 last_updated | u8 compression flag |
//   u32 entry count | entries
//
// Each entry: u32 identity length | identity bytes (UTF-8) |
//   u32 path count | per path: u32 length | path bytes (UTF-8)
//
// Version 1 lacked the compression flag; loading it upgrades in place.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::backup::error::BackupError;

pub const STORE_MAGIC: &[u8; 4] = b"TSIX";
pub const FORMAT_VERSION: u32 = 2;

/// Decoded contents of a store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDocument {
    pub version: u32,
    pub last_updated: i64,
    pub use_compression: bool,
    pub hash_index: BTreeMap<String, Vec<PathBuf>>,
}

/// Serialize a document at the current format version.
pub fn encode(document: &StoreDocument) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(STORE_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&document.last_updated.to_le_bytes());
    out.push(document.use_compression as u8);
    out.extend_from_slice(&(document.hash_index.len() as u32).to_le_bytes());
    for (identity, files) in &document.hash_index {
        write_str(&mut out, identity);
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
        for file in files {
            write_str(&mut out, &file.to_string_lossy());
        }
    }
    out
}

/// Parse a store file, upgrading older versions to the current one.
pub fn decode(bytes: &[u8], origin: &std::path::Path) -> Result<StoreDocument, BackupError> {
    let mut cursor = Cursor::new(bytes, origin);

    let magic = cursor.take(4)?;
    if magic != STORE_MAGIC {
        return Err(cursor.invalid("bad magic bytes"));
    }
    let version = cursor.read_u32()?;
    if version > FORMAT_VERSION {
        return Err(BackupError::VersionIncompatible {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    if version == 0 {
        return Err(cursor.invalid("version 0 is not a valid store version"));
    }

    let last_updated = cursor.read_i64()?;
    // Explicit migration: v1 predates the compression flag.
    let use_compression = if version >= 2 { cursor.read_u8()? != 0 } else { false };

    let entry_count = cursor.read_u32()? as usize;
    let mut hash_index = BTreeMap::new();
    for _ in 0..entry_count {
        let identity = cursor.read_string()?;
        let path_count = cursor.read_u32()? as usize;
        let mut files = Vec::with_capacity(path_count);
        for _ in 0..path_count {
            files.push(PathBuf::from(cursor.read_string()?));
        }
        hash_index.insert(identity, files);
    }

    Ok(StoreDocument {
        version: FORMAT_VERSION,
        last_updated,
        use_compression,
        hash_index,
    })
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
    origin: &'a std::path::Path,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], origin: &'a std::path::Path) -> Self {
        Self {
            bytes,
            position: 0,
            origin,
        }
    }

    fn invalid(&self, reason: &str) -> BackupError {
        BackupError::InvalidSnapshot {
            path: self.origin.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BackupError> {
        if self.position + len > self.bytes.len() {
            return Err(self.invalid("truncated store data"));
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, BackupError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, BackupError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, BackupError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String, BackupError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| self.invalid("store data contains invalid UTF-8"))
    }
}
