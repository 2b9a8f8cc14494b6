//! Entry metadata, flag sets and the lazy data-access contract.

use crate::codec::CompressionMethod;
use crate::error::{PakError, Result};
use crate::formats::{FormatAdapter, FormatKind};
use bitflags::bitflags;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

bitflags! {
    /// Per-entry storage policy, persisted in PAK tables
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        const FILE = 1 << 0;
        const HEADER_CRYPTED = 1 << 1;
        const DATA_CRYPTED = 1 << 2;
        const REMOVE_FILE = 1 << 3;
        const EDITOR_CRYPTED = 1 << 4;
        const ENCRYPT = 1 << 5;
        const DECRYPT = 1 << 6;
        const FILE_NAME_RENAMED = 1 << 7;
        const CUSTOM_COMPRESSED = 1 << 8;
        const RAW_DATA_FILE = 1 << 9;
        const LZSS = 1 << 10;
    }
}

impl EntryFlags {
    /// Directories carry no `FILE` bit
    pub const DIRECTORY: Self = Self::empty();

    /// Bits that change how the stored payload is encoded
    pub const PAYLOAD_ENCODING: Self = Self::DATA_CRYPTED
        .union(Self::EDITOR_CRYPTED)
        .union(Self::CUSTOM_COMPRESSED)
        .union(Self::RAW_DATA_FILE)
        .union(Self::LZSS);

    /// Bits that only describe pending edits and are dropped on save
    pub const TRANSIENT: Self = Self::REMOVE_FILE
        .union(Self::ENCRYPT)
        .union(Self::DECRYPT)
        .union(Self::FILE_NAME_RENAMED);

    pub fn is_directory(self) -> bool {
        !self.contains(Self::FILE)
    }

    /// `FILE | HEADER_CRYPTED`
    pub fn is_encrypted_file(self) -> bool {
        self.contains(Self::FILE | Self::HEADER_CRYPTED)
    }

    /// Payload sealed with either the data or the editor key
    pub fn is_data_encrypted(self) -> bool {
        self.intersects(Self::DATA_CRYPTED | Self::EDITOR_CRYPTED)
    }
}

bitflags! {
    /// Pending edits against the on-disk baseline
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModFlags: u32 {
        const REMOVED = 1 << 0;
        const ADDED = 1 << 1;
        const MERGE_SOURCE = 1 << 2;
        const FILE_NAME_RENAMED = 1 << 3;
        const ENCRYPT = 1 << 4;
        const DECRYPT = 1 << 5;
        /// Store raw, never compress
        const SPECIAL = 1 << 6;
        /// Keep on-disk bytes verbatim, even under a forced repack
        const DO_NOT_REWRITE = 1 << 7;
        /// Storage flags changed; the payload must be re-encoded
        const REFLAGGED = 1 << 8;
    }
}

/// Normalize an archive path: forward slashes, no root, no `.` or empty
/// components. `..` is rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(PakError::PathError(format!(
                    "parent traversal not allowed: {}",
                    path
                )))
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PakError::PathError(format!("empty path: {:?}", path)));
    }
    Ok(parts.join("/"))
}

/// One logical file or directory inside a container
#[derive(Clone)]
pub struct Entry {
    pub path: String,
    /// Offset of the stored payload in the owning stream
    pub offset: u64,
    /// Bytes occupied in the owning stream
    pub stored_size: u64,
    /// Size of the compressed stream, `-1` when not independently compressed
    pub compressed_size: i64,
    pub decompressed_size: u64,
    /// CRC-32 of the decompressed bytes, when the format records one
    pub crc32: Option<u32>,
    pub flags: EntryFlags,
    pub modifications: ModFlags,
    /// File on disk staged into the container, not yet embedded
    pub external_source: Option<PathBuf>,
    pub(crate) staged: Option<Arc<[u8]>>,
    pub(crate) origin: Option<Arc<dyn FormatAdapter>>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("stored_size", &self.stored_size)
            .field("compressed_size", &self.compressed_size)
            .field("decompressed_size", &self.decompressed_size)
            .field("flags", &self.flags)
            .field("modifications", &self.modifications)
            .field("external_source", &self.external_source)
            .field("staged", &self.staged.as_ref().map(|s| s.len()))
            .field("origin", &self.origin_kind())
            .finish()
    }
}

impl Entry {
    /// Uncompressed file payload at `(offset, length)` of its stream
    pub fn stored_file(path: String, offset: u64, length: u64) -> Self {
        Self {
            path,
            offset,
            stored_size: length,
            compressed_size: -1,
            decompressed_size: length,
            crc32: None,
            flags: EntryFlags::FILE,
            modifications: ModFlags::empty(),
            external_source: None,
            staged: None,
            origin: None,
        }
    }

    pub fn directory(path: String) -> Self {
        Self {
            flags: EntryFlags::DIRECTORY,
            ..Self::stored_file(path, 0, 0)
        }
    }

    /// New entry holding `data` in memory until the next save
    pub fn staged(path: String, data: impl Into<Arc<[u8]>>) -> Self {
        let data: Arc<[u8]> = data.into();
        let mut entry = Self::stored_file(path, 0, data.len() as u64);
        entry.crc32 = Some(crc32fast::hash(&data));
        entry.modifications = ModFlags::ADDED;
        entry.staged = Some(data);
        entry
    }

    /// New entry backed by a file on disk until the next save
    pub fn external(path: String, source: &Path) -> Result<Self> {
        let meta = std::fs::metadata(source)?;
        if !meta.is_file() {
            return Err(PakError::PathError(format!(
                "not a regular file: {}",
                source.display()
            )));
        }
        let mut entry = Self::stored_file(path, 0, meta.len());
        entry.modifications = ModFlags::ADDED;
        entry.external_source = Some(source.to_path_buf());
        Ok(entry)
    }

    pub fn is_directory(&self) -> bool {
        self.flags.is_directory()
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    pub fn codec(&self) -> CompressionMethod {
        CompressionMethod::from_flags(self.flags, self.compressed_size)
    }

    /// Format of the archive whose stream backs this entry
    pub fn origin_kind(&self) -> Option<FormatKind> {
        self.origin.as_ref().map(|o| o.kind())
    }

    /// True when the payload lives outside any archive stream
    pub fn is_detached(&self) -> bool {
        self.staged.is_some() || self.external_source.is_some() || self.origin.is_none()
    }

    pub(crate) fn bind(&mut self, origin: Arc<dyn FormatAdapter>) {
        self.origin = Some(origin);
    }

    /// The entry's original bytes
    pub fn decompressed_data(&self) -> Result<Vec<u8>> {
        if self.is_directory() {
            return Err(PakError::UnsupportedOperation(format!(
                "{} is a directory",
                self.path
            )));
        }
        if let Some(data) = &self.staged {
            return Ok(data.to_vec());
        }
        if let Some(source) = &self.external_source {
            return Ok(std::fs::read(source)?);
        }
        match &self.origin {
            Some(origin) => origin.decompressed_data(self),
            None => Err(PakError::EntryNotFound(format!("{} has no data source", self.path))),
        }
    }

    /// The compressed stream as the owning format defines it
    pub fn compressed_data(&self) -> Result<Vec<u8>> {
        if self.staged.is_some() || self.external_source.is_some() {
            return Err(PakError::UnsupportedOperation(format!(
                "{} is staged and has no compressed form yet",
                self.path
            )));
        }
        match &self.origin {
            Some(origin) => origin.compressed_data(self),
            None => Err(PakError::EntryNotFound(format!("{} has no data source", self.path))),
        }
    }

    /// Write the stored bytes verbatim; staged entries write their plain bytes
    pub fn copy_to(&self, out: &mut dyn Write) -> Result<u64> {
        if self.staged.is_some() || self.external_source.is_some() {
            let data = self.decompressed_data()?;
            out.write_all(&data)?;
            return Ok(data.len() as u64);
        }
        match &self.origin {
            Some(origin) => origin.copy_to(self, out),
            None => Err(PakError::EntryNotFound(format!("{} has no data source", self.path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a\\b\\c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize_path("/root//x/./y").unwrap(), "root/x/y");
        assert_eq!(normalize_path("Mixed/Case.TXT").unwrap(), "Mixed/Case.TXT");
        assert!(normalize_path("../etc/passwd").is_err());
        assert!(normalize_path("a/../../b").is_err());
        assert!(normalize_path("//").is_err());
    }

    #[test]
    fn test_flag_predicates() {
        assert!(EntryFlags::DIRECTORY.is_directory());
        assert!(!EntryFlags::FILE.is_directory());
        assert!((EntryFlags::FILE | EntryFlags::HEADER_CRYPTED).is_encrypted_file());
        assert!(!EntryFlags::HEADER_CRYPTED.is_encrypted_file());
        assert!(EntryFlags::EDITOR_CRYPTED.is_data_encrypted());
        assert!(!EntryFlags::FILE.is_data_encrypted());
    }

    #[test]
    fn test_staged_entry_reads_back() {
        let entry = Entry::staged("x.bin".to_string(), vec![1u8, 2, 3]);
        assert_eq!(entry.decompressed_data().unwrap(), vec![1, 2, 3]);
        assert_eq!(entry.decompressed_data().unwrap(), vec![1, 2, 3]);
        assert!(entry.modifications.contains(ModFlags::ADDED));
        assert_eq!(entry.crc32, Some(crc32fast::hash(&[1, 2, 3])));
        assert!(matches!(
            entry.compressed_data(),
            Err(PakError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_directory_has_no_data() {
        let dir = Entry::directory("assets".to_string());
        assert!(dir.is_directory());
        assert!(dir.decompressed_data().is_err());
    }
}
