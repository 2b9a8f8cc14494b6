use crate::archive::end_record::EndRecord;
use crate::archive::format::{
    check_path_len, write_directory_record, FileHeader, FileRecord, HEADER_SIZE,
};
use crate::archive::local_entry::LocalEntryHeader;
use crate::codec::{compress_if_smaller, CompressionMethod};
use crate::config::PakConfig;
use crate::crypto::{self, KeySet, SALT_SIZE};
use crate::entry::{normalize_path, EntryFlags};
use crate::error::Result;
use crate::formats::RECORD_END;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// A payload encoded for storage: compressed, then sealed
#[derive(Debug, Clone)]
pub struct StoredPayload {
    pub bytes: Vec<u8>,
    pub flags: EntryFlags,
    pub compressed_size: i64,
    pub decompressed_size: u64,
    pub crc32: u32,
}

/// Encode plain bytes for a PAK entry.
///
/// Codec: stored when `force_raw` or `RAW_DATA_FILE`, LZSS when requested by
/// flag, otherwise chosen from path and size. Compression is kept only when
/// it shrinks the payload. Sealing follows `EDITOR_CRYPTED` / `DATA_CRYPTED`.
pub fn encode_payload(
    path: &str,
    data: &[u8],
    flags: EntryFlags,
    force_raw: bool,
    config: &PakConfig,
    keys: &KeySet,
) -> Result<StoredPayload> {
    let requested = if force_raw || flags.contains(EntryFlags::RAW_DATA_FILE) {
        CompressionMethod::None
    } else if flags.contains(EntryFlags::LZSS) {
        CompressionMethod::Lzss
    } else {
        CompressionMethod::choose_for_file(path, data.len(), config.min_compression_size)
    };

    let (compressed, method) = compress_if_smaller(data, requested, config.zstd_level)?;
    let compressed_size = match method {
        CompressionMethod::None => -1,
        _ => compressed.len() as i64,
    };

    let flags = (flags
        - EntryFlags::TRANSIENT
        - EntryFlags::CUSTOM_COMPRESSED
        - EntryFlags::LZSS)
        | method.flags()
        | EntryFlags::FILE;

    // Compress FIRST, then encrypt
    let bytes = if flags.contains(EntryFlags::EDITOR_CRYPTED) {
        crypto::seal(keys.editor_key(path)?, &compressed)?
    } else if flags.contains(EntryFlags::DATA_CRYPTED) {
        crypto::seal(keys.data_key(path)?, &compressed)?
    } else {
        compressed
    };

    Ok(StoredPayload {
        bytes,
        flags,
        compressed_size,
        decompressed_size: data.len() as u64,
        crc32: crc32fast::hash(data),
    })
}

/// Encode a path for a table or local header
pub fn encode_path(path: &str, flags: EntryFlags, keys: &KeySet) -> Result<Vec<u8>> {
    let bytes = if flags.contains(EntryFlags::HEADER_CRYPTED) {
        crypto::seal(keys.data_key(path)?, path.as_bytes())?
    } else {
        path.as_bytes().to_vec()
    };
    check_path_len(&bytes)?;
    Ok(bytes)
}

/// Check that a table record for `path` can be written, without writing it
pub fn check_record_path(path: &str, flags: EntryFlags, keys: &KeySet) -> Result<()> {
    if flags.is_directory() {
        return check_path_len(path.as_bytes());
    }
    encode_path(path, (flags - EntryFlags::TRANSIENT) | EntryFlags::FILE, keys).map(drop)
}

enum TableRecord {
    File(FileRecord),
    Directory(String),
}

/// Writer for PAK archives.
///
/// Payloads are appended as they are added; the entry table, end record and
/// final header are written by [`PakWriter::finalize`].
pub struct PakWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    records: Vec<TableRecord>,
    current_offset: u64,
    salt: Option<[u8; SALT_SIZE]>,
    keys: KeySet,
    config: PakConfig,
}

impl PakWriter<File> {
    /// Create (or truncate) an archive file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(file)
    }
}

impl<W: Write + Seek> PakWriter<W> {
    /// Start a new archive at the beginning of `inner`
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = BufWriter::new(inner);
        writer.seek(SeekFrom::Start(0))?;

        // Placeholder header, rewritten at finalization
        FileHeader::new().write_to(&mut writer)?;

        Ok(Self {
            writer,
            records: Vec::new(),
            current_offset: HEADER_SIZE as u64,
            salt: None,
            keys: KeySet::default(),
            config: PakConfig::default(),
        })
    }

    /// Continue an existing archive, appending payloads at `append_at`.
    ///
    /// Everything from `append_at` onwards is overwritten.
    pub fn resume(inner: W, append_at: u64) -> Result<Self> {
        let mut writer = BufWriter::new(inner);
        writer.seek(SeekFrom::Start(append_at))?;
        Ok(Self {
            writer,
            records: Vec::new(),
            current_offset: append_at,
            salt: None,
            keys: KeySet::default(),
            config: PakConfig::default(),
        })
    }

    /// Keys and salt used for sealed entries and headers
    pub fn with_keys(mut self, salt: Option<[u8; SALT_SIZE]>, keys: KeySet) -> Self {
        self.salt = salt;
        self.keys = keys;
        self
    }

    /// Set a passphrase, generating a fresh salt
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        let salt = crypto::random_salt();
        self.keys = KeySet::derive(Some(passphrase), None, &salt);
        self.salt = Some(salt);
        self
    }

    pub fn with_config(mut self, config: PakConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn config(&self) -> &PakConfig {
        &self.config
    }

    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Add a file with automatic codec selection
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<u64> {
        self.add_file_with_flags(path, data, EntryFlags::FILE)
    }

    /// Add a file with explicit flags (codec and crypto bits honored)
    pub fn add_file_with_flags(&mut self, path: &str, data: &[u8], flags: EntryFlags) -> Result<u64> {
        let path = normalize_path(path)?;
        let payload = encode_payload(&path, data, flags, false, &self.config, &self.keys)?;
        self.add_stored(&path, &payload)
    }

    /// Append an already-encoded payload and its table record
    pub fn add_stored(&mut self, path: &str, payload: &StoredPayload) -> Result<u64> {
        let offset = self.write_payload(
            path,
            payload.flags,
            payload.decompressed_size,
            payload.compressed_size,
            payload.crc32,
            &payload.bytes,
        )?;
        self.push_file_record(
            path,
            payload.flags,
            offset,
            payload.bytes.len() as u64,
            payload.compressed_size,
            payload.decompressed_size,
            payload.crc32,
        )?;
        Ok(offset)
    }

    /// Write a local header and payload, returning the payload offset.
    ///
    /// No table record is added; see [`PakWriter::push_file_record`].
    pub fn write_payload(
        &mut self,
        path: &str,
        flags: EntryFlags,
        decompressed_size: u64,
        compressed_size: i64,
        crc32: u32,
        bytes: &[u8],
    ) -> Result<u64> {
        let local = LocalEntryHeader {
            decompressed_size,
            stored_size: bytes.len() as u64,
            compressed_size,
            crc32,
            flags,
            path_bytes: encode_path(path, flags, &self.keys)?,
        };
        self.current_offset += local.write_to(&mut self.writer)? as u64;

        let offset = self.current_offset;
        self.writer.write_all(bytes)?;
        self.current_offset += bytes.len() as u64;
        Ok(offset)
    }

    /// Add a table record for a payload already in the archive
    #[allow(clippy::too_many_arguments)]
    pub fn push_file_record(
        &mut self,
        path: &str,
        flags: EntryFlags,
        offset: u64,
        stored_size: u64,
        compressed_size: i64,
        decompressed_size: u64,
        crc32: u32,
    ) -> Result<()> {
        let flags = (flags - EntryFlags::TRANSIENT) | EntryFlags::FILE;
        self.records.push(TableRecord::File(FileRecord {
            flags,
            path_bytes: encode_path(path, flags, &self.keys)?,
            offset,
            stored_size,
            compressed_size,
            decompressed_size,
            crc32,
        }));
        Ok(())
    }

    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        self.records.push(TableRecord::Directory(normalize_path(path)?));
        Ok(())
    }

    /// Write the entry table, end record and final header.
    ///
    /// Returns the inner writer and the archive length; callers patching an
    /// existing file truncate it to that length.
    pub fn finalize(mut self) -> Result<(W, u64)> {
        let table_offset = self.current_offset;

        let mut table = Vec::new();
        for record in &self.records {
            match record {
                TableRecord::File(file) => file.write_to(&mut table)?,
                TableRecord::Directory(path) => write_directory_record(&mut table, path)?,
            };
        }
        table.push(RECORD_END);
        self.writer.write_all(&table)?;

        let header = FileHeader {
            table_offset,
            table_size: table.len() as u64,
            entry_count: self.records.len() as u32,
            ..FileHeader::new()
        }
        .with_salt(self.salt);

        let end_record = EndRecord::for_header(&header, crc32fast::hash(&table));
        let end_len = end_record.write_to(&mut self.writer)? as u64;
        let archive_len = table_offset + table.len() as u64 + end_len;

        self.writer.flush()?;
        let mut inner = self.writer.into_inner().map_err(|e| e.into_error())?;

        inner.seek(SeekFrom::Start(0))?;
        header.write_to(&mut inner)?;
        inner.flush()?;

        tracing::debug!(
            entries = header.entry_count,
            table_offset,
            archive_len,
            "finalized PAK archive"
        );
        Ok((inner, archive_len))
    }
}
