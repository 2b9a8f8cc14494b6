use crate::archive::end_record::{EndRecord, END_RECORD_SIZE};
use crate::archive::format::{FileHeader, FileRecord, HEADER_SIZE, MIN_RECORD_LEN};
use crate::archive::local_entry::{at_local_entry, LocalEntryHeader};
use crate::codec::{self, CompressionMethod};
use crate::config::{OpenOptions, OpenPolicy};
use crate::crypto::{self, KeySet};
use crate::cursor::BinaryCursor;
use crate::entry::{Entry, EntryFlags};
use crate::error::{PakError, Result};
use crate::formats::{read_tagged_records, FormatAdapter, FormatKind, Parsed, RecordReader};
use crate::progress::ParseContext;
use crate::stream::SharedStream;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

/// Unseal a stored payload according to its flags
pub fn open_payload(stored: Vec<u8>, flags: EntryFlags, keys: &KeySet, path: &str) -> Result<Vec<u8>> {
    if flags.contains(EntryFlags::EDITOR_CRYPTED) {
        crypto::open(keys.editor_key(path)?, &stored)
    } else if flags.contains(EntryFlags::DATA_CRYPTED) {
        crypto::open(keys.data_key(path)?, &stored)
    } else {
        Ok(stored)
    }
}

fn decode_path(bytes: Vec<u8>, flags: EntryFlags, keys: &KeySet) -> Result<String> {
    let bytes = if flags.contains(EntryFlags::HEADER_CRYPTED) {
        crypto::open(keys.data_key("sealed entry path")?, &bytes)?
    } else {
        bytes
    };
    String::from_utf8(bytes).map_err(|_| PakError::Format("entry path is not valid UTF-8".to_string()))
}

/// Table records of a PAK archive
struct PakRecords<'k> {
    keys: &'k KeySet,
    /// First byte past the data region
    data_end: u64,
}

impl<R: Read + Seek> RecordReader<R> for PakRecords<'_> {
    fn file_record(&mut self, cursor: &mut BinaryCursor<R>) -> Result<Entry> {
        let record = FileRecord::read_from(cursor)?;
        let path = decode_path(record.path_bytes, record.flags, self.keys)?;

        let end = record.offset.checked_add(record.stored_size);
        if record.offset < HEADER_SIZE as u64 || end.map_or(true, |end| end > self.data_end) {
            return Err(PakError::OutOfRange {
                requested: record.stored_size,
                position: record.offset,
                length: self.data_end,
            });
        }

        let mut entry = Entry::stored_file(path, record.offset, record.stored_size);
        entry.compressed_size = record.compressed_size;
        entry.decompressed_size = record.decompressed_size;
        entry.crc32 = Some(record.crc32);
        entry.flags = record.flags;
        Ok(entry)
    }

    fn directory_record(&mut self, cursor: &mut BinaryCursor<R>) -> Result<Option<Entry>> {
        let len = cursor.read_u32()?;
        let bytes = cursor.read_bytes(u64::from(len))?;
        let path = String::from_utf8(bytes)
            .map_err(|_| PakError::Format("directory path is not valid UTF-8".to_string()))?;
        Ok(Some(Entry::directory(path)))
    }
}

/// Lazy access to the payloads of a PAK archive
#[derive(Debug)]
pub struct PakAdapter {
    stream: SharedStream,
    keys: KeySet,
}

impl PakAdapter {
    /// Parse the header, end record and entry table of `path`.
    ///
    /// Under [`OpenPolicy::Repair`] an end-record or CRC mismatch is only
    /// logged, and an unreadable table is rebuilt from the local entry
    /// headers in the data region.
    pub fn parse(path: &Path, options: &OpenOptions, ctx: &mut ParseContext<'_>) -> Result<Parsed> {
        let mut cursor = BinaryCursor::open(path)?;
        let header = FileHeader::read_from(&mut cursor)?;
        header.validate_version()?;

        let salt = header.salt();
        let keys = match &salt {
            Some(salt) => KeySet::derive(
                options.passphrase.as_deref(),
                options.editor_passphrase.as_deref(),
                salt,
            ),
            None => KeySet::default(),
        };

        let mut entries = match read_table(&mut cursor, &header, &keys, options, ctx) {
            Ok(entries) => entries,
            Err(err) if options.policy == OpenPolicy::Repair && err.is_data_error() => {
                tracing::warn!(path = %path.display(), "entry table unreadable, rebuilding from local headers: {}", err);
                scan_local_headers(&mut cursor, &keys, ctx)?
            }
            Err(err) => return Err(err),
        };
        drop(cursor);

        let adapter: Arc<dyn FormatAdapter> = Arc::new(PakAdapter {
            stream: SharedStream::open(path)?,
            keys: keys.clone(),
        });
        for entry in entries.iter_mut().filter(|e| e.is_file()) {
            entry.bind(adapter.clone());
        }

        tracing::debug!(path = %path.display(), entries = entries.len(), "parsed PAK archive");
        Ok(Parsed {
            adapter,
            entries,
            salt,
            keys,
        })
    }

    fn stored_bytes(&self, entry: &Entry) -> Result<Vec<u8>> {
        self.stream.read_at(entry.offset, entry.stored_size)
    }
}

fn read_table<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    header: &FileHeader,
    keys: &KeySet,
    options: &OpenOptions,
    ctx: &mut ParseContext<'_>,
) -> Result<Vec<Entry>> {
    let repair = options.policy == OpenPolicy::Repair;

    let end_record = match EndRecord::read_from_end(cursor)
        .and_then(|end| end.validate_against_header(header).map(|_| end))
    {
        Ok(end) => Some(end),
        Err(err) if repair && err.is_data_error() => {
            tracing::warn!("repair: ignoring end record: {}", err);
            None
        }
        Err(err) => return Err(err),
    };

    let data_end = cursor.length().saturating_sub(END_RECORD_SIZE as u64);
    if header.table_offset < HEADER_SIZE as u64
        || header.table_offset.saturating_add(header.table_size) > data_end
    {
        return Err(PakError::OutOfRange {
            requested: header.table_size,
            position: header.table_offset,
            length: data_end,
        });
    }

    cursor.seek(header.table_offset)?;
    let table = cursor.read_bytes(header.table_size)?;

    if let Some(end) = &end_record {
        let actual = crc32fast::hash(&table);
        if actual != end.table_crc32 {
            let err = PakError::CrcMismatch {
                expected: end.table_crc32,
                actual,
            };
            if !repair {
                return Err(err);
            }
            tracing::warn!("repair: {}", err);
        }
    }

    let mut records = PakRecords {
        keys,
        data_end: header.table_offset,
    };
    let mut table_cursor = BinaryCursor::from_bytes(table);
    // The declared count is untrusted; the table bytes bound it
    let capacity = u64::from(header.entry_count).min(header.table_size / MIN_RECORD_LEN);
    let mut entries = Vec::with_capacity(capacity as usize);
    read_tagged_records(&mut table_cursor, ctx, &mut records, &mut entries)?;

    if entries.len() != header.entry_count as usize {
        return Err(PakError::Format(format!(
            "entry table holds {} records, header declares {}",
            entries.len(),
            header.entry_count
        )));
    }
    Ok(entries)
}

/// Rebuild the file list by walking LOCA headers from the start of the data
/// region. A later header for the same path replaces an earlier one;
/// directories are not recoverable.
fn scan_local_headers<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    keys: &KeySet,
    ctx: &mut ParseContext<'_>,
) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    cursor.seek(HEADER_SIZE as u64)?;
    while at_local_entry(cursor)? {
        ctx.checkpoint(cursor.position(), cursor.length())?;

        let local = match LocalEntryHeader::read_from(cursor) {
            Ok(local) => local,
            Err(err) if err.is_data_error() => break,
            Err(err) => return Err(err),
        };
        let offset = cursor.position();
        if local.stored_size > cursor.remaining() {
            tracing::warn!(offset, "repair: dropping truncated payload");
            break;
        }
        cursor.forward(local.stored_size)?;

        let path = match decode_path(local.path_bytes, local.flags, keys) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(offset, "repair: skipping entry with unreadable path: {}", err);
                continue;
            }
        };

        let mut entry = Entry::stored_file(path.clone(), offset, local.stored_size);
        entry.compressed_size = local.compressed_size;
        entry.decompressed_size = local.decompressed_size;
        entry.crc32 = Some(local.crc32);
        entry.flags = local.flags | EntryFlags::FILE;

        match seen.get(&path) {
            Some(&index) => entries[index] = entry,
            None => {
                seen.insert(path, entries.len());
                entries.push(entry);
            }
        }
    }

    tracing::info!(recovered = entries.len(), "rebuilt entry table from local headers");
    Ok(entries)
}

impl FormatAdapter for PakAdapter {
    fn kind(&self) -> FormatKind {
        FormatKind::Pak
    }

    fn decompressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        let compressed = self.compressed_stream(entry)?;
        let data = codec::decompress(&compressed, entry.codec(), entry.decompressed_size)?;

        if let Some(expected) = entry.crc32 {
            let actual = crc32fast::hash(&data);
            if actual != expected {
                return Err(PakError::CrcMismatch { expected, actual });
            }
        }
        Ok(data)
    }

    fn compressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        if entry.codec() == CompressionMethod::None {
            return Err(PakError::UnsupportedOperation(format!(
                "{} is stored without compression",
                entry.path
            )));
        }
        self.compressed_stream(entry)
    }

    fn copy_to(&self, entry: &Entry, out: &mut dyn Write) -> Result<u64> {
        let stored = self.stored_bytes(entry)?;
        out.write_all(&stored)?;
        Ok(stored.len() as u64)
    }

    fn release(&self) {
        self.stream.release();
    }
}

impl PakAdapter {
    /// Stored bytes with any sealing removed
    fn compressed_stream(&self, entry: &Entry) -> Result<Vec<u8>> {
        let stored = self.stored_bytes(entry)?;
        open_payload(stored, entry.flags, &self.keys, &entry.path)
    }
}
