//! Format adapters and the shared record-parsing loop.
//!
//! Every on-disk layout implements [`FormatAdapter`] for lazy per-entry
//! access and exposes a `parse` constructor the engine drives through a
//! [`ParseContext`]. Adding a layout means adding an adapter and a
//! [`FormatKind`] variant; the container engine does not change.

pub mod bundle;
pub mod gzip_records;

use crate::archive::{PakAdapter, MAGIC_NUMBER};
use crate::config::{OpenOptions, OpenPolicy};
use crate::crypto::{KeySet, SALT_SIZE};
use crate::cursor::BinaryCursor;
use crate::entry::Entry;
use crate::error::{PakError, Result};
use crate::progress::ParseContext;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

pub use bundle::{BundleAdapter, BundleWriter, BUNDLE_MAGIC};
pub use gzip_records::{GzipRecordAdapter, GzipRecordWriter};

/// Record discriminators shared by the tagged layouts
pub const RECORD_FILE: u8 = b'f';
pub const RECORD_DIRECTORY: u8 = b'd';
pub const RECORD_END: u8 = b'e';

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Lazy data access against one archive stream
pub trait FormatAdapter: Send + Sync + fmt::Debug {
    fn kind(&self) -> FormatKind;

    /// The entry's original bytes
    fn decompressed_data(&self, entry: &Entry) -> Result<Vec<u8>>;

    /// The entry's compressed stream, or `UnsupportedOperation` when the
    /// format cannot produce one that is meaningful
    fn compressed_data(&self, entry: &Entry) -> Result<Vec<u8>>;

    /// Stream the stored bytes verbatim
    fn copy_to(&self, entry: &Entry, out: &mut dyn Write) -> Result<u64>;

    /// Close the stream and delete scratch files; idempotent
    fn release(&self);
}

/// Supported on-disk layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// Canonical PAK archive
    Pak,
    /// Whole-file gzip around `'f'`/`'d'`/`'e'` records
    GzipRecords,
    /// Counted index with raw or LZSS payloads
    Bundle,
}

/// Result of a successful parse
#[derive(Debug)]
pub struct Parsed {
    pub adapter: Arc<dyn FormatAdapter>,
    pub entries: Vec<Entry>,
    /// Archive key salt (PAK only)
    pub salt: Option<[u8; SALT_SIZE]>,
    pub keys: KeySet,
}

impl FormatKind {
    /// Identify a layout from its leading bytes
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        let mut filled = 0;
        while filled < magic.len() {
            let n = file.read(&mut magic[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Self::from_magic(&magic[..filled])
    }

    pub fn from_magic(magic: &[u8]) -> Result<Self> {
        if magic.starts_with(&MAGIC_NUMBER) {
            Ok(Self::Pak)
        } else if magic.starts_with(&GZIP_MAGIC) {
            Ok(Self::GzipRecords)
        } else if magic.starts_with(&BUNDLE_MAGIC) {
            Ok(Self::Bundle)
        } else {
            Err(PakError::Format("unrecognized archive signature".to_string()))
        }
    }

    /// Parse `path` with this layout's adapter
    pub fn parse(self, path: &Path, options: &OpenOptions, ctx: &mut ParseContext<'_>) -> Result<Parsed> {
        match self {
            Self::Pak => PakAdapter::parse(path, options, ctx),
            Self::GzipRecords => GzipRecordAdapter::parse(path, options, ctx),
            Self::Bundle => BundleAdapter::parse(path, options, ctx),
        }
    }
}

/// How a tagged record loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEnd {
    Terminator,
    Exhausted,
}

/// Per-format record bodies for [`read_tagged_records`]
pub(crate) trait RecordReader<R: Read + Seek> {
    fn file_record(&mut self, cursor: &mut BinaryCursor<R>) -> Result<Entry>;

    /// Default: skip a u32 length-prefixed body
    fn directory_record(&mut self, cursor: &mut BinaryCursor<R>) -> Result<Option<Entry>> {
        let len = cursor.read_u32()?;
        cursor.forward(u64::from(len))?;
        Ok(None)
    }
}

/// Read discriminated records until `'e'` or the end of the stream.
///
/// Cancellation is polled before each record. A missing terminator is not
/// an error: the stream length is trusted.
pub(crate) fn read_tagged_records<R, H>(
    cursor: &mut BinaryCursor<R>,
    ctx: &mut ParseContext<'_>,
    reader: &mut H,
    entries: &mut Vec<Entry>,
) -> Result<LoopEnd>
where
    R: Read + Seek,
    H: RecordReader<R>,
{
    loop {
        if !cursor.can_read() {
            tracing::debug!(records = entries.len(), "record stream ended without terminator");
            return Ok(LoopEnd::Exhausted);
        }
        ctx.checkpoint(cursor.position(), cursor.length())?;

        let at = cursor.position();
        match cursor.read_u8()? {
            RECORD_FILE => entries.push(reader.file_record(cursor)?),
            RECORD_DIRECTORY => {
                if let Some(entry) = reader.directory_record(cursor)? {
                    entries.push(entry);
                }
            }
            RECORD_END => return Ok(LoopEnd::Terminator),
            other => {
                return Err(PakError::Format(format!(
                    "unknown record type 0x{:02x} at offset {}",
                    other, at
                )))
            }
        }
    }
}

/// Under [`OpenPolicy::Repair`], keep what parsed before a data fault
pub(crate) fn tolerate(result: Result<LoopEnd>, options: &OpenOptions, parsed: usize) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if options.policy == OpenPolicy::Repair && err.is_data_error() => {
            tracing::warn!(kept = parsed, "repair: dropping records after fault: {}", err);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Cursor;

    struct Names;

    impl RecordReader<Cursor<Vec<u8>>> for Names {
        fn file_record(&mut self, cursor: &mut BinaryCursor<Cursor<Vec<u8>>>) -> Result<Entry> {
            let len = cursor.read_u8()?;
            let name = cursor.read_text(len as usize)?;
            Ok(Entry::stored_file(
                String::from_utf8_lossy(&name).into_owned(),
                cursor.position(),
                0,
            ))
        }
    }

    fn run(bytes: Vec<u8>) -> (Result<LoopEnd>, Vec<Entry>) {
        let mut cursor = BinaryCursor::from_bytes(bytes);
        let sink = NoProgress;
        let mut ctx = ParseContext::new(&sink);
        let mut entries = Vec::new();
        let end = read_tagged_records(&mut cursor, &mut ctx, &mut Names, &mut entries);
        (end, entries)
    }

    #[test]
    fn test_loop_stops_at_terminator() {
        let mut bytes = vec![b'f', 1, b'a', b'd'];
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[9, 9, b'e', b'f', 1, b'z']);
        let (end, entries) = run(bytes);
        assert_eq!(end.unwrap(), LoopEnd::Terminator);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a");
    }

    #[test]
    fn test_loop_trusts_stream_length() {
        let (end, entries) = run(vec![b'f', 1, b'a', b'f', 1, b'b']);
        assert_eq!(end.unwrap(), LoopEnd::Exhausted);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_unknown_tag_is_format_error() {
        let (end, _) = run(vec![b'x']);
        assert!(matches!(end, Err(PakError::Format(_))));
    }

    #[test]
    fn test_detect_by_magic() {
        assert_eq!(FormatKind::from_magic(&MAGIC_NUMBER).unwrap(), FormatKind::Pak);
        assert_eq!(FormatKind::from_magic(&[0x1f, 0x8b, 8]).unwrap(), FormatKind::GzipRecords);
        assert_eq!(FormatKind::from_magic(b"BNDL\0\0").unwrap(), FormatKind::Bundle);
        assert!(FormatKind::from_magic(b"PK\x03\x04").is_err());
        assert!(FormatKind::from_magic(&[]).is_err());
    }
}
