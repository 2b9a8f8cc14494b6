//! Counted-index bundle with raw or LZSS payloads.
//!
//! Layout (little-endian):
//! - `BNDL`, version f32, entry count u32
//! - per entry: u16 path length, UTF-8 path, flags u32, offset u32,
//!   stored size u32, original size u32
//! - payloads at the absolute offsets named by the index

use crate::codec::{self, lzss, CompressionMethod};
use crate::config::OpenOptions;
use crate::crypto::KeySet;
use crate::cursor::BinaryCursor;
use crate::entry::{Entry, EntryFlags};
use crate::error::{PakError, Result};
use crate::formats::{tolerate, FormatAdapter, FormatKind, LoopEnd, Parsed};
use crate::progress::ParseContext;
use crate::stream::SharedStream;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

pub const BUNDLE_MAGIC: [u8; 4] = *b"BNDL";
pub const BUNDLE_VERSION: f32 = 1.0;

const INDEX_FIXED_SIZE: u64 = 2 + 4 + 4 + 4 + 4;

/// Flags a bundle index may carry
const BUNDLE_FLAGS: EntryFlags = EntryFlags::FILE
    .union(EntryFlags::LZSS)
    .union(EntryFlags::RAW_DATA_FILE);

/// Entries of a bundle file
#[derive(Debug)]
pub struct BundleAdapter {
    stream: SharedStream,
}

impl BundleAdapter {
    pub fn parse(path: &Path, options: &OpenOptions, ctx: &mut ParseContext<'_>) -> Result<Parsed> {
        let mut cursor = BinaryCursor::open(path)?;

        let magic = cursor.read_text(BUNDLE_MAGIC.len())?;
        if magic != BUNDLE_MAGIC {
            return Err(PakError::Format("invalid bundle signature".to_string()));
        }
        let version = cursor.read_f32()?;
        if !(version > 0.0 && version <= BUNDLE_VERSION) {
            return Err(PakError::Format(format!("unsupported bundle version {}", version)));
        }
        let count = cursor.read_u32()?;

        let mut entries = Vec::new();
        let result = read_index(&mut cursor, ctx, count, &mut entries);
        tolerate(result, options, entries.len())?;
        drop(cursor);

        let adapter: Arc<dyn FormatAdapter> = Arc::new(BundleAdapter {
            stream: SharedStream::open(path)?,
        });
        for entry in &mut entries {
            entry.bind(adapter.clone());
        }

        tracing::debug!(path = %path.display(), version, entries = entries.len(), "parsed bundle");
        Ok(Parsed {
            adapter,
            entries,
            salt: None,
            keys: KeySet::default(),
        })
    }
}

fn read_index<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    ctx: &mut ParseContext<'_>,
    count: u32,
    entries: &mut Vec<Entry>,
) -> Result<LoopEnd> {
    // Reject counts the index region could never hold
    if u64::from(count) * INDEX_FIXED_SIZE > cursor.remaining() {
        return Err(PakError::Format(format!(
            "bundle declares {} entries but only {} bytes follow",
            count,
            cursor.remaining()
        )));
    }

    for _ in 0..count {
        ctx.checkpoint(cursor.position(), cursor.length())?;

        let path_len = cursor.read_u16()?;
        let path_bytes = cursor.read_bytes(u64::from(path_len))?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| PakError::Format("bundle path is not valid UTF-8".to_string()))?;
        let flags = EntryFlags::from_bits_retain(cursor.read_u32()?) & BUNDLE_FLAGS;
        let offset = u64::from(cursor.read_u32()?);
        let stored = u64::from(cursor.read_u32()?);
        let original = u64::from(cursor.read_u32()?);

        if offset + stored > cursor.length() {
            return Err(PakError::OutOfRange {
                requested: stored,
                position: offset,
                length: cursor.length(),
            });
        }

        let mut entry = Entry::stored_file(path, offset, stored);
        entry.flags = flags | EntryFlags::FILE;
        entry.decompressed_size = original;
        if flags.contains(EntryFlags::LZSS) {
            entry.compressed_size = stored as i64;
        }
        entries.push(entry);
    }
    Ok(LoopEnd::Exhausted)
}

impl FormatAdapter for BundleAdapter {
    fn kind(&self) -> FormatKind {
        FormatKind::Bundle
    }

    fn decompressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        let stored = self.stream.read_at(entry.offset, entry.stored_size)?;
        codec::decompress(&stored, entry.codec(), entry.decompressed_size)
    }

    /// LZSS bytes verbatim; raw entries have no compressed form
    fn compressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        if entry.codec() != CompressionMethod::Lzss {
            return Err(PakError::UnsupportedOperation(format!(
                "{} is stored raw in the bundle",
                entry.path
            )));
        }
        self.stream.read_at(entry.offset, entry.stored_size)
    }

    fn copy_to(&self, entry: &Entry, out: &mut dyn Write) -> Result<u64> {
        let stored = self.stream.read_at(entry.offset, entry.stored_size)?;
        out.write_all(&stored)?;
        Ok(stored.len() as u64)
    }

    fn release(&self) {
        self.stream.release();
    }
}

struct PendingEntry {
    path: String,
    flags: EntryFlags,
    original_size: u32,
    bytes: Vec<u8>,
}

/// Writes a bundle; the index needs every path up front, so payloads are
/// held until [`BundleWriter::finish`].
#[derive(Default)]
pub struct BundleWriter {
    pending: Vec<PendingEntry>,
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| PakError::Format(format!("{} exceeds bundle limits: {}", what, value)))
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add plain bytes; LZSS is applied when it shrinks the payload unless
    /// `RAW_DATA_FILE` is set
    pub fn add_file(&mut self, path: &str, data: &[u8], flags: EntryFlags) -> Result<()> {
        let (bytes, flags) = if flags.contains(EntryFlags::RAW_DATA_FILE) {
            (data.to_vec(), EntryFlags::FILE | EntryFlags::RAW_DATA_FILE)
        } else {
            let packed = lzss::compress(data);
            if packed.len() < data.len() {
                (packed, EntryFlags::FILE | EntryFlags::LZSS)
            } else {
                (data.to_vec(), EntryFlags::FILE)
            }
        };
        self.push(path, flags, data.len() as u64, bytes)
    }

    /// Add an already LZSS-packed payload verbatim
    pub fn add_lzss(&mut self, path: &str, packed: Vec<u8>, original_size: u64) -> Result<()> {
        self.push(path, EntryFlags::FILE | EntryFlags::LZSS, original_size, packed)
    }

    fn push(&mut self, path: &str, flags: EntryFlags, original_size: u64, bytes: Vec<u8>) -> Result<()> {
        if path.len() > u16::MAX as usize {
            return Err(PakError::PathError(format!("bundle path too long: {}", path)));
        }
        self.pending.push(PendingEntry {
            path: path.to_string(),
            flags,
            original_size: to_u32(original_size, "original size")?,
            bytes,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write header, index and payloads
    pub fn finish<W: Write>(self, mut out: W) -> Result<W> {
        let index_len: u64 = self
            .pending
            .iter()
            .map(|p| INDEX_FIXED_SIZE + p.path.len() as u64)
            .sum();
        let mut offset = (BUNDLE_MAGIC.len() + 4 + 4) as u64 + index_len;

        out.write_all(&BUNDLE_MAGIC)?;
        out.write_all(&BUNDLE_VERSION.to_le_bytes())?;
        out.write_all(&to_u32(self.pending.len() as u64, "entry count")?.to_le_bytes())?;

        for entry in &self.pending {
            out.write_all(&(entry.path.len() as u16).to_le_bytes())?;
            out.write_all(entry.path.as_bytes())?;
            out.write_all(&entry.flags.bits().to_le_bytes())?;
            out.write_all(&to_u32(offset, "payload offset")?.to_le_bytes())?;
            out.write_all(&to_u32(entry.bytes.len() as u64, "stored size")?.to_le_bytes())?;
            out.write_all(&entry.original_size.to_le_bytes())?;
            offset += entry.bytes.len() as u64;
        }
        for entry in &self.pending {
            out.write_all(&entry.bytes)?;
        }
        out.flush()?;

        tracing::debug!(entries = self.pending.len(), bytes = offset, "finished bundle");
        Ok(out)
    }
}
