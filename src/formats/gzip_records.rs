//! Whole-file gzip around a flat sequence of tagged records.
//!
//! Decompressed layout:
//! - `'f'`: u32 path length, path bytes (display encoding, cut at the first
//!   NUL inside the declared length), u32 payload length, payload
//! - `'d'`: u32 length, skipped bytes
//! - `'e'`: end of records
//!
//! Payloads are stored uncompressed inside the gzip stream, so the archive is
//! unwrapped once into a scratch file and entries point into it.

use crate::codec::{self, unwrap_to_scratch, CompressionMethod};
use crate::config::{OpenOptions, PakConfig};
use crate::crypto::KeySet;
use crate::cursor::{trim_nul, BinaryCursor};
use crate::entry::Entry;
use crate::error::{PakError, Result};
use crate::formats::{
    read_tagged_records, tolerate, FormatAdapter, FormatKind, Parsed, RecordReader, RECORD_DIRECTORY,
    RECORD_END, RECORD_FILE,
};
use crate::progress::ParseContext;
use crate::stream::SharedStream;
use encoding_rs::Encoding;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

struct GzipRecords {
    encoding: &'static Encoding,
}

impl<R: Read + Seek> RecordReader<R> for GzipRecords {
    fn file_record(&mut self, cursor: &mut BinaryCursor<R>) -> Result<Entry> {
        let path_len = cursor.read_u32()?;
        let raw = cursor.read_bytes(u64::from(path_len))?;
        let (path, _, had_errors) = self.encoding.decode(trim_nul(&raw));
        if had_errors {
            tracing::debug!(encoding = self.encoding.name(), "path contains unmappable bytes");
        }

        let length = cursor.read_u32()?;
        let offset = cursor.position();
        cursor.forward(u64::from(length))?;
        Ok(Entry::stored_file(path.into_owned(), offset, u64::from(length)))
    }
}

/// Entries of an unwrapped gzip record archive
#[derive(Debug)]
pub struct GzipRecordAdapter {
    stream: SharedStream,
    scratch: Mutex<Option<NamedTempFile>>,
    zstd_level: i32,
}

impl GzipRecordAdapter {
    /// Unwrap `path` into a scratch file (progress `[0, 50]`), then read its
    /// records (progress `[50, 100]`).
    pub fn parse(path: &Path, options: &OpenOptions, ctx: &mut ParseContext<'_>) -> Result<Parsed> {
        let encoding = options.config.encoding()?;

        ctx.set_band(0, 50);
        let scratch = unwrap_to_scratch(path, options.config.scratch_dir.as_deref(), ctx)?;

        ctx.set_band(50, 100);
        let mut cursor = BinaryCursor::open(scratch.path())?;
        let mut entries = Vec::new();
        let result = read_tagged_records(&mut cursor, ctx, &mut GzipRecords { encoding }, &mut entries);
        tolerate(result, options, entries.len())?;
        drop(cursor);

        let adapter: Arc<dyn FormatAdapter> = Arc::new(GzipRecordAdapter {
            stream: SharedStream::open(scratch.path())?,
            scratch: Mutex::new(Some(scratch)),
            zstd_level: options.config.zstd_level,
        });
        for entry in &mut entries {
            entry.bind(adapter.clone());
        }

        tracing::debug!(path = %path.display(), entries = entries.len(), "parsed gzip record archive");
        Ok(Parsed {
            adapter,
            entries,
            salt: None,
            keys: KeySet::default(),
        })
    }

    /// Location of the scratch file while the adapter is alive
    pub fn scratch_path(&self) -> Option<std::path::PathBuf> {
        self.scratch
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|f| f.path().to_path_buf()))
    }
}

impl FormatAdapter for GzipRecordAdapter {
    fn kind(&self) -> FormatKind {
        FormatKind::GzipRecords
    }

    fn decompressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        self.stream.read_at(entry.offset, entry.stored_size)
    }

    /// Payloads are stored plain; the compressed form is produced on demand
    fn compressed_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        let data = self.decompressed_data(entry)?;
        codec::compress(&data, CompressionMethod::Zstd, self.zstd_level)
    }

    fn copy_to(&self, entry: &Entry, out: &mut dyn Write) -> Result<u64> {
        let data = self.decompressed_data(entry)?;
        out.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn release(&self) {
        self.stream.release();
        let scratch = match self.scratch.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(scratch) = scratch {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                tracing::warn!(scratch = %path.display(), "failed to delete scratch file: {}", err);
            }
        }
    }
}

fn length_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| PakError::Format(format!("{} too large for record: {} bytes", what, len)))
}

/// Writes a gzip record archive
pub struct GzipRecordWriter<W: Write> {
    encoder: GzEncoder<W>,
    encoding: &'static Encoding,
    records: usize,
}

impl<W: Write> GzipRecordWriter<W> {
    pub fn new(inner: W, config: &PakConfig) -> Result<Self> {
        Ok(Self {
            encoder: GzEncoder::new(inner, Compression::default()),
            encoding: config.encoding()?,
            records: 0,
        })
    }

    fn encode_path(&self, path: &str) -> Result<Vec<u8>> {
        let (bytes, _, unmappable) = self.encoding.encode(path);
        if unmappable {
            return Err(PakError::PathError(format!(
                "{} cannot be represented in {}",
                path,
                self.encoding.name()
            )));
        }
        let mut bytes = bytes.into_owned();
        bytes.push(0);
        Ok(bytes)
    }

    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let path_bytes = self.encode_path(path)?;
        self.encoder.write_all(&[RECORD_FILE])?;
        self.encoder.write_all(&length_u32(path_bytes.len(), "path")?.to_le_bytes())?;
        self.encoder.write_all(&path_bytes)?;
        self.encoder.write_all(&length_u32(data.len(), "payload")?.to_le_bytes())?;
        self.encoder.write_all(data)?;
        self.records += 1;
        Ok(())
    }

    /// Directory records are skipped by readers; they only keep the layout
    pub fn add_directory(&mut self, path: &str) -> Result<()> {
        let path_bytes = self.encode_path(path)?;
        self.encoder.write_all(&[RECORD_DIRECTORY])?;
        self.encoder.write_all(&length_u32(path_bytes.len(), "path")?.to_le_bytes())?;
        self.encoder.write_all(&path_bytes)?;
        self.records += 1;
        Ok(())
    }

    /// Write the terminator and finish the gzip stream
    pub fn finish(mut self) -> Result<W> {
        self.encoder.write_all(&[RECORD_END])?;
        tracing::debug!(records = self.records, "finished gzip record archive");
        Ok(self.encoder.finish()?)
    }
}
