//! Serializing a container back to disk.
//!
//! Full rewrites and exports stage into a temporary file next to the target
//! and persist it only after every byte is written, so a failure leaves the
//! original untouched. In-place patching and compaction write into the
//! archive directly; a failure while writing is reported as
//! [`PakError::PartialWrite`] and needs manual repair.

mod compact;

use crate::archive::{check_record_path, encode_payload, FileHeader, PakWriter, StoredPayload};
use crate::container::Container;
use crate::cursor::BinaryCursor;
use crate::codec::CompressionMethod;
use crate::entry::{Entry, EntryFlags, ModFlags};
use crate::error::{PakError, Result};
use crate::formats::bundle::BundleWriter;
use crate::formats::gzip_records::GzipRecordWriter;
use crate::formats::FormatKind;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// How [`Container::save`] writes the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStrategy {
    /// Stage a complete new archive and atomically replace the original
    FullRewrite,
    /// Append changed payloads at the old table offset and rewrite the table
    InPlacePatch,
    /// Re-encode every entry except those marked `DO_NOT_REWRITE`
    ForcedRepack,
    /// Re-encode only `MERGE_SOURCE` entries
    SourceRepack,
    /// Store identical payloads once, in place
    Compact,
    /// Write a gzip record archive at a new path
    ExportGzipRecords(PathBuf),
    /// Write a bundle at a new path
    ExportBundle(PathBuf),
}

impl SaveStrategy {
    /// Pick a strategy for the container's pending edits
    pub fn recommend(container: &Container) -> Self {
        let on_disk_pak = container.kind() == Some(FormatKind::Pak) && container.primary.is_some();
        if !on_disk_pak {
            return Self::FullRewrite;
        }

        let mut removed = false;
        let mut merged = false;
        for entry in container.table.iter() {
            removed |= entry.modifications.contains(ModFlags::REMOVED);
            merged |= entry.modifications.contains(ModFlags::MERGE_SOURCE);
        }

        if merged {
            Self::SourceRepack
        } else if removed || !container.is_modified() {
            Self::FullRewrite
        } else {
            Self::InPlacePatch
        }
    }

    fn writes_pak(&self) -> bool {
        !matches!(self, Self::ExportGzipRecords(_) | Self::ExportBundle(_))
    }
}

/// Outcome of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub strategy: SaveStrategy,
    pub target: PathBuf,
    /// Entries written to the table (directories included)
    pub entries: usize,
    /// Payloads copied verbatim from their source stream
    pub copied: usize,
    /// Payloads decompressed and re-encoded
    pub encoded: usize,
    /// Entries that point at a payload stored for another entry
    pub shared: usize,
    pub bytes: u64,
}

impl SaveReport {
    fn new(strategy: SaveStrategy, target: PathBuf) -> Self {
        Self {
            strategy,
            target,
            entries: 0,
            copied: 0,
            encoded: 0,
            shared: 0,
            bytes: 0,
        }
    }
}

/// What to do with one file entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Already in this archive at the right place (in-place patch only)
    Keep,
    /// Copy stored bytes verbatim
    Copy,
    /// Decompress and encode again
    Encode,
}

/// Entry flags after applying pending edits, for re-encoding
fn target_flags(entry: &Entry) -> EntryFlags {
    let mut flags = entry.flags - EntryFlags::TRANSIENT;
    if entry.modifications.contains(ModFlags::ENCRYPT) {
        flags |= EntryFlags::DATA_CRYPTED;
    }
    if entry.modifications.contains(ModFlags::DECRYPT) {
        flags -= EntryFlags::DATA_CRYPTED | EntryFlags::EDITOR_CRYPTED;
    }
    flags | EntryFlags::FILE
}

impl Container {
    /// True when the stored bytes can move into this container's archive
    /// unchanged
    fn can_copy(&self, entry: &Entry) -> bool {
        if entry.staged.is_some() || entry.external_source.is_some() || entry.origin.is_none() {
            return false;
        }
        if entry
            .modifications
            .intersects(ModFlags::ENCRYPT | ModFlags::DECRYPT | ModFlags::SPECIAL | ModFlags::REFLAGGED)
        {
            return false;
        }
        // Sealed payloads only stay readable under the keys that sealed them
        !entry.flags.is_data_encrypted() || self.is_own(entry)
    }

    fn plan(&self, entry: &Entry, strategy: &SaveStrategy) -> Plan {
        let copyable = self.can_copy(entry);
        if !copyable {
            return Plan::Encode;
        }
        match strategy {
            SaveStrategy::InPlacePatch if self.is_own(entry) => Plan::Keep,
            SaveStrategy::ForcedRepack if !entry.modifications.contains(ModFlags::DO_NOT_REWRITE) => {
                Plan::Encode
            }
            SaveStrategy::SourceRepack if entry.modifications.contains(ModFlags::MERGE_SOURCE) => {
                Plan::Encode
            }
            _ => Plan::Copy,
        }
    }

    /// Stored bytes and metadata for a verbatim copy
    fn copy_payload(&self, entry: &Entry) -> Result<StoredPayload> {
        let mut bytes = Vec::with_capacity(entry.stored_size as usize);
        entry.copy_to(&mut bytes)?;
        let crc32 = match entry.crc32 {
            Some(crc) => crc,
            None => crc32fast::hash(&entry.decompressed_data()?),
        };
        Ok(StoredPayload {
            bytes,
            flags: (entry.flags - EntryFlags::TRANSIENT) | EntryFlags::FILE,
            compressed_size: entry.compressed_size,
            decompressed_size: entry.decompressed_size,
            crc32,
        })
    }

    fn encode_entry(&self, entry: &Entry) -> Result<StoredPayload> {
        let data = entry.decompressed_data()?;
        encode_payload(
            &entry.path,
            &data,
            target_flags(entry),
            entry.modifications.contains(ModFlags::SPECIAL),
            &self.options().config,
            &self.keys,
        )
    }

    fn prepare(&self, entry: &Entry, plan: Plan) -> Result<Option<StoredPayload>> {
        match plan {
            Plan::Keep => Ok(None),
            Plan::Copy => self.copy_payload(entry).map(Some),
            Plan::Encode => self.encode_entry(entry).map(Some),
        }
    }

    fn require_pak(&self, strategy: &SaveStrategy) -> Result<()> {
        if self.kind() != Some(FormatKind::Pak) {
            return Err(PakError::UnsupportedOperation(format!(
                "{:?} needs a PAK container; convert it to canonical form first",
                strategy
            )));
        }
        Ok(())
    }

    /// Write the container with `strategy`.
    ///
    /// After a PAK save the container reloads from disk: pending edits are
    /// cleared and previous backing streams are released. Exports leave the
    /// container as it was.
    pub fn save(&mut self, strategy: SaveStrategy) -> Result<SaveReport> {
        self.ensure_usable()?;
        if strategy.writes_pak() {
            self.require_pak(&strategy)?;
        }

        let report = match &strategy {
            SaveStrategy::FullRewrite | SaveStrategy::ForcedRepack | SaveStrategy::SourceRepack => {
                self.rewrite(strategy.clone())?
            }
            SaveStrategy::InPlacePatch => self.patch_in_place()?,
            SaveStrategy::Compact => self.compact()?,
            SaveStrategy::ExportGzipRecords(target) => self.export_gzip_records(target)?,
            SaveStrategy::ExportBundle(target) => self.export_bundle(target)?,
        };

        if strategy.writes_pak() {
            self.reload()?;
        }

        tracing::info!(
            strategy = ?report.strategy,
            target = %report.target.display(),
            entries = report.entries,
            copied = report.copied,
            encoded = report.encoded,
            shared = report.shared,
            bytes = report.bytes,
            "saved archive"
        );
        Ok(report)
    }

    fn pak_writer<W: Write + Seek>(&self, writer: PakWriter<W>) -> PakWriter<W> {
        writer
            .with_keys(self.salt, self.keys.clone())
            .with_config(self.options().config.clone())
    }

    fn rewrite(&self, strategy: SaveStrategy) -> Result<SaveReport> {
        let target = self.path().to_path_buf();
        let mut report = SaveReport::new(strategy.clone(), target.clone());
        let mut staged = stage_next_to(&target)?;

        let mut writer = self.pak_writer(PakWriter::new(staged.as_file_mut())?);
        for entry in self.entries() {
            if entry.is_directory() {
                writer.add_directory(&entry.path)?;
            } else {
                let plan = self.plan(entry, &strategy);
                if let Some(payload) = self.prepare(entry, plan)? {
                    writer.add_stored(&entry.path, &payload)?;
                    tally(&mut report, plan);
                }
            }
            report.entries += 1;
        }
        let (_, len) = writer.finalize()?;
        report.bytes = len;

        staged.as_file().sync_all()?;
        staged
            .persist(&target)
            .map_err(|err| PakError::Io(err.error))?;
        Ok(report)
    }

    fn patch_in_place(&self) -> Result<SaveReport> {
        let target = self.path().to_path_buf();
        let mut report = SaveReport::new(SaveStrategy::InPlacePatch, target.clone());
        if self.primary.is_none() {
            return Err(PakError::UnsupportedOperation(
                "in-place patch needs an archive on disk".to_string(),
            ));
        }
        let header = FileHeader::read_from(&mut BinaryCursor::open(&target)?)?;

        // Everything that can fail before the archive is touched happens here
        let mut prepared = Vec::new();
        for entry in self.entries() {
            let payload = if entry.is_directory() {
                None
            } else {
                let plan = self.plan(entry, &SaveStrategy::InPlacePatch);
                tally(&mut report, plan);
                self.prepare(entry, plan)?
            };
            let flags = payload.as_ref().map_or(entry.flags, |p| p.flags);
            check_record_path(&entry.path, flags, &self.keys)?;
            prepared.push((entry, payload));
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).open(&target)?;
        let written = (|| -> Result<u64> {
            let mut writer = self.pak_writer(PakWriter::resume(file, header.table_offset)?);
            for (entry, payload) in &prepared {
                match payload {
                    _ if entry.is_directory() => writer.add_directory(&entry.path)?,
                    Some(payload) => {
                        writer.add_stored(&entry.path, payload)?;
                    }
                    None => {
                        let crc32 = entry.crc32.ok_or_else(|| {
                            PakError::Format(format!("{} has no recorded CRC", entry.path))
                        })?;
                        writer.push_file_record(
                            &entry.path,
                            entry.flags,
                            entry.offset,
                            entry.stored_size,
                            entry.compressed_size,
                            entry.decompressed_size,
                            crc32,
                        )?;
                    }
                }
            }
            let (file, len) = writer.finalize()?;
            file.set_len(len)?;
            file.sync_all()?;
            Ok(len)
        })();

        report.bytes = written.map_err(|err| {
            tracing::error!(path = %target.display(), "in-place patch failed: {}", err);
            PakError::PartialWrite(format!("{}: {}", target.display(), err))
        })?;
        report.entries = prepared.len();
        Ok(report)
    }

    fn export_gzip_records(&self, target: &Path) -> Result<SaveReport> {
        let mut report = SaveReport::new(SaveStrategy::ExportGzipRecords(target.to_path_buf()), target.to_path_buf());
        let mut staged = stage_next_to(target)?;

        let mut writer = GzipRecordWriter::new(staged.as_file_mut(), &self.options().config)?;
        for entry in self.entries() {
            if entry.is_directory() {
                writer.add_directory(&entry.path)?;
            } else {
                writer.add_file(&entry.path, &entry.decompressed_data()?)?;
                report.encoded += 1;
            }
            report.entries += 1;
        }
        writer.finish()?.flush()?;

        report.bytes = staged.as_file().metadata()?.len();
        staged.as_file().sync_all()?;
        staged
            .persist(target)
            .map_err(|err| PakError::Io(err.error))?;
        Ok(report)
    }

    fn export_bundle(&self, target: &Path) -> Result<SaveReport> {
        let mut report = SaveReport::new(SaveStrategy::ExportBundle(target.to_path_buf()), target.to_path_buf());
        let mut bundle = BundleWriter::new();

        for entry in self.entries().filter(|e| e.is_file()) {
            let verbatim = entry.codec() == CompressionMethod::Lzss && self.can_copy(entry);
            if verbatim {
                bundle.add_lzss(&entry.path, entry.compressed_data()?, entry.decompressed_size)?;
                report.copied += 1;
            } else {
                let mut flags = target_flags(entry);
                if entry.modifications.contains(ModFlags::SPECIAL) {
                    flags |= EntryFlags::RAW_DATA_FILE;
                }
                bundle.add_file(&entry.path, &entry.decompressed_data()?, flags)?;
                report.encoded += 1;
            }
            report.entries += 1;
        }

        let mut staged = stage_next_to(target)?;
        bundle.finish(staged.as_file_mut())?;
        report.bytes = staged.as_file().metadata()?.len();
        staged.as_file().sync_all()?;
        staged
            .persist(target)
            .map_err(|err| PakError::Io(err.error))?;
        Ok(report)
    }
}

fn tally(report: &mut SaveReport, plan: Plan) {
    match plan {
        Plan::Keep => {}
        Plan::Copy => report.copied += 1,
        Plan::Encode => report.encoded += 1,
    }
}

/// Temporary file in the target's directory, so persisting is a rename
fn stage_next_to(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(".pakvault-save-")
        .tempfile_in(dir)?)
}
