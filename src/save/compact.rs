use super::{tally, Plan, SaveReport, SaveStrategy};
use crate::archive::{check_record_path, PakWriter, StoredPayload, HEADER_SIZE};
use crate::container::Container;
use crate::entry::EntryFlags;
use crate::error::{PakError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Identity of a stored payload: content digest plus the flags that shape
/// its encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PayloadKey {
    digest: String,
    encoding: EntryFlags,
}

impl Container {
    /// Rewrite the data region so identical payloads are stored once.
    ///
    /// Every payload is read before the first byte is written; the archive
    /// is then rewritten from the end of the header. There is no rollback.
    pub(super) fn compact(&self) -> Result<SaveReport> {
        let target = self.path().to_path_buf();
        let mut report = SaveReport::new(SaveStrategy::Compact, target.clone());
        if self.primary.is_none() {
            return Err(PakError::UnsupportedOperation(
                "compaction needs an archive on disk".to_string(),
            ));
        }

        // Unique payloads in first-seen order, and which one each entry uses
        let mut unique: Vec<StoredPayload> = Vec::new();
        let mut by_key: HashMap<PayloadKey, usize> = HashMap::new();
        let mut layout: Vec<(String, Option<usize>)> = Vec::new();

        for entry in self.entries() {
            if entry.is_directory() {
                check_record_path(&entry.path, entry.flags, &self.keys)?;
                layout.push((entry.path.clone(), None));
                continue;
            }

            let plan = match self.plan(entry, &SaveStrategy::Compact) {
                Plan::Keep => Plan::Copy,
                plan => plan,
            };
            let payload = self
                .prepare(entry, plan)?
                .ok_or_else(|| PakError::Format(format!("{} has no payload", entry.path)))?;
            check_record_path(&entry.path, payload.flags, &self.keys)?;
            let key = PayloadKey {
                digest: hex::encode(Sha256::digest(entry.decompressed_data()?)),
                encoding: payload.flags & EntryFlags::PAYLOAD_ENCODING,
            };

            let index = match by_key.get(&key) {
                Some(&index) => {
                    tracing::debug!(path = %entry.path, digest = %key.digest, "sharing stored payload");
                    report.shared += 1;
                    index
                }
                None => {
                    tally(&mut report, plan);
                    unique.push(payload);
                    by_key.insert(key, unique.len() - 1);
                    unique.len() - 1
                }
            };
            layout.push((entry.path.clone(), Some(index)));
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).open(&target)?;
        let written = (|| -> Result<u64> {
            let mut writer = self.pak_writer(PakWriter::resume(file, HEADER_SIZE as u64)?);

            let mut offsets = Vec::with_capacity(unique.len());
            for (index, payload) in unique.iter().enumerate() {
                let owner = layout
                    .iter()
                    .find(|(_, slot)| *slot == Some(index))
                    .map(|(path, _)| path.as_str())
                    .unwrap_or_default();
                offsets.push(writer.write_payload(
                    owner,
                    payload.flags,
                    payload.decompressed_size,
                    payload.compressed_size,
                    payload.crc32,
                    &payload.bytes,
                )?);
            }

            for (path, slot) in &layout {
                match slot {
                    None => writer.add_directory(path)?,
                    Some(index) => {
                        let payload = &unique[*index];
                        writer.push_file_record(
                            path,
                            payload.flags,
                            offsets[*index],
                            payload.bytes.len() as u64,
                            payload.compressed_size,
                            payload.decompressed_size,
                            payload.crc32,
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
            tracing::error!(path = %target.display(), "compaction failed: {}", err);
            PakError::PartialWrite(format!("{}: {}", target.display(), err))
        })?;
        report.entries = layout.len();

        tracing::info!(
            path = %target.display(),
            unique = unique.len(),
            shared = report.shared,
            "compacted archive"
        );
        Ok(report)
    }
}
