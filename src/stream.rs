use crate::error::{PakError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File handle shared by every entry of one archive.
///
/// Reads are positioned `(offset, length)` descriptors, serialized under a
/// mutex, so concurrent extraction never races on a cursor. The owning
/// container releases the handle on disposal; later reads fail cleanly.
#[derive(Debug)]
pub struct SharedStream {
    path: PathBuf,
    file: Mutex<Option<File>>,
    length: u64,
}

impl SharedStream {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Read exactly `length` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset.checked_add(length).ok_or(PakError::OutOfRange {
            requested: length,
            position: offset,
            length: self.length,
        })?;
        if end > self.length {
            return Err(PakError::OutOfRange {
                requested: length,
                position: offset,
                length: self.length,
            });
        }

        let mut guard = self
            .file
            .lock()
            .map_err(|_| PakError::Io(std::io::Error::other("stream lock poisoned")))?;
        let file = guard
            .as_mut()
            .ok_or_else(|| PakError::Io(std::io::Error::other("archive stream was released")))?;

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Close the handle; idempotent
    pub fn release(&self) {
        if let Ok(mut guard) = self.file.lock() {
            guard.take();
        }
    }

    pub fn is_released(&self) -> bool {
        self.file.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}
