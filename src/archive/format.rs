use crate::crypto::SALT_SIZE;
use crate::cursor::BinaryCursor;
use crate::entry::EntryFlags;
use crate::error::{PakError, Result};
use crate::formats::{RECORD_DIRECTORY, RECORD_FILE};
use std::io::{Read, Seek, Write};

/// Magic number: 0x89 'P' 'A' 'K' 0x0D 0x0A 0x1A 0x0A
/// Follows PNG pattern for corruption detection
pub const MAGIC_NUMBER: [u8; 8] = [0x89, b'P', b'A', b'K', 0x0D, 0x0A, 0x1A, 0x0A];

/// Current format version
pub const FORMAT_VERSION_MAJOR: u16 = 1;
pub const FORMAT_VERSION_MINOR: u16 = 0;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Maximum encoded path length in bytes (sealed paths included)
pub const MAX_PATH_LENGTH: usize = 4096;

/// Smallest table record: a directory record with an empty path
pub const MIN_RECORD_LEN: u64 = 1 + 4;

/// Archive flag: the header carries a key salt
pub const ARCHIVE_FLAG_SALT: u32 = 1 << 0;

/// File header at the beginning of the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub flags: u32,
    pub table_offset: u64,
    pub table_size: u64,
    pub entry_count: u32,
    pub key_salt: [u8; SALT_SIZE],
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            flags: 0,
            table_offset: HEADER_SIZE as u64,
            table_size: 0,
            entry_count: 0,
            key_salt: [0u8; SALT_SIZE],
        }
    }

    pub fn with_salt(mut self, salt: Option<[u8; SALT_SIZE]>) -> Self {
        match salt {
            Some(salt) => {
                self.flags |= ARCHIVE_FLAG_SALT;
                self.key_salt = salt;
            }
            None => {
                self.flags &= !ARCHIVE_FLAG_SALT;
                self.key_salt = [0u8; SALT_SIZE];
            }
        }
        self
    }

    pub fn salt(&self) -> Option<[u8; SALT_SIZE]> {
        (self.flags & ARCHIVE_FLAG_SALT != 0).then_some(self.key_salt)
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&MAGIC_NUMBER)?;
        writer.write_all(&self.version_major.to_le_bytes())?;
        writer.write_all(&self.version_minor.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.table_offset.to_le_bytes())?;
        writer.write_all(&self.table_size.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        writer.write_all(&self.key_salt)?;

        // Reserved (12 bytes)
        writer.write_all(&[0u8; 12])?;

        Ok(())
    }

    /// Read header from the start of a cursor
    pub fn read_from<R: Read + Seek>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        if cursor.length() < HEADER_SIZE as u64 {
            return Err(PakError::Format(format!(
                "file too small for header: {} bytes",
                cursor.length()
            )));
        }

        let magic = cursor.read_text(MAGIC_NUMBER.len())?;
        if magic != MAGIC_NUMBER {
            return Err(PakError::Format("invalid magic number".to_string()));
        }

        let version_major = cursor.read_u16()?;
        let version_minor = cursor.read_u16()?;
        let flags = cursor.read_u32()?;
        let table_offset = cursor.read_u64()?;
        let table_size = cursor.read_u64()?;
        let entry_count = cursor.read_u32()?;
        let mut key_salt = [0u8; SALT_SIZE];
        key_salt.copy_from_slice(&cursor.read_bytes(SALT_SIZE as u64)?);

        // Skip reserved bytes
        cursor.forward(12)?;

        Ok(Self {
            version_major,
            version_minor,
            flags,
            table_offset,
            table_size,
            entry_count,
            key_salt,
        })
    }

    /// Validate version compatibility
    pub fn validate_version(&self) -> Result<()> {
        if self.version_major > FORMAT_VERSION_MAJOR {
            return Err(PakError::UnsupportedVersion(
                self.version_major << 8 | self.version_minor,
            ));
        }
        Ok(())
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// File record in the entry table (after its `'f'` discriminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub flags: EntryFlags,
    /// Path bytes as stored: UTF-8, or sealed when `HEADER_CRYPTED`
    pub path_bytes: Vec<u8>,
    pub offset: u64,
    pub stored_size: u64,
    pub compressed_size: i64,
    pub decompressed_size: u64,
    pub crc32: u32,
}

impl FileRecord {
    /// Write the record including its discriminator, returning bytes written
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        check_path_len(&self.path_bytes)?;
        writer.write_all(&[RECORD_FILE])?;
        writer.write_all(&self.flags.bits().to_le_bytes())?;
        writer.write_all(&(self.path_bytes.len() as u16).to_le_bytes())?;
        writer.write_all(&self.path_bytes)?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.stored_size.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        writer.write_all(&self.decompressed_size.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        Ok(1 + 4 + 2 + self.path_bytes.len() + 8 + 8 + 8 + 8 + 4)
    }

    /// Read the record body; the discriminator is already consumed
    pub fn read_from<R: Read + Seek>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        let flags = EntryFlags::from_bits_retain(cursor.read_u32()?);
        let path_len = cursor.read_u16()?;
        let path_bytes = cursor.read_bytes(u64::from(path_len))?;
        Ok(Self {
            flags,
            path_bytes,
            offset: cursor.read_u64()?,
            stored_size: cursor.read_u64()?,
            compressed_size: cursor.read_i64()?,
            decompressed_size: cursor.read_u64()?,
            crc32: cursor.read_u32()?,
        })
    }
}

/// Write a directory record: discriminator, u32 length, UTF-8 path
pub fn write_directory_record<W: Write>(mut writer: W, path: &str) -> Result<usize> {
    let bytes = path.as_bytes();
    check_path_len(bytes)?;
    writer.write_all(&[RECORD_DIRECTORY])?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(1 + 4 + bytes.len())
}

pub(crate) fn check_path_len(bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_PATH_LENGTH {
        return Err(PakError::PathError(format!(
            "Path too long: {} bytes (max {})",
            bytes.len(),
            MAX_PATH_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_layout() {
        let header = FileHeader {
            table_offset: 1024,
            table_size: 512,
            entry_count: 10,
            ..FileHeader::new()
        }
        .with_salt(Some([3u8; SALT_SIZE]));

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let parsed = FileHeader::read_from(&mut BinaryCursor::from_bytes(buf)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.salt(), Some([3u8; SALT_SIZE]));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = Vec::new();
        FileHeader::new().write_to(&mut buf).unwrap();
        buf[0] = 0xFF;
        let result = FileHeader::read_from(&mut BinaryCursor::from_bytes(buf));
        assert!(matches!(result, Err(PakError::Format(_))));
    }

    #[test]
    fn test_future_version_rejected() {
        let header = FileHeader {
            version_major: FORMAT_VERSION_MAJOR + 1,
            ..FileHeader::new()
        };
        assert!(matches!(
            header.validate_version(),
            Err(PakError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_file_record_size() {
        let record = FileRecord {
            flags: EntryFlags::FILE | EntryFlags::CUSTOM_COMPRESSED,
            path_bytes: b"test/file.txt".to_vec(),
            offset: 1024,
            stored_size: 2000,
            compressed_size: 2000,
            decompressed_size: 5000,
            crc32: 0xDEADBEEF,
        };

        let mut buf = Vec::new();
        let written = record.write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(buf[0], RECORD_FILE);

        let mut cursor = BinaryCursor::from_bytes(buf);
        cursor.forward(1).unwrap();
        assert_eq!(FileRecord::read_from(&mut cursor).unwrap(), record);
        assert!(!cursor.can_read());
    }
}
