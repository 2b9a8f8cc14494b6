use crate::archive::format::FileHeader;
use crate::cursor::BinaryCursor;
use crate::error::{PakError, Result};
use std::io::{Read, Seek, Write};

/// ENDR signature for the end record
pub const END_RECORD_SIGNATURE: [u8; 4] = [0x45, 0x4E, 0x44, 0x52]; // "ENDR"

/// End Record size in bytes (fixed)
pub const END_RECORD_SIZE: usize = 64;

/// End record (ENDR)
///
/// Located at the very end of the archive (last 64 bytes). Lets a reader
/// confirm the archive was finalized and that the entry table it is about
/// to trust is the one the writer produced.
///
/// Structure (64 bytes fixed):
/// - Signature: "ENDR" (4 bytes)
/// - Version Major: uint16 (2 bytes)
/// - Version Minor: uint16 (2 bytes)
/// - Table Offset: uint64 (8 bytes)
/// - Table Size: uint64 (8 bytes)
/// - Entry Count: uint32 (4 bytes)
/// - Table CRC32: uint32 (4 bytes)
/// - Reserved: 32 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndRecord {
    pub version_major: u16,
    pub version_minor: u16,
    pub table_offset: u64,
    pub table_size: u64,
    pub entry_count: u32,
    pub table_crc32: u32,
}

impl EndRecord {
    /// Build the end record matching a finalized header
    pub fn for_header(header: &FileHeader, table_crc32: u32) -> Self {
        Self {
            version_major: header.version_major,
            version_minor: header.version_minor,
            table_offset: header.table_offset,
            table_size: header.table_size,
            entry_count: header.entry_count,
            table_crc32,
        }
    }

    /// Write end record to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        writer.write_all(&END_RECORD_SIGNATURE)?;
        writer.write_all(&self.version_major.to_le_bytes())?;
        writer.write_all(&self.version_minor.to_le_bytes())?;
        writer.write_all(&self.table_offset.to_le_bytes())?;
        writer.write_all(&self.table_size.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        writer.write_all(&self.table_crc32.to_le_bytes())?;

        // Reserved (32 bytes)
        writer.write_all(&[0u8; 32])?;

        Ok(END_RECORD_SIZE)
    }

    /// Read the end record from the last 64 bytes of a cursor
    pub fn read_from_end<R: Read + Seek>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        let length = cursor.length();
        if length < END_RECORD_SIZE as u64 {
            return Err(PakError::Format("file too small for end record".to_string()));
        }
        cursor.seek(length - END_RECORD_SIZE as u64)?;

        let sig = cursor.read_text(4)?;
        if sig != END_RECORD_SIGNATURE {
            return Err(PakError::Format(
                "Invalid end record signature (expected ENDR)".to_string(),
            ));
        }

        let record = Self {
            version_major: cursor.read_u16()?,
            version_minor: cursor.read_u16()?,
            table_offset: cursor.read_u64()?,
            table_size: cursor.read_u64()?,
            entry_count: cursor.read_u32()?,
            table_crc32: cursor.read_u32()?,
        };

        // Skip reserved bytes
        cursor.forward(32)?;

        Ok(record)
    }

    /// Validate end record matches header
    pub fn validate_against_header(&self, header: &FileHeader) -> Result<()> {
        if self.version_major != header.version_major || self.version_minor != header.version_minor {
            return Err(PakError::Format(format!(
                "ENDR version mismatch: header v{}.{}, ENDR v{}.{}",
                header.version_major, header.version_minor, self.version_major, self.version_minor
            )));
        }

        if self.table_offset != header.table_offset {
            return Err(PakError::Format(format!(
                "ENDR table offset mismatch: header {}, ENDR {}",
                header.table_offset, self.table_offset
            )));
        }

        if self.table_size != header.table_size {
            return Err(PakError::Format(format!(
                "ENDR table size mismatch: header {}, ENDR {}",
                header.table_size, self.table_size
            )));
        }

        if self.entry_count != header.entry_count {
            return Err(PakError::Format(format!(
                "ENDR entry count mismatch: header {}, ENDR {}",
                header.entry_count, self.entry_count
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FileHeader {
        FileHeader {
            table_offset: 1024,
            table_size: 3200,
            entry_count: 10,
            ..FileHeader::new()
        }
    }

    #[test]
    fn test_end_record_layout() {
        let record = EndRecord::for_header(&header(), 0xDEADBEEF);

        let mut buf = vec![0u8; 100];
        let written = record.write_to(&mut buf).unwrap();
        assert_eq!(written, END_RECORD_SIZE);
        assert_eq!(buf.len(), 100 + END_RECORD_SIZE);

        let parsed = EndRecord::read_from_end(&mut BinaryCursor::from_bytes(buf)).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_signature_validation() {
        let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF];
        buf.extend_from_slice(&[0u8; 60]);

        let result = EndRecord::read_from_end(&mut BinaryCursor::from_bytes(buf));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid end record signature"));
    }

    #[test]
    fn test_validate_against_header() {
        let record = EndRecord::for_header(&header(), 0);
        assert!(record.validate_against_header(&header()).is_ok());

        let mut moved = header();
        moved.table_offset = 2048;
        assert!(record.validate_against_header(&moved).is_err());

        let mut grown = header();
        grown.entry_count = 20;
        assert!(record.validate_against_header(&grown).is_err());
    }
}
