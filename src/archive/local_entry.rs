use crate::cursor::BinaryCursor;
use crate::entry::EntryFlags;
use crate::error::{PakError, Result};
use std::io::{Read, Seek, Write};

/// LOCA signature for local entry headers
pub const LOCAL_ENTRY_SIGNATURE: [u8; 4] = [0x4C, 0x4F, 0x43, 0x41]; // "LOCA"

/// Local Entry Header
///
/// Precedes each stored payload, so a damaged entry table can be rebuilt by
/// walking the data region.
///
/// Structure (variable length):
/// - Signature: "LOCA" (4 bytes)
/// - Decompressed Size: uint64 (8 bytes)
/// - Stored Size: uint64 (8 bytes)
/// - Compressed Size: int64 (8 bytes, -1 when stored)
/// - CRC32: uint32 (4 bytes)
/// - Flags: uint32 (4 bytes)
/// - Path Length: uint16 (2 bytes)
/// - Path: variable (UTF-8, sealed when HEADER_CRYPTED)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntryHeader {
    pub decompressed_size: u64,
    pub stored_size: u64,
    pub compressed_size: i64,
    pub crc32: u32,
    pub flags: EntryFlags,
    pub path_bytes: Vec<u8>,
}

impl LocalEntryHeader {
    /// Write local entry header to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        writer.write_all(&LOCAL_ENTRY_SIGNATURE)?;
        writer.write_all(&self.decompressed_size.to_le_bytes())?;
        writer.write_all(&self.stored_size.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        writer.write_all(&self.flags.bits().to_le_bytes())?;
        writer.write_all(&(self.path_bytes.len() as u16).to_le_bytes())?;
        writer.write_all(&self.path_bytes)?;
        Ok(self.encoded_len())
    }

    /// Read local entry header at the cursor position
    pub fn read_from<R: Read + Seek>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        let sig = cursor.read_text(4)?;
        if sig != LOCAL_ENTRY_SIGNATURE {
            return Err(PakError::Format(format!(
                "Invalid local entry signature at offset {}",
                cursor.position() - 4
            )));
        }

        let decompressed_size = cursor.read_u64()?;
        let stored_size = cursor.read_u64()?;
        let compressed_size = cursor.read_i64()?;
        let crc32 = cursor.read_u32()?;
        let flags = EntryFlags::from_bits_retain(cursor.read_u32()?);
        let path_len = cursor.read_u16()?;
        let path_bytes = cursor.read_bytes(u64::from(path_len))?;

        Ok(Self {
            decompressed_size,
            stored_size,
            compressed_size,
            crc32,
            flags,
            path_bytes,
        })
    }

    pub fn encoded_len(&self) -> usize {
        4 + 8 + 8 + 8 + 4 + 4 + 2 + self.path_bytes.len()
    }
}

/// Peek whether the next bytes are a local entry signature
pub fn at_local_entry<R: Read + Seek>(cursor: &mut BinaryCursor<R>) -> Result<bool> {
    if cursor.remaining() < 4 {
        return Ok(false);
    }
    let start = cursor.position();
    let sig = cursor.read_text(4)?;
    cursor.seek(start)?;
    Ok(sig == LOCAL_ENTRY_SIGNATURE)
}
