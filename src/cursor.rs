//! Sequential binary reader with explicit position/length bookkeeping.
//!
//! Every read is bounds-checked against the length captured when the cursor
//! was created, so a truncated archive surfaces as [`PakError::OutOfRange`]
//! instead of a short read deep inside a parser.

use crate::error::{PakError, Result};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// Binary cursor over any seekable byte source
#[derive(Debug)]
pub struct BinaryCursor<R> {
    inner: R,
    position: u64,
    length: u64,
}

impl BinaryCursor<BufReader<File>> {
    /// Open a file for sequential reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl BinaryCursor<Cursor<Vec<u8>>> {
    /// Wrap an in-memory buffer
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self {
            inner: Cursor::new(bytes),
            position: 0,
            length,
        }
    }
}

impl<R: Read + Seek> BinaryCursor<R> {
    /// Wrap a seekable reader, starting at its current position
    pub fn new(mut inner: R) -> Result<Self> {
        let position = inner.stream_position()?;
        let length = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self {
            inner,
            position,
            length,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    pub fn can_read(&self) -> bool {
        self.position < self.length
    }

    /// Move to an absolute position (may equal `length`)
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(self.out_of_range(position.saturating_sub(self.position)));
        }
        self.inner.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    /// Skip `count` bytes without reading them
    pub fn forward(&mut self, count: u64) -> Result<()> {
        self.ensure(count)?;
        self.inner.seek(SeekFrom::Current(count as i64))?;
        self.position += count;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read a fixed-length text buffer verbatim.
    ///
    /// Embedded terminators are left in place; see [`trim_nul`].
    pub fn read_text(&mut self, len: usize) -> Result<Vec<u8>> {
        self.read_bytes(len as u64)
    }

    /// Read exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        self.ensure(len)?;
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf)?;
        self.position += len;
        Ok(buf)
    }

    /// Consume the cursor, returning the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(buf.len() as u64)?;
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn ensure(&self, requested: u64) -> Result<()> {
        if requested > self.remaining() {
            return Err(self.out_of_range(requested));
        }
        Ok(())
    }

    fn out_of_range(&self, requested: u64) -> PakError {
        PakError::OutOfRange {
            requested,
            position: self.position,
            length: self.length,
        }
    }
}

/// Cut a text buffer at its first NUL byte
pub fn trim_nul(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|&b| b == 0) {
        Some(end) => &buf[..end],
        None => buf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_reads_advance() {
        let mut bytes = vec![0x7f];
        bytes.extend_from_slice(&0x1234u16.to_le_bytes());
        bytes.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(b"ab\0c");

        let mut cursor = BinaryCursor::from_bytes(bytes);
        assert_eq!(cursor.read_u8().unwrap(), 0x7f);
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(cursor.read_f32().unwrap(), 1.5);
        assert_eq!(cursor.read_text(4).unwrap(), b"ab\0c");
        assert!(!cursor.can_read());
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let mut cursor = BinaryCursor::from_bytes(vec![1, 2, 3]);
        cursor.forward(2).unwrap();
        match cursor.read_u32() {
            Err(PakError::OutOfRange {
                requested,
                position,
                length,
            }) => {
                assert_eq!((requested, position, length), (4, 2, 3));
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
        // Failed read must not move the cursor
        assert_eq!(cursor.position(), 2);
        assert!(cursor.forward(5).is_err());
    }

    #[test]
    fn test_text_keeps_terminator() {
        let mut cursor = BinaryCursor::from_bytes(b"a.txt\0zz".to_vec());
        let raw = cursor.read_text(8).unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(trim_nul(&raw), b"a.txt");
        assert_eq!(trim_nul(b"no-nul"), b"no-nul");
    }
}
