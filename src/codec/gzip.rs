use crate::error::{PakError, Result};
use crate::progress::ParseContext;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const CHUNK_SIZE: usize = 64 * 1024;

/// Counts bytes pulled from the compressed source, for progress reporting
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Decompress a whole gzip file into a fresh scratch file.
///
/// Progress is published against the compressed input position. The scratch
/// file is deleted when the returned handle is dropped.
pub fn unwrap_to_scratch(
    source: &Path,
    scratch_dir: Option<&Path>,
    ctx: &mut ParseContext<'_>,
) -> Result<NamedTempFile> {
    let file = File::open(source)?;
    let compressed_len = file.metadata()?.len();
    let mut decoder = MultiGzDecoder::new(BufReader::new(CountingReader {
        inner: file,
        count: 0,
    }));

    let mut scratch = match scratch_dir {
        Some(dir) => tempfile::Builder::new().prefix("pakvault-").tempfile_in(dir)?,
        None => tempfile::Builder::new().prefix("pakvault-").tempfile()?,
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| PakError::Format(format!("gzip stream is corrupt: {}", e)))?;
        if n == 0 {
            break;
        }
        scratch.write_all(&buf[..n])?;
        total += n as u64;
        ctx.checkpoint(decoder.get_ref().get_ref().count, compressed_len)?;
    }
    scratch.flush()?;
    ctx.finish_band();

    tracing::debug!(
        source = %source.display(),
        compressed = compressed_len,
        decompressed = total,
        scratch = %scratch.path().display(),
        "unwrapped gzip stream"
    );
    Ok(scratch)
}

/// Gzip-wrap a complete buffer
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Seek;

    #[test]
    fn test_unwrap_restores_payload() {
        let payload = b"gzip scratch payload ".repeat(5000);
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(&gzip_bytes(&payload).unwrap()).unwrap();
        source.flush().unwrap();

        let sink = NoProgress;
        let mut ctx = ParseContext::new(&sink);
        let mut scratch = unwrap_to_scratch(source.path(), None, &mut ctx).unwrap();

        let mut restored = Vec::new();
        scratch.rewind().unwrap();
        scratch.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_not_gzip_is_format_error() {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(b"definitely not gzip").unwrap();
        source.flush().unwrap();

        let sink = NoProgress;
        let mut ctx = ParseContext::new(&sink);
        let result = unwrap_to_scratch(source.path(), None, &mut ctx);
        assert!(matches!(result, Err(PakError::Format(_))));
    }
}
