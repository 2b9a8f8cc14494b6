//! Stateless compression services.
//!
//! Per-entry codecs (LZ4, Zstd, LZSS) plus whole-stream gzip handling used
//! by the gzip tagged-record format.

mod gzip;
pub mod lzss;

pub use gzip::{gzip_bytes, unwrap_to_scratch};

use crate::entry::EntryFlags;
use crate::error::{PakError, Result};

/// Default Zstd level, balanced for archive payloads
pub const DEFAULT_ZSTD_LEVEL: i32 = 6;

/// Payloads below this size are stored uncompressed (4KB)
pub const MIN_COMPRESSION_SIZE: usize = 4096;

/// Per-entry payload codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Lz4,
    Zstd,
    Lzss,
}

impl CompressionMethod {
    /// Derive the codec from an entry's flags and compressed size.
    ///
    /// A negative compressed size means the payload is not independently
    /// compressed, unless a codec flag says otherwise.
    pub fn from_flags(flags: EntryFlags, compressed_size: i64) -> Self {
        if flags.contains(EntryFlags::RAW_DATA_FILE) {
            Self::None
        } else if flags.contains(EntryFlags::LZSS) {
            Self::Lzss
        } else if flags.contains(EntryFlags::CUSTOM_COMPRESSED) {
            Self::Zstd
        } else if compressed_size >= 0 {
            Self::Lz4
        } else {
            Self::None
        }
    }

    /// Flags that select this codec, to be merged into an entry's flags
    pub fn flags(self) -> EntryFlags {
        match self {
            Self::None | Self::Lz4 => EntryFlags::empty(),
            Self::Zstd => EntryFlags::CUSTOM_COMPRESSED,
            Self::Lzss => EntryFlags::LZSS,
        }
    }

    /// Choose a codec based on path and size
    pub fn choose_for_file(path: &str, size: usize, min_size: usize) -> Self {
        // Don't compress small files
        if size < min_size {
            return Self::None;
        }

        let extension = path.rsplit('.').next().unwrap_or("").to_lowercase();

        match extension.as_str() {
            // Already compressed formats
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "mp3" | "ogg" | "mp4" | "zip" | "gz"
            | "bz2" | "7z" | "pak" => Self::None,
            // Text formats - use Zstd for best compression
            "json" | "txt" | "xml" | "html" | "css" | "js" | "md" | "csv" | "ini" | "lua"
            | "cfg" => Self::Zstd,
            // Default: LZ4 for speed
            _ => Self::Lz4,
        }
    }
}

/// Compress `data` with `method`; `level` only affects Zstd
pub fn compress(data: &[u8], method: CompressionMethod, level: i32) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionMethod::Zstd => zstd::encode_all(data, level)
            .map_err(|e| PakError::CompressionFailed(format!("Zstd compression failed: {}", e))),
        CompressionMethod::Lzss => Ok(lzss::compress(data)),
    }
}

/// Decompress `data`, checking the result against `expected_size`
pub fn decompress(data: &[u8], method: CompressionMethod, expected_size: u64) -> Result<Vec<u8>> {
    let output = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Lz4 => lz4_flex::decompress_size_prepended(data).map_err(|e| {
            PakError::DecompressionFailed(format!("LZ4 decompression failed: {}", e))
        })?,
        CompressionMethod::Zstd => zstd::decode_all(data).map_err(|e| {
            PakError::DecompressionFailed(format!("Zstd decompression failed: {}", e))
        })?,
        CompressionMethod::Lzss => {
            let expected = usize::try_from(expected_size).map_err(|_| {
                PakError::DecompressionFailed(format!("declared size {} is too large", expected_size))
            })?;
            lzss::decompress(data, expected)?
        }
    };

    if output.len() as u64 != expected_size {
        return Err(PakError::DecompressionFailed(format!(
            "size mismatch: expected {}, got {}",
            expected_size,
            output.len()
        )));
    }
    Ok(output)
}

/// Compress, falling back to stored when compression does not help
pub fn compress_if_smaller(
    data: &[u8],
    method: CompressionMethod,
    level: i32,
) -> Result<(Vec<u8>, CompressionMethod)> {
    if method == CompressionMethod::None {
        return Ok((data.to_vec(), CompressionMethod::None));
    }
    let compressed = compress(data, method, level)?;
    if compressed.len() < data.len() {
        Ok((compressed, method))
    } else {
        Ok((data.to_vec(), CompressionMethod::None))
    }
}
