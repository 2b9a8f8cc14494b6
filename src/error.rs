use std::io;
use thiserror::Error;

/// Result type for pakvault operations
pub type Result<T> = std::result::Result<T, PakError>;

/// Unified error type for all pakvault operations
#[derive(Debug, Error)]
pub enum PakError {
    // Format errors
    #[error("Invalid archive format: {0}")]
    Format(String),

    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Read out of range: {requested} bytes at position {position} (length {length})")]
    OutOfRange {
        requested: u64,
        position: u64,
        length: u64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Entry errors
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Entry already exists: {0}")]
    DuplicateEntry(String),

    #[error("Path error: {0}")]
    PathError(String),

    // Codec errors
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("CRC mismatch: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    // Crypto errors
    #[error("Missing key for encrypted entry: {0}")]
    MissingKey(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    // Lifecycle errors
    #[error("Container is not usable in state {0:?}")]
    InvalidState(crate::container::ContainerState),

    #[error("Archive partially written, manual repair required: {0}")]
    PartialWrite(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`PakError`], cheap to copy and compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    UnsupportedOperation,
    OutOfRange,
    Cancelled,
    Entry,
    Codec,
    Crypto,
    State,
    Config,
    Io,
}

impl PakError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PakError::Format(_) | PakError::UnsupportedVersion(_) | PakError::CrcMismatch { .. } => {
                ErrorKind::Format
            }
            PakError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            PakError::OutOfRange { .. } => ErrorKind::OutOfRange,
            PakError::Cancelled => ErrorKind::Cancelled,
            PakError::EntryNotFound(_) | PakError::DuplicateEntry(_) | PakError::PathError(_) => {
                ErrorKind::Entry
            }
            PakError::CompressionFailed(_) | PakError::DecompressionFailed(_) => ErrorKind::Codec,
            PakError::MissingKey(_) | PakError::DecryptionFailed | PakError::EncryptionFailed => {
                ErrorKind::Crypto
            }
            PakError::InvalidState(_) | PakError::PartialWrite(_) => ErrorKind::State,
            PakError::Config(_) => ErrorKind::Config,
            PakError::Io(_) => ErrorKind::Io,
        }
    }

    /// True for errors that mean "the bytes are not what we expected"
    pub fn is_data_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Format | ErrorKind::OutOfRange)
    }
}

impl From<toml::de::Error> for PakError {
    fn from(err: toml::de::Error) -> Self {
        PakError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PakError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(PakError::Format("x".into()).kind(), ErrorKind::Format);
        let oor = PakError::OutOfRange {
            requested: 4,
            position: 10,
            length: 12,
        };
        assert_eq!(oor.kind(), ErrorKind::OutOfRange);
        assert!(oor.is_data_error());
        assert!(!PakError::Cancelled.is_data_error());
    }

    #[test]
    fn test_out_of_range_message() {
        let err = PakError::OutOfRange {
            requested: 4,
            position: 10,
            length: 12,
        };
        assert_eq!(
            err.to_string(),
            "Read out of range: 4 bytes at position 10 (length 12)"
        );
    }
}
