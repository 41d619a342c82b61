//! Error types for zipedit

use std::io;

/// Result type for zipedit operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error types that can occur during archive operations
#[derive(Debug)]
pub enum ZipError {
    /// EOCD not found, header parse failure, or a read failure during the
    /// central directory scan
    UnreadableArchive(String),
    /// Target not writable, already exists on create, or a structural limit
    /// was hit while writing
    UnwritableArchive(String),
    /// Checksum mismatch after extraction
    InvalidCrc32 {
        /// CRC-32 recorded in the central directory
        expected: u32,
        /// CRC-32 computed over the extracted bytes
        actual: u32,
    },
    /// Empty or unusable entry path
    InvalidEntryPath(String),
    /// Cancellation observed between buffered chunks
    Cancelled,
    /// Backing-level read failure
    UnreadableFile(io::Error),
    /// Backing-level write failure
    UnwritableFile(io::Error),
}

impl std::fmt::Display for ZipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipError::UnreadableArchive(msg) => write!(f, "unreadable archive: {}", msg),
            ZipError::UnwritableArchive(msg) => write!(f, "unwritable archive: {}", msg),
            ZipError::InvalidCrc32 { expected, actual } => {
                write!(
                    f,
                    "CRC-32 mismatch: expected 0x{:08X}, computed 0x{:08X}",
                    expected, actual
                )
            }
            ZipError::InvalidEntryPath(path) => write!(f, "invalid entry path: {}", path),
            ZipError::Cancelled => write!(f, "operation cancelled"),
            ZipError::UnreadableFile(e) => write!(f, "read failure: {}", e),
            ZipError::UnwritableFile(e) => write!(f, "write failure: {}", e),
        }
    }
}

impl std::error::Error for ZipError {}
