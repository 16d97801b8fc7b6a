//! Error types for the EWF write engine

use std::fmt;
use std::io;

/// Result type alias for write-engine operations
pub type EwfResult<T> = Result<T, EwfError>;

/// Errors that can occur while writing an EWF image
#[derive(Debug)]
pub enum EwfError {
    /// Invalid caller-supplied value (bad buffer size, illegal chunk index, ...)
    InvalidArgument(String),
    /// A value exceeds a hard format limit (32-bit offsets, segment counts, ...)
    ExceedsMaximum(String),
    /// Primary write to a chunk index that already has an offset-table entry
    AlreadyWritten(u32),
    /// Compression failed even after growing the compression cache
    CompressionFailed(String),
    /// Underlying file I/O failure, tagged with the operation and file offset
    Io {
        operation: &'static str,
        offset: Option<u64>,
        source: io::Error,
    },
    /// Operation not supported by the format (e.g. compressed delta chunks)
    Unsupported(String),
}

impl fmt::Display for EwfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EwfError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            EwfError::ExceedsMaximum(msg) => write!(f, "Value exceeds maximum: {}", msg),
            EwfError::AlreadyWritten(chunk) => {
                write!(f, "Chunk {} has already been written", chunk)
            }
            EwfError::CompressionFailed(msg) => write!(f, "Compression failed: {}", msg),
            EwfError::Io {
                operation,
                offset,
                source,
            } => match offset {
                Some(offset) => {
                    write!(f, "I/O error during {} at offset {}: {}", operation, offset, source)
                }
                None => write!(f, "I/O error during {}: {}", operation, source),
            },
            EwfError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for EwfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EwfError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for EwfError {
    fn from(err: io::Error) -> Self {
        EwfError::Io {
            operation: "io",
            offset: None,
            source: err,
        }
    }
}

impl EwfError {
    /// Wrap an I/O error with an operation tag and the file offset it occurred at
    pub(crate) fn io(operation: &'static str, offset: u64, source: io::Error) -> Self {
        EwfError::Io {
            operation,
            offset: Some(offset),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_io_with_offset() {
        let err = EwfError::io(
            "write chunk data",
            1024,
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        let text = err.to_string();
        assert!(text.contains("write chunk data"));
        assert!(text.contains("1024"));
    }

    #[test]
    fn test_display_already_written() {
        assert_eq!(
            EwfError::AlreadyWritten(7).to_string(),
            "Chunk 7 has already been written"
        );
    }
}
