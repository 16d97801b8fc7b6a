//! Media values describing the imaged device
//!
//! These values are fixed before the first chunk is written and are read-only
//! for the rest of the write: the capacity planner, the volume section and
//! the chunk processor all derive from them.

use serde::Serialize;

use crate::error::{EwfError, EwfResult};

/// Media is a fixed disk unless the caller says otherwise
pub const MEDIA_TYPE_REMOVABLE: u8 = 0x00;
pub const MEDIA_TYPE_FIXED: u8 = 0x01;
pub const MEDIA_TYPE_OPTICAL: u8 = 0x03;

/// Physical-device flag stored in the volume section
pub const MEDIA_FLAG_PHYSICAL: u32 = 0x02;

/// Geometry and size of the source media
#[derive(Debug, Clone, Serialize)]
pub struct MediaValues {
    pub media_type: u8,
    pub media_flags: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    /// Total size of the source in bytes; 0 = unknown until finalize
    pub media_size: u64,
    /// Derived: sectors_per_chunk * bytes_per_sector
    pub chunk_size: u32,
    /// Derived from media_size; 0 when the size is unknown
    pub amount_of_sectors: u64,
    /// Derived from media_size; 0 when the size is unknown
    pub amount_of_chunks: u32,
    pub chs_cylinders: u32,
    pub chs_heads: u32,
    pub chs_sectors: u32,
    pub error_granularity: u32,
    /// Set identifier GUID stored in the volume section
    pub set_identifier: [u8; 16],
}

impl MediaValues {
    /// Build media values from geometry, deriving chunk size and counts
    ///
    /// A `media_size` of 0 means the input size is unknown; the chunk and
    /// sector counts are back-patched into the volume section at finalize.
    pub fn new(sectors_per_chunk: u32, bytes_per_sector: u32, media_size: u64) -> EwfResult<Self> {
        if sectors_per_chunk == 0 || bytes_per_sector == 0 {
            return Err(EwfError::InvalidArgument(
                "sectors per chunk and bytes per sector cannot be zero".to_string(),
            ));
        }
        let chunk_size = sectors_per_chunk
            .checked_mul(bytes_per_sector)
            .ok_or_else(|| {
                EwfError::ExceedsMaximum("chunk size overflows 32 bits".to_string())
            })?;

        let mut values = Self {
            media_type: MEDIA_TYPE_FIXED,
            media_flags: MEDIA_FLAG_PHYSICAL,
            sectors_per_chunk,
            bytes_per_sector,
            media_size,
            chunk_size,
            amount_of_sectors: 0,
            amount_of_chunks: 0,
            chs_cylinders: 0,
            chs_heads: 0,
            chs_sectors: 0,
            error_granularity: sectors_per_chunk,
            set_identifier: [0u8; 16],
        };
        values.derive_counts()?;
        Ok(values)
    }

    /// Recompute the derived sector and chunk counts from media_size
    pub(crate) fn derive_counts(&mut self) -> EwfResult<()> {
        if self.media_size == 0 {
            self.amount_of_sectors = 0;
            self.amount_of_chunks = 0;
            return Ok(());
        }
        let bytes_per_sector = u64::from(self.bytes_per_sector);
        let chunk_size = u64::from(self.chunk_size);

        self.amount_of_sectors = self.media_size.div_ceil(bytes_per_sector);
        let chunks = self.media_size.div_ceil(chunk_size);
        if chunks > u64::from(u32::MAX) {
            return Err(EwfError::ExceedsMaximum(format!(
                "media requires {} chunks, more than 32 bits can address",
                chunks
            )));
        }
        self.amount_of_chunks = chunks as u32;
        Ok(())
    }
}

/// One run of unreadable sectors, stored in the error2 section
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AcquiryError {
    pub first_sector: u32,
    pub amount_of_sectors: u32,
}

/// One optical-media session, stored in the session section
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Session {
    pub session_type: u32,
    pub first_sector: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_counts() {
        let media = MediaValues::new(64, 512, 1024 * 1024).unwrap();
        assert_eq!(media.chunk_size, 32768);
        assert_eq!(media.amount_of_sectors, 2048);
        assert_eq!(media.amount_of_chunks, 32);
    }

    #[test]
    fn test_partial_final_chunk_rounds_up() {
        let media = MediaValues::new(64, 512, 32768 + 100).unwrap();
        assert_eq!(media.amount_of_chunks, 2);
        assert_eq!(media.amount_of_sectors, 65);
    }

    #[test]
    fn test_unknown_media_size() {
        let media = MediaValues::new(64, 512, 0).unwrap();
        assert_eq!(media.amount_of_chunks, 0);
        assert_eq!(media.amount_of_sectors, 0);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(MediaValues::new(0, 512, 0).is_err());
        assert!(MediaValues::new(64, 0, 0).is_err());
    }
}
