//! Format discriminants and on-disk constants for EWF segment files

use serde::Serialize;

use crate::error::{EwfError, EwfResult};

// =============================================================================
// Core Constants
// =============================================================================

/// Signature of a primary (EWF) segment file
pub const EWF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
/// Signature of a delta (DWF) segment file
pub const DWF_SIGNATURE: &[u8; 8] = b"DVF\x09\x0d\x0a\xff\x00";

/// File header: signature + fields start byte + u16 segment number + u16 fields end
pub const FILE_HEADER_SIZE: u64 = 13;
/// 16-byte type + u64 next offset + u64 size + 40 reserved + u32 checksum
pub const SECTION_HEADER_SIZE: u64 = 76;
/// Every checksum in the format is 4 bytes
pub const CHECKSUM_SIZE: u64 = 4;
/// Offsets in table sections are 32-bit
pub const TABLE_OFFSET_SIZE: u64 = 4;
/// u32 chunk count + padding + u64 base offset + padding + u32 checksum
pub const TABLE_HEADER_SIZE: u64 = 24;
/// u32 chunk number + u32 data size + "DELTA\0" + u32 checksum
pub const DELTA_CHUNK_HEADER_SIZE: u64 = 18;
/// Volume and data section payload size (E01 family)
pub const VOLUME_SECTION_SIZE: u64 = 1052;
/// Volume section payload size (EWF-S01)
pub const SMART_VOLUME_SECTION_SIZE: u64 = 94;

/// Bit 31 of a table offset marks the chunk as compressed
pub const COMPRESSED_OFFSET_BIT: u32 = 0x8000_0000;

/// Default target size of one segment file (CD-friendly splits)
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 1440 * 1024 * 1024;
/// Smallest configurable segment file size
pub const MINIMUM_SEGMENT_FILE_SIZE: u64 = 1024 * 1024;
/// Hard cap for primary segment files (legacy 32-bit offset safety)
pub const MAXIMUM_SEGMENT_FILE_SIZE: u64 = i32::MAX as u64;
/// Hard cap for delta segment files
pub const MAXIMUM_DELTA_SEGMENT_FILE_SIZE: u64 = i64::MAX as u64;
/// Default cap on the number of offsets in one table section
pub const MAXIMUM_OFFSETS_IN_TABLE: u32 = 16375;
/// Most segment files one naming chain can address (.E01..E99, .Ex01..)
pub const MAXIMUM_SEGMENT_FILES: u16 = 999;

// =============================================================================
// Format Discriminants
// =============================================================================

/// The two on-disk dialects of EWF version 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EwfFormat {
    /// SMART-style images: always compressed, single interleaved table section
    S01,
    /// EnCase-style images: sectors section plus trailing offset tables
    E01,
}

/// Acquisition tool dialect, selecting section sequences and overhead rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    /// Original EWF as written by early SMART releases
    Ewf,
    /// ASR Data SMART
    Smart,
    /// libewf extended format
    Ewfx,
    /// Linux EnCase (linen)
    Linen,
    /// FTK Imager
    Ftk,
}

impl Format {
    /// The on-disk dialect this tool format writes
    pub fn ewf_format(self) -> EwfFormat {
        match self {
            Format::Ewf | Format::Smart => EwfFormat::S01,
            _ => EwfFormat::E01,
        }
    }

    /// EnCase 1 shares the S01 capacity rules but the E01 section layout
    pub fn is_encase1(self) -> bool {
        self == Format::Encase1
    }

    /// Formats that carry a digest section (SHA1) next to the MD5 hash section
    pub fn supports_digest(self) -> bool {
        matches!(self, Format::Encase6 | Format::Ewfx)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Format::Encase1 => "encase1",
            Format::Encase2 => "encase2",
            Format::Encase3 => "encase3",
            Format::Encase4 => "encase4",
            Format::Encase5 => "encase5",
            Format::Encase6 => "encase6",
            Format::Ewf => "ewf",
            Format::Smart => "smart",
            Format::Ewfx => "ewfx",
            Format::Linen => "linen",
            Format::Ftk => "ftk",
        };
        write!(f, "{}", name)
    }
}

/// Compression applied to chunk payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionLevel {
    None,
    Default,
    Fast,
    Best,
}

impl CompressionLevel {
    pub(crate) fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }

    /// The level byte stored in the volume section
    pub(crate) fn volume_byte(self) -> u8 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Default | CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        }
    }
}

/// Whether a segment file belongs to the primary or the delta chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentFileType {
    /// Primary segment file (.E01 / .s01 chain)
    Ewf,
    /// Delta segment file (.d01 chain) carrying chunk overwrites
    Dwf,
}

impl SegmentFileType {
    pub(crate) fn signature(self) -> &'static [u8; 8] {
        match self {
            SegmentFileType::Ewf => EWF_SIGNATURE,
            SegmentFileType::Dwf => DWF_SIGNATURE,
        }
    }
}

// =============================================================================
// Writer Configuration
// =============================================================================

/// Caller-facing configuration of one image write
#[derive(Debug, Clone, Serialize)]
pub struct WriterConfig {
    pub format: Format,
    pub compression_level: CompressionLevel,
    /// Promote uniform chunks to compressed storage even at level none
    pub compress_empty_block: bool,
    /// Target size of one primary segment file
    pub segment_file_size: u64,
    /// Target size of one delta segment file
    pub delta_segment_file_size: u64,
    /// Cap on chunks per chunks section
    pub maximum_section_chunks: u32,
    /// Ignore the per-section chunk cap (single growing table)
    pub unrestrict_offset_table: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            format: Format::Encase5,
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            delta_segment_file_size: MAXIMUM_DELTA_SEGMENT_FILE_SIZE,
            maximum_section_chunks: MAXIMUM_OFFSETS_IN_TABLE,
            unrestrict_offset_table: false,
        }
    }
}

impl WriterConfig {
    /// The on-disk dialect selected by the configured format
    pub fn ewf_format(&self) -> EwfFormat {
        self.format.ewf_format()
    }

    /// Validate the configured limits against the format's hard caps
    pub fn validate(&self) -> EwfResult<()> {
        if self.segment_file_size < MINIMUM_SEGMENT_FILE_SIZE {
            return Err(EwfError::InvalidArgument(format!(
                "segment file size {} below minimum {}",
                self.segment_file_size, MINIMUM_SEGMENT_FILE_SIZE
            )));
        }
        if self.segment_file_size > MAXIMUM_SEGMENT_FILE_SIZE {
            return Err(EwfError::ExceedsMaximum(format!(
                "segment file size {} above maximum {}",
                self.segment_file_size, MAXIMUM_SEGMENT_FILE_SIZE
            )));
        }
        if self.delta_segment_file_size < MINIMUM_SEGMENT_FILE_SIZE
            || self.delta_segment_file_size > MAXIMUM_DELTA_SEGMENT_FILE_SIZE
        {
            return Err(EwfError::InvalidArgument(format!(
                "delta segment file size {} out of range",
                self.delta_segment_file_size
            )));
        }
        if self.maximum_section_chunks == 0 {
            return Err(EwfError::InvalidArgument(
                "maximum section chunks cannot be zero".to_string(),
            ));
        }
        if self.maximum_section_chunks > i32::MAX as u32 {
            return Err(EwfError::ExceedsMaximum(format!(
                "maximum section chunks {} above maximum {}",
                self.maximum_section_chunks,
                i32::MAX
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewf_format_mapping() {
        assert_eq!(Format::Smart.ewf_format(), EwfFormat::S01);
        assert_eq!(Format::Ewf.ewf_format(), EwfFormat::S01);
        assert_eq!(Format::Encase1.ewf_format(), EwfFormat::E01);
        assert_eq!(Format::Ewfx.ewf_format(), EwfFormat::E01);
    }

    #[test]
    fn test_config_validation() {
        let mut config = WriterConfig::default();
        assert!(config.validate().is_ok());

        config.segment_file_size = 1024;
        assert!(config.validate().is_err());

        config.segment_file_size = DEFAULT_SEGMENT_FILE_SIZE;
        config.maximum_section_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signatures() {
        assert_eq!(SegmentFileType::Ewf.signature()[0], b'E');
        assert_eq!(SegmentFileType::Dwf.signature()[0], b'D');
        assert_eq!(&EWF_SIGNATURE[3..], &[0x09, 0x0d, 0x0a, 0xff, 0x00]);
    }
}
