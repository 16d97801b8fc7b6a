//! EWF (Expert Witness Format) write engine
//!
//! This crate writes segmented EWF forensic disk images: the E01 family
//! produced by EnCase 1 through 6, linen and FTK, the always-compressed
//! EWF-S01 dialect written by SMART, and the libewf extended format. It also
//! writes delta segment files, a parallel chain carrying chunk overwrites
//! that leaves the primary image untouched.
//!
//! ## Segment File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ EVF Signature + segment number (13 bytes)                    │
//! │  - primary: "EVF\x09\x0d\x0a\xff\x00"                        │
//! │  - delta:   "DVF\x09\x0d\x0a\xff\x00"                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Section Chain (each with a 76-byte checksummed header)       │
//! │  ┌─────────────────────────────────────────────────────────┐ │
//! │  │ header/header2/xheader: case info (zlib compressed)     │ │
//! │  │ volume: chunk count, sector geometry, compression       │ │
//! │  │ sectors: chunk payloads (raw+checksum or zlib streams)  │ │
//! │  │ table/table2: 32-bit chunk offsets, bit 31 = compressed │ │
//! │  │ error2/session/hash/digest: acquiry metadata            │ │
//! │  │ next/done: terminator (next = more segments follow)     │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunk payloads are laid out across segment files by a capacity planner
//! that estimates, before each chunk, how many more the current segment and
//! chunks section can hold given compression, per-section framing and the
//! format's 32-bit offset limits. Once a section closes, its header is
//! rewritten with the real size (the correction pass) and the offset tables
//! are emitted.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ewf_writer::{EwfWriter, WriterConfig, MediaValues, HeaderValues};
//!
//! let media = MediaValues::new(64, 512, 0)?;
//! let mut writer = EwfWriter::create(
//!     "/cases/evidence/drive",
//!     WriterConfig::default(),
//!     media,
//!     HeaderValues::default(),
//! )?;
//!
//! let chunk = vec![0u8; 32768];
//! writer.write_chunk(0, &chunk)?;
//! writer.finalize()?;
//! # Ok::<(), ewf_writer::EwfError>(())
//! ```

pub mod common;

mod chunk;
mod error;
mod format;
mod headers;
mod media;
mod offset_table;
mod planner;
mod sections;
mod segment_file;
mod writer;

// Re-export the public API
pub use chunk::{is_empty_block, ChunkProcessor, PreparedChunk, PreparedSource};
pub use error::{EwfError, EwfResult};
pub use format::{
    CompressionLevel, EwfFormat, Format, SegmentFileType, WriterConfig,
    DEFAULT_SEGMENT_FILE_SIZE, MAXIMUM_OFFSETS_IN_TABLE,
};
pub use headers::{HashValues, HeaderValues};
pub use media::{
    AcquiryError, MediaValues, Session, MEDIA_FLAG_PHYSICAL, MEDIA_TYPE_FIXED,
    MEDIA_TYPE_OPTICAL, MEDIA_TYPE_REMOVABLE,
};
pub use writer::{EwfWriter, ImageWriteInfo};
