//! Capacity planning for segment files and chunks sections
//!
//! Pure integer arithmetic over the write state: how many chunks the current
//! segment file can hold, how many the next chunks section may take, and
//! when either of them is full. Per-section overhead differs per format and
//! is centralized here.

use tracing::trace;

use crate::error::{EwfError, EwfResult};
use crate::format::{
    EwfFormat, Format, CHECKSUM_SIZE, SECTION_HEADER_SIZE, TABLE_OFFSET_SIZE,
};
use crate::media::MediaValues;

/// Average per-chunk deflate overhead assumed for always-compressed images
const S01_CHUNK_OVERHEAD: u64 = 16;

/// Estimate the total amount of chunks that fit within the current segment
/// file, including the chunks it already holds
#[allow(clippy::too_many_arguments)]
pub fn chunks_per_segment(
    remaining_segment_file_size: i64,
    maximum_section_chunks: u32,
    segment_chunks: u32,
    total_chunks: u32,
    media: &MediaValues,
    format: Format,
    ewf_format: EwfFormat,
    unrestrict_offset_table: bool,
) -> EwfResult<u32> {
    if maximum_section_chunks == 0 {
        return Err(EwfError::InvalidArgument(
            "maximum section chunks cannot be zero".to_string(),
        ));
    }
    let remaining = remaining_segment_file_size.max(0) as u64;

    let per_chunk = if ewf_format == EwfFormat::S01 {
        u64::from(media.chunk_size) + S01_CHUNK_OVERHEAD
    } else {
        u64::from(media.chunk_size) + CHECKSUM_SIZE
    };

    // Upper bound ignoring section framing
    let maximum_chunks = (remaining / per_chunk) as i64;

    let required_sections = if unrestrict_offset_table {
        1
    } else {
        maximum_chunks % i64::from(maximum_section_chunks)
    };

    // Reserve the section framing and offset table space these chunks need
    let mut budget = remaining as i64;
    match (ewf_format, format) {
        (EwfFormat::S01, _) => {
            budget -= required_sections * SECTION_HEADER_SIZE as i64;
            budget -= maximum_chunks * TABLE_OFFSET_SIZE as i64;
        }
        (_, Format::Encase1) => {
            budget -= required_sections * (SECTION_HEADER_SIZE + CHECKSUM_SIZE) as i64;
            budget -= maximum_chunks * TABLE_OFFSET_SIZE as i64;
        }
        _ => {
            budget -=
                required_sections * (3 * SECTION_HEADER_SIZE + 2 * CHECKSUM_SIZE) as i64;
            budget -= 2 * maximum_chunks * TABLE_OFFSET_SIZE as i64;
        }
    }

    let mut calculated = budget / per_chunk as i64;

    // With a known input size, no segment needs more than what remains
    if media.media_size > 0 {
        let remaining_chunks = i64::from(media.amount_of_chunks) - i64::from(total_chunks);
        if remaining_chunks < calculated {
            calculated = remaining_chunks;
        }
    }
    // Return the total for the segment, not the delta
    if segment_chunks > 0 {
        calculated += i64::from(segment_chunks);
    }
    if calculated > i64::from(u32::MAX) {
        calculated = i64::from(u32::MAX);
    }
    Ok(calculated.max(0) as u32)
}

/// The amount of chunks the next chunks section may hold
pub fn chunks_per_chunks_section(
    maximum_section_chunks: u32,
    chunks_per_segment: u32,
    chunks_section_number: u32,
    unrestrict_offset_table: bool,
) -> EwfResult<u32> {
    if maximum_section_chunks == 0 {
        return Err(EwfError::InvalidArgument(
            "maximum section chunks cannot be zero".to_string(),
        ));
    }
    if chunks_section_number == 0 {
        return Err(EwfError::InvalidArgument(
            "chunks section number must be one-based".to_string(),
        ));
    }
    let mut remaining = i64::from(chunks_per_segment);
    if chunks_section_number > 1 {
        remaining -= i64::from(chunks_section_number - 1) * i64::from(maximum_section_chunks);
    }
    if remaining <= 0 {
        return Err(EwfError::InvalidArgument(format!(
            "no chunks remain for chunks section {}",
            chunks_section_number
        )));
    }
    if !unrestrict_offset_table && remaining > i64::from(maximum_section_chunks) {
        remaining = i64::from(maximum_section_chunks);
    }
    if remaining > i64::from(i32::MAX) {
        remaining = i64::from(i32::MAX);
    }
    Ok(remaining as u32)
}

/// Whether the current segment file has no room for another chunk
#[allow(clippy::too_many_arguments)]
pub fn segment_file_full(
    remaining_segment_file_size: i64,
    segment_chunks: u32,
    media: &MediaValues,
    input_write_count: i64,
    chunks_per_segment: u32,
    total_chunks: u32,
    format: Format,
    ewf_format: EwfFormat,
) -> bool {
    // All required chunks have been written
    if media.amount_of_chunks != 0 && media.amount_of_chunks == total_chunks {
        trace!("All required chunks have been written");
        return true;
    }
    // All required input has been consumed
    if media.media_size != 0 && input_write_count >= media.media_size as i64 {
        trace!("All required data has been written");
        return true;
    }
    // These formats commit to the precalculated chunk count
    if ewf_format == EwfFormat::S01 || format == Format::Encase1 {
        if segment_chunks >= chunks_per_segment {
            trace!(segment_chunks, chunks_per_segment, "Segment chunk budget reached");
            return true;
        }
    } else if remaining_segment_file_size
        < i64::from(media.chunk_size) + CHECKSUM_SIZE as i64
    {
        trace!(remaining_segment_file_size, "No space left for another chunk");
        return true;
    }
    false
}

/// Whether the open chunks section has no room for another chunk
#[allow(clippy::too_many_arguments)]
pub fn chunks_section_full(
    chunks_section_offset: u64,
    remaining_segment_file_size: i64,
    media: &MediaValues,
    input_write_count: i64,
    segment_file_offset: u64,
    maximum_section_chunks: u32,
    section_chunks: u32,
    total_chunks: u32,
    chunks_per_chunks_section: u32,
    format: Format,
    ewf_format: EwfFormat,
    unrestrict_offset_table: bool,
) -> bool {
    // No chunks section has been opened
    if chunks_section_offset == 0 {
        return false;
    }
    if media.amount_of_chunks != 0 && media.amount_of_chunks == total_chunks {
        trace!("All required chunks have been written");
        return true;
    }
    if media.media_size != 0 && input_write_count >= media.media_size as i64 {
        trace!("All required data has been written");
        return true;
    }
    if !unrestrict_offset_table && section_chunks >= maximum_section_chunks {
        trace!(section_chunks, "Section chunk cap reached");
        return true;
    }
    // Chunk counts must stay addressable in 31 bits
    if section_chunks > i32::MAX as u32 {
        trace!("Preventing section chunk overflow");
        return true;
    }
    // Relative offsets must stay addressable in 31 bits
    if segment_file_offset.saturating_sub(chunks_section_offset) > i32::MAX as u64 {
        trace!("Preventing table offset overflow");
        return true;
    }
    // These formats do not allow the offset table to grow
    if ewf_format == EwfFormat::S01 || format == Format::Encase1 {
        if section_chunks >= chunks_per_chunks_section {
            trace!(section_chunks, chunks_per_chunks_section, "Section budget reached");
            return true;
        }
    } else if remaining_segment_file_size
        < i64::from(media.chunk_size) + CHECKSUM_SIZE as i64
    {
        trace!(remaining_segment_file_size, "No space left for another chunk");
        return true;
    }
    false
}
