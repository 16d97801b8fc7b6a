//! On-disk section structures
//!
//! A segment file is a 13-byte file header followed by a chain of sections.
//! Every section starts with the same 76-byte header: a 16-byte null-padded
//! type string, the absolute offset of the next section, the section size,
//! 40 reserved bytes and a checksum over the first 72 bytes. The payload
//! codecs for the fixed-size sections live here; the segment writer decides
//! when and where they are emitted.

use crate::common::binary::{put_bytes, put_str, put_u16_le, put_u32_le, put_u64_le};
use crate::common::checksum::ewf_checksum;
use crate::format::{
    CompressionLevel, EwfFormat, SegmentFileType, DELTA_CHUNK_HEADER_SIZE, FILE_HEADER_SIZE,
    SECTION_HEADER_SIZE, SMART_VOLUME_SECTION_SIZE, VOLUME_SECTION_SIZE,
};
use crate::media::{AcquiryError, MediaValues, Session};

// =============================================================================
// Section Header
// =============================================================================

/// One 76-byte section header, ready to encode
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub section_type: &'static str,
    /// Absolute offset of the next section within the segment file
    pub next_offset: u64,
    /// Total section size including this header
    pub size: u64,
}

impl SectionHeader {
    /// Header for a section of `size` bytes starting at `start_offset`
    pub fn new(section_type: &'static str, start_offset: u64, size: u64) -> Self {
        Self {
            section_type,
            next_offset: start_offset + size,
            size,
        }
    }

    /// Header for a terminator section, which points at itself
    pub fn terminator(section_type: &'static str, start_offset: u64) -> Self {
        Self {
            section_type,
            next_offset: start_offset,
            size: SECTION_HEADER_SIZE,
        }
    }

    pub fn encode(&self) -> [u8; SECTION_HEADER_SIZE as usize] {
        let mut buffer = [0u8; SECTION_HEADER_SIZE as usize];
        put_str(&mut buffer, 0, 16, self.section_type);
        put_u64_le(&mut buffer, 16, self.next_offset);
        put_u64_le(&mut buffer, 24, self.size);
        let checksum = ewf_checksum(&buffer[0..72]);
        put_u32_le(&mut buffer, 72, checksum);
        buffer
    }
}

/// The 13-byte file header opening every segment file
pub fn encode_file_header(
    file_type: SegmentFileType,
    segment_number: u16,
) -> [u8; FILE_HEADER_SIZE as usize] {
    let mut buffer = [0u8; FILE_HEADER_SIZE as usize];
    put_bytes(&mut buffer, 0, file_type.signature());
    buffer[8] = 0x01;
    put_u16_le(&mut buffer, 9, segment_number);
    // fields end marker stays zero
    buffer
}

// =============================================================================
// Volume / Data Payloads
// =============================================================================

/// The 1052-byte volume payload of the E01 family
///
/// The same payload is re-emitted as the `data` section of segment files
/// after the first.
pub fn encode_volume(
    media: &MediaValues,
    compression_level: CompressionLevel,
) -> Vec<u8> {
    let mut buffer = vec![0u8; VOLUME_SECTION_SIZE as usize];
    buffer[0] = media.media_type;
    put_u32_le(&mut buffer, 4, media.amount_of_chunks);
    put_u32_le(&mut buffer, 8, media.sectors_per_chunk);
    put_u32_le(&mut buffer, 12, media.bytes_per_sector);
    put_u64_le(&mut buffer, 16, media.amount_of_sectors);
    put_u32_le(&mut buffer, 24, media.chs_cylinders);
    put_u32_le(&mut buffer, 28, media.chs_heads);
    put_u32_le(&mut buffer, 32, media.chs_sectors);
    put_u32_le(&mut buffer, 36, media.media_flags);
    put_u32_le(&mut buffer, 48, media.error_granularity);
    buffer[56] = compression_level.volume_byte();
    put_bytes(&mut buffer, 60, &media.set_identifier);
    let checksum = ewf_checksum(&buffer[0..1048]);
    put_u32_le(&mut buffer, 1048, checksum);
    buffer
}

/// The 94-byte smart volume payload of EWF-S01
pub fn encode_smart_volume(media: &MediaValues) -> Vec<u8> {
    let mut buffer = vec![0u8; SMART_VOLUME_SECTION_SIZE as usize];
    buffer[0] = 0x01;
    put_u32_le(&mut buffer, 4, media.amount_of_chunks);
    put_u32_le(&mut buffer, 8, media.sectors_per_chunk);
    put_u32_le(&mut buffer, 12, media.bytes_per_sector);
    put_u32_le(&mut buffer, 16, media.amount_of_sectors as u32);
    let checksum = ewf_checksum(&buffer[0..90]);
    put_u32_le(&mut buffer, 90, checksum);
    buffer
}

// =============================================================================
// Table Payloads
// =============================================================================

/// The 24-byte header opening a table payload
pub fn encode_table_header(amount_of_chunks: u32, base_offset: u64) -> [u8; 24] {
    let mut buffer = [0u8; 24];
    put_u32_le(&mut buffer, 0, amount_of_chunks);
    put_u64_le(&mut buffer, 8, base_offset);
    let checksum = ewf_checksum(&buffer[0..20]);
    put_u32_le(&mut buffer, 20, checksum);
    buffer
}

/// The offset array of a table payload, optionally followed by its checksum
pub fn encode_table_offsets(offsets: &[u32], with_checksum: bool) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(offsets.len() * 4 + 4);
    for &offset in offsets {
        buffer.extend_from_slice(&offset.to_le_bytes());
    }
    if with_checksum {
        let checksum = ewf_checksum(&buffer);
        buffer.extend_from_slice(&checksum.to_le_bytes());
    }
    buffer
}

// =============================================================================
// Delta Chunk Payload
// =============================================================================

/// The 18-byte header of a delta_chunk section
///
/// Chunk numbers are stored 1-based on disk. The data size covers the chunk
/// payload plus its trailing checksum.
pub fn encode_delta_chunk_header(
    chunk_index: u32,
    data_size: u32,
) -> [u8; DELTA_CHUNK_HEADER_SIZE as usize] {
    let mut buffer = [0u8; DELTA_CHUNK_HEADER_SIZE as usize];
    put_u32_le(&mut buffer, 0, chunk_index + 1);
    put_u32_le(&mut buffer, 4, data_size);
    put_bytes(&mut buffer, 8, b"DELTA\x00");
    let checksum = ewf_checksum(&buffer[0..14]);
    put_u32_le(&mut buffer, 14, checksum);
    buffer
}

// =============================================================================
// Hash / Digest Payloads
// =============================================================================

/// The 36-byte hash payload carrying the MD5 of the media
pub fn encode_hash(md5: &[u8; 16]) -> Vec<u8> {
    let mut buffer = vec![0u8; 36];
    put_bytes(&mut buffer, 0, md5);
    let checksum = ewf_checksum(&buffer[0..32]);
    put_u32_le(&mut buffer, 32, checksum);
    buffer
}

/// The 80-byte digest payload carrying MD5 and SHA1
pub fn encode_digest(md5: &[u8; 16], sha1: &[u8; 20]) -> Vec<u8> {
    let mut buffer = vec![0u8; 80];
    put_bytes(&mut buffer, 0, md5);
    put_bytes(&mut buffer, 16, sha1);
    let checksum = ewf_checksum(&buffer[0..76]);
    put_u32_le(&mut buffer, 76, checksum);
    buffer
}

// =============================================================================
// Error2 / Session Payloads
// =============================================================================

/// The error2 payload: header, error runs, checksum over the runs
pub fn encode_error2(errors: &[AcquiryError]) -> Vec<u8> {
    let mut buffer = vec![0u8; 520];
    put_u32_le(&mut buffer, 0, errors.len() as u32);
    let checksum = ewf_checksum(&buffer[0..516]);
    put_u32_le(&mut buffer, 516, checksum);

    let mut entries = Vec::with_capacity(errors.len() * 8);
    for error in errors {
        entries.extend_from_slice(&error.first_sector.to_le_bytes());
        entries.extend_from_slice(&error.amount_of_sectors.to_le_bytes());
    }
    let entries_checksum = ewf_checksum(&entries);
    buffer.extend_from_slice(&entries);
    buffer.extend_from_slice(&entries_checksum.to_le_bytes());
    buffer
}

/// The session payload: header, session entries, checksum over the entries
pub fn encode_session(sessions: &[Session]) -> Vec<u8> {
    let mut buffer = vec![0u8; 36];
    put_u32_le(&mut buffer, 0, sessions.len() as u32);
    let checksum = ewf_checksum(&buffer[0..32]);
    put_u32_le(&mut buffer, 32, checksum);

    let mut entries = Vec::with_capacity(sessions.len() * 16);
    for session in sessions {
        entries.extend_from_slice(&session.session_type.to_le_bytes());
        entries.extend_from_slice(&session.first_sector.to_le_bytes());
        entries.extend_from_slice(&[0u8; 8]);
    }
    let entries_checksum = ewf_checksum(&entries);
    buffer.extend_from_slice(&entries);
    buffer.extend_from_slice(&entries_checksum.to_le_bytes());
    buffer
}

/// The volume section type string for the given dialect
pub fn volume_section_type(ewf_format: EwfFormat, smart_disk_alias: bool) -> &'static str {
    match (ewf_format, smart_disk_alias) {
        (EwfFormat::S01, true) => "disk",
        _ => "volume",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::binary::get_u32_le;

    #[test]
    fn test_section_header_encoding() {
        let header = SectionHeader::new("sectors", 1000, 76 + 500);
        let encoded = header.encode();

        assert_eq!(&encoded[0..7], b"sectors");
        assert_eq!(encoded[7], 0);
        assert_eq!(
            u64::from_le_bytes(encoded[16..24].try_into().unwrap()),
            1576
        );
        assert_eq!(u64::from_le_bytes(encoded[24..32].try_into().unwrap()), 576);
        assert_eq!(get_u32_le(&encoded, 72), ewf_checksum(&encoded[0..72]));
    }

    #[test]
    fn test_terminator_points_at_itself() {
        let header = SectionHeader::terminator("done", 4096);
        let encoded = header.encode();
        assert_eq!(
            u64::from_le_bytes(encoded[16..24].try_into().unwrap()),
            4096
        );
        assert_eq!(u64::from_le_bytes(encoded[24..32].try_into().unwrap()), 76);
    }

    #[test]
    fn test_file_header() {
        let encoded = encode_file_header(SegmentFileType::Ewf, 3);
        assert_eq!(&encoded[0..8], b"EVF\x09\x0d\x0a\xff\x00");
        assert_eq!(encoded[8], 0x01);
        assert_eq!(u16::from_le_bytes([encoded[9], encoded[10]]), 3);
        assert_eq!(&encoded[11..13], &[0, 0]);
    }

    #[test]
    fn test_volume_payload_fields() {
        let media = MediaValues::new(64, 512, 1024 * 1024).unwrap();
        let payload = encode_volume(&media, CompressionLevel::Best);

        assert_eq!(payload.len(), 1052);
        assert_eq!(get_u32_le(&payload, 4), 32); // chunk count
        assert_eq!(get_u32_le(&payload, 8), 64);
        assert_eq!(get_u32_le(&payload, 12), 512);
        assert_eq!(
            u64::from_le_bytes(payload[16..24].try_into().unwrap()),
            2048
        );
        assert_eq!(payload[56], 2);
        assert_eq!(get_u32_le(&payload, 1048), ewf_checksum(&payload[0..1048]));
    }

    #[test]
    fn test_table_offsets_checksum() {
        let offsets = [100u32, 0x8000_0200, 300];
        let with = encode_table_offsets(&offsets, true);
        let without = encode_table_offsets(&offsets, false);

        assert_eq!(without.len(), 12);
        assert_eq!(with.len(), 16);
        assert_eq!(&with[..12], &without[..]);
        assert_eq!(get_u32_le(&with, 12), ewf_checksum(&without));
    }

    #[test]
    fn test_delta_chunk_header() {
        let encoded = encode_delta_chunk_header(4, 32772);
        assert_eq!(get_u32_le(&encoded, 0), 5); // 1-based on disk
        assert_eq!(get_u32_le(&encoded, 4), 32772);
        assert_eq!(&encoded[8..14], b"DELTA\x00");
        assert_eq!(get_u32_le(&encoded, 14), ewf_checksum(&encoded[0..14]));
    }

    #[test]
    fn test_error2_entries() {
        let errors = [
            AcquiryError {
                first_sector: 100,
                amount_of_sectors: 8,
            },
            AcquiryError {
                first_sector: 2048,
                amount_of_sectors: 1,
            },
        ];
        let payload = encode_error2(&errors);
        assert_eq!(payload.len(), 520 + 16 + 4);
        assert_eq!(get_u32_le(&payload, 0), 2);
        assert_eq!(get_u32_le(&payload, 520), 100);
        assert_eq!(get_u32_le(&payload, 528), 2048);
    }
}
