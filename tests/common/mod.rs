//! Shared test infrastructure: a minimal, independent EWF reader.
//!
//! The round-trip tests verify written images with this module instead of
//! the writer's own structures: it walks the section chain from the raw
//! bytes, parses the offset tables and reassembles the chunk payloads.

use std::fs;
use std::path::Path;

use flate2::read::ZlibDecoder;
use std::io::Read;

pub const SECTION_HEADER_SIZE: usize = 76;
pub const FILE_HEADER_SIZE: usize = 13;
pub const DELTA_CHUNK_HEADER_SIZE: usize = 18;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone)]
pub struct Section {
    pub section_type: String,
    pub offset: u64,
    pub size: u64,
    pub next_offset: u64,
    pub checksum: u32,
}

#[derive(Debug)]
pub struct ParsedSegment {
    pub signature: [u8; 8],
    pub segment_number: u16,
    pub sections: Vec<Section>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
}

// ============================================================================
// Helpers
// ============================================================================

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

/// Independent Adler-32 (seed 1), the format's checksum function
pub fn adler32(data: &[u8]) -> u32 {
    let mut low: u32 = 1;
    let mut high: u32 = 0;
    for &byte in data {
        low = (low + u32::from(byte)) % 65521;
        high = (high + low) % 65521;
    }
    (high << 16) | low
}

fn decompress(data: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(data);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).expect("zlib stream");
    output
}

// ============================================================================
// Segment Parsing
// ============================================================================

pub fn parse_segment(path: &Path) -> ParsedSegment {
    let bytes = fs::read(path).expect("segment file readable");
    assert!(bytes.len() > FILE_HEADER_SIZE, "segment file too short");

    let mut signature = [0u8; 8];
    signature.copy_from_slice(&bytes[0..8]);
    assert_eq!(bytes[8], 0x01, "fields start marker");
    let segment_number = u16_at(&bytes, 9);

    let mut sections = Vec::new();
    let mut offset = FILE_HEADER_SIZE as u64;

    while (offset as usize) + SECTION_HEADER_SIZE <= bytes.len() {
        let start = offset as usize;
        let type_bytes = &bytes[start..start + 16];
        let section_type: String = type_bytes
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        let next_offset = u64_at(&bytes, start + 16);
        let size = u64_at(&bytes, start + 24);
        let checksum = u32_at(&bytes, start + 72);

        // Header checksum must hold for every section
        assert_eq!(
            checksum,
            adler32(&bytes[start..start + 72]),
            "section header checksum for '{}' at {}",
            section_type,
            offset
        );

        sections.push(Section {
            section_type: section_type.clone(),
            offset,
            size,
            next_offset,
            checksum,
        });

        if section_type == "done" || section_type == "next" {
            break;
        }
        assert!(next_offset > offset, "section chain must advance");
        offset = next_offset;
    }

    ParsedSegment {
        signature,
        segment_number,
        sections,
        bytes,
    }
}

pub fn section_types(segment: &ParsedSegment) -> Vec<String> {
    segment
        .sections
        .iter()
        .map(|s| s.section_type.clone())
        .collect()
}

pub fn parse_volume(segment: &ParsedSegment) -> VolumeInfo {
    let section = segment
        .sections
        .iter()
        .find(|s| s.section_type == "volume" || s.section_type == "disk")
        .expect("volume section present");
    let payload = section.offset as usize + SECTION_HEADER_SIZE;
    let payload_size = section.size as usize - SECTION_HEADER_SIZE;

    if payload_size == 94 {
        // Smart volume: 32-bit sector count
        VolumeInfo {
            chunk_count: u32_at(&segment.bytes, payload + 4),
            sectors_per_chunk: u32_at(&segment.bytes, payload + 8),
            bytes_per_sector: u32_at(&segment.bytes, payload + 12),
            sector_count: u64::from(u32_at(&segment.bytes, payload + 16)),
        }
    } else {
        VolumeInfo {
            chunk_count: u32_at(&segment.bytes, payload + 4),
            sectors_per_chunk: u32_at(&segment.bytes, payload + 8),
            bytes_per_sector: u32_at(&segment.bytes, payload + 12),
            sector_count: u64_at(&segment.bytes, payload + 16),
        }
    }
}

// ============================================================================
// Chunk Extraction
// ============================================================================

/// One recovered chunk with its storage flag
#[derive(Debug, Clone)]
pub struct RecoveredChunk {
    pub data: Vec<u8>,
    pub was_compressed: bool,
}

/// Reassemble all chunks of the primary segment chain, in order
pub fn extract_chunks(segments: &[ParsedSegment]) -> Vec<RecoveredChunk> {
    let mut chunks = Vec::new();

    for segment in segments {
        let mut sectors_end: Option<u64> = None;
        let mut previous_table: Option<(u64, u64)> = None;

        for section in &segment.sections {
            match section.section_type.as_str() {
                "sectors" => sectors_end = Some(section.offset + section.size),
                "table" => {
                    let data_end = sectors_end.unwrap_or(section.offset + section.size);
                    chunks.extend(read_table_chunks(segment, section, data_end));
                    previous_table = Some((section.offset, section.size));
                }
                "table2" => {
                    // table2 must be byte-identical to its table, payload and all
                    let (table_offset, table_size) =
                        previous_table.expect("table precedes table2");
                    let table_payload = &segment.bytes[(table_offset as usize
                        + SECTION_HEADER_SIZE)
                        ..(table_offset + table_size) as usize];
                    let table2_payload = &segment.bytes[(section.offset as usize
                        + SECTION_HEADER_SIZE)
                        ..(section.offset + section.size) as usize];
                    assert_eq!(table_payload, table2_payload, "table2 mirrors table");
                }
                _ => {}
            }
        }
    }
    chunks
}

fn read_table_chunks(
    segment: &ParsedSegment,
    table: &Section,
    data_end: u64,
) -> Vec<RecoveredChunk> {
    let payload = table.offset as usize + SECTION_HEADER_SIZE;
    let count = u32_at(&segment.bytes, payload) as usize;
    let base = u64_at(&segment.bytes, payload + 8);
    assert_eq!(
        u32_at(&segment.bytes, payload + 20),
        adler32(&segment.bytes[payload..payload + 20]),
        "table header checksum"
    );

    let offsets_at = payload + 24;
    let entries: Vec<u32> = (0..count)
        .map(|i| u32_at(&segment.bytes, offsets_at + i * 4))
        .collect();

    let mut chunks = Vec::with_capacity(count);
    for (i, &raw) in entries.iter().enumerate() {
        let compressed = raw & 0x8000_0000 != 0;
        let start = base + u64::from(raw & 0x7FFF_FFFF);
        let end = if i + 1 < count {
            base + u64::from(entries[i + 1] & 0x7FFF_FFFF)
        } else {
            data_end
        };
        assert!(end > start, "chunk offsets must increase");
        let stored = &segment.bytes[start as usize..end as usize];

        let data = if compressed {
            decompress(stored)
        } else {
            // Raw chunks carry a trailing checksum over their data
            let (data, checksum_bytes) = stored.split_at(stored.len() - 4);
            let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
            assert_eq!(stored_checksum, adler32(data), "raw chunk checksum");
            data.to_vec()
        };
        chunks.push(RecoveredChunk {
            data,
            was_compressed: compressed,
        });
    }
    chunks
}

// ============================================================================
// Delta Segment Parsing
// ============================================================================

/// Chunk overwrites found in a delta segment, in section order
pub fn extract_delta_chunks(segment: &ParsedSegment) -> Vec<(u32, Vec<u8>)> {
    let mut overwrites = Vec::new();
    for section in &segment.sections {
        if section.section_type != "delta_chunk" {
            continue;
        }
        let header = section.offset as usize + SECTION_HEADER_SIZE;
        let chunk_number = u32_at(&segment.bytes, header);
        assert!(chunk_number > 0, "delta chunk numbers are one-based");
        let data_size = u32_at(&segment.bytes, header + 4) as usize;
        assert_eq!(&segment.bytes[header + 8..header + 14], b"DELTA\x00");

        let data_at = header + DELTA_CHUNK_HEADER_SIZE;
        let stored = &segment.bytes[data_at..data_at + data_size];
        let (data, checksum_bytes) = stored.split_at(stored.len() - 4);
        let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        assert_eq!(stored_checksum, adler32(data), "delta chunk checksum");

        overwrites.push((chunk_number - 1, data.to_vec()));
    }
    overwrites
}

/// Reassemble the final image: primary chunks with delta overwrites applied
pub fn extract_image(
    primary: &[ParsedSegment],
    deltas: &[ParsedSegment],
) -> Vec<Vec<u8>> {
    let mut chunks: Vec<Vec<u8>> = extract_chunks(primary)
        .into_iter()
        .map(|c| c.data)
        .collect();
    for delta in deltas {
        for (index, data) in extract_delta_chunks(delta) {
            chunks[index as usize] = data;
        }
    }
    chunks
}
