//! Segment file state and section-level writes
//!
//! One `SegmentFile` tracks a single on-disk file of the image: its pool
//! entry, 1-based number, chain type (primary or delta) and the ordered list
//! of section descriptors already written. The write methods emit the
//! format's structures in order; the chunks-section correction seeks back to
//! rewrite headers once a section's real size is known.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::common::io_pool::FileIoPool;
use crate::error::{EwfError, EwfResult};
use crate::format::{
    CompressionLevel, EwfFormat, Format, SegmentFileType, CHECKSUM_SIZE, DELTA_CHUNK_HEADER_SIZE,
    FILE_HEADER_SIZE, MAXIMUM_SEGMENT_FILES, SECTION_HEADER_SIZE, TABLE_HEADER_SIZE,
    TABLE_OFFSET_SIZE,
};
use crate::headers::{HashValues, HeaderSectionKind, HeaderSections};
use crate::media::{AcquiryError, MediaValues, Session};
use crate::offset_table::{ChunkOffset, OffsetTable};
use crate::sections::{
    encode_delta_chunk_header, encode_digest, encode_error2, encode_file_header, encode_hash,
    encode_session, encode_smart_volume, encode_table_header, encode_table_offsets, encode_volume,
    volume_section_type, SectionHeader,
};

/// One section already written into a segment file
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub section_type: &'static str,
    pub start_offset: u64,
    pub size: u64,
}

/// The extension of a segment file (".E01", ".s03", ".d01", ".Ex01", ...)
fn segment_extension(
    segment_number: u16,
    file_type: SegmentFileType,
    ewf_format: EwfFormat,
) -> EwfResult<String> {
    if segment_number == 0 {
        return Err(EwfError::InvalidArgument(
            "segment numbers are one-based".to_string(),
        ));
    }
    if segment_number > MAXIMUM_SEGMENT_FILES {
        return Err(EwfError::ExceedsMaximum(format!(
            "segment number {} exceeds the naming scheme's {} files",
            segment_number, MAXIMUM_SEGMENT_FILES
        )));
    }
    let leader = match (file_type, ewf_format) {
        (SegmentFileType::Dwf, _) => 'd',
        (SegmentFileType::Ewf, EwfFormat::S01) => 's',
        (SegmentFileType::Ewf, EwfFormat::E01) => 'E',
    };
    // After 99 the second character cycles to 'x'
    if segment_number <= 99 {
        Ok(format!("{}{:02}", leader, segment_number))
    } else {
        Ok(format!("{}x{:02}", leader, segment_number - 99))
    }
}

/// The full path of a numbered segment file next to the base path
pub fn segment_filename(
    base_path: &Path,
    segment_number: u16,
    file_type: SegmentFileType,
    ewf_format: EwfFormat,
) -> EwfResult<PathBuf> {
    let extension = segment_extension(segment_number, file_type, ewf_format)?;
    let mut path = base_path.as_os_str().to_os_string();
    path.push(".");
    path.push(extension);
    Ok(PathBuf::from(path))
}

/// State of one segment file while the image is being written
pub struct SegmentFile {
    pub pool_entry: usize,
    pub segment_number: u16,
    pub file_type: SegmentFileType,
    /// Chunks in this file; set when the file is closed
    pub amount_of_chunks: u32,
    pub sections: Vec<SectionDescriptor>,
    pub write_open: bool,
}

impl SegmentFile {
    /// Create the on-disk file for a new segment and register it in the pool
    pub fn create(
        pool: &mut FileIoPool,
        base_path: &Path,
        segment_number: u16,
        file_type: SegmentFileType,
        ewf_format: EwfFormat,
    ) -> EwfResult<Self> {
        let path = segment_filename(base_path, segment_number, file_type, ewf_format)?;
        debug!(segment = segment_number, ?path, "Creating segment file");
        let pool_entry = pool.create(path)?;
        Ok(Self {
            pool_entry,
            segment_number,
            file_type,
            amount_of_chunks: 0,
            sections: Vec::new(),
            write_open: false,
        })
    }

    /// Write a section header followed by its payload, recording a descriptor
    fn write_section(
        &mut self,
        pool: &mut FileIoPool,
        section_type: &'static str,
        payload: &[u8],
    ) -> EwfResult<u64> {
        let start_offset = pool.offset(self.pool_entry)?;
        let size = SECTION_HEADER_SIZE + payload.len() as u64;
        let header = SectionHeader::new(section_type, start_offset, size);

        pool.write_all(self.pool_entry, &header.encode())?;
        pool.write_all(self.pool_entry, payload)?;

        trace!(section_type, start_offset, size, "Wrote section");
        self.sections.push(SectionDescriptor {
            section_type,
            start_offset,
            size,
        });
        Ok(size)
    }

    /// Write the start of a segment file: file header, then for the first
    /// segment the header sections and volume, for later primary segments
    /// the cached data section
    #[allow(clippy::too_many_arguments)]
    pub fn write_start(
        &mut self,
        pool: &mut FileIoPool,
        media: &MediaValues,
        format: Format,
        ewf_format: EwfFormat,
        compression_level: CompressionLevel,
        header_sections: Option<&HeaderSections>,
        data_section_cache: &mut Option<Vec<u8>>,
    ) -> EwfResult<u64> {
        let mut write_count = 0u64;

        pool.write_all(
            self.pool_entry,
            &encode_file_header(self.file_type, self.segment_number),
        )?;
        write_count += FILE_HEADER_SIZE;
        self.write_open = true;

        // Delta segment files carry only chunk overwrites
        if self.file_type == SegmentFileType::Dwf {
            return Ok(write_count);
        }

        if self.segment_number == 1 {
            let header_sections = header_sections.ok_or_else(|| {
                EwfError::InvalidArgument("missing header sections".to_string())
            })?;
            for kind in crate::headers::header_plan(format) {
                let (section_type, payload): (&'static str, &[u8]) = match kind {
                    HeaderSectionKind::Header => ("header", &header_sections.header),
                    HeaderSectionKind::Header2 => (
                        "header2",
                        header_sections.header2.as_deref().ok_or_else(|| {
                            EwfError::InvalidArgument("missing header2 payload".to_string())
                        })?,
                    ),
                    HeaderSectionKind::Xheader => (
                        "xheader",
                        header_sections.xheader.as_deref().ok_or_else(|| {
                            EwfError::InvalidArgument("missing xheader payload".to_string())
                        })?,
                    ),
                };
                write_count += self.write_section(pool, section_type, payload)?;
            }
            let volume_type = volume_section_type(ewf_format, format == Format::Smart);
            let payload = match ewf_format {
                EwfFormat::S01 => encode_smart_volume(media),
                EwfFormat::E01 => encode_volume(media, compression_level),
            };
            write_count += self.write_section(pool, volume_type, &payload)?;
        } else if ewf_format == EwfFormat::E01 {
            let payload =
                data_section_cache.get_or_insert_with(|| encode_volume(media, compression_level));
            write_count += self.write_section(pool, "data", payload)?;
        }

        Ok(write_count)
    }

    /// Open a chunks section sized for the planner's estimate
    ///
    /// E01-family images open a `sectors` section whose header is corrected
    /// later; S01 images open the single `table` section that will hold the
    /// offset array and the chunk payloads together.
    pub fn write_chunks_section_start(
        &mut self,
        pool: &mut FileIoPool,
        ewf_format: EwfFormat,
        chunk_size: u32,
        estimated_chunks: u32,
    ) -> EwfResult<u64> {
        let start_offset = pool.offset(self.pool_entry)?;

        match ewf_format {
            EwfFormat::S01 => {
                // Reserve the offset array up front; the correction pass
                // fills it in once the section's real chunk count is known
                let reserved = TABLE_HEADER_SIZE
                    + u64::from(estimated_chunks) * TABLE_OFFSET_SIZE;
                let header =
                    SectionHeader::new("table", start_offset, SECTION_HEADER_SIZE + reserved);
                pool.write_all(self.pool_entry, &header.encode())?;
                pool.write_all(
                    self.pool_entry,
                    &encode_table_header(estimated_chunks, 0),
                )?;
                let zeroed = vec![0u8; (u64::from(estimated_chunks) * TABLE_OFFSET_SIZE) as usize];
                pool.write_all(self.pool_entry, &zeroed)?;
                Ok(SECTION_HEADER_SIZE + reserved)
            }
            EwfFormat::E01 => {
                let estimated_size = SECTION_HEADER_SIZE
                    + u64::from(estimated_chunks)
                        * (u64::from(chunk_size) + CHECKSUM_SIZE);
                let header = SectionHeader::new("sectors", start_offset, estimated_size);
                pool.write_all(self.pool_entry, &header.encode())?;
                Ok(SECTION_HEADER_SIZE)
            }
        }
    }

    /// Append one processed chunk payload and record its offset table entry
    #[allow(clippy::too_many_arguments)]
    pub fn write_chunk_data(
        &mut self,
        pool: &mut FileIoPool,
        offset_table: &mut OffsetTable,
        chunk_index: u32,
        data: &[u8],
        is_compressed: bool,
        checksum: u32,
        write_checksum: bool,
    ) -> EwfResult<u64> {
        let file_offset = pool.offset(self.pool_entry)?;

        pool.write_all(self.pool_entry, data)?;
        let mut write_count = data.len() as u64;
        if write_checksum {
            pool.write_all(self.pool_entry, &checksum.to_le_bytes())?;
            write_count += CHECKSUM_SIZE;
        }

        offset_table.set(
            chunk_index,
            ChunkOffset {
                pool_entry: self.pool_entry,
                file_type: self.file_type,
                segment_number: self.segment_number,
                file_offset,
                size: write_count as u32,
                is_compressed,
            },
        )?;
        trace!(chunk_index, file_offset, write_count, is_compressed, "Wrote chunk");
        Ok(write_count)
    }

    /// Close the open chunks section: rewrite its header with the real size
    /// and emit the offset tables
    #[allow(clippy::too_many_arguments)]
    pub fn write_chunks_correction(
        &mut self,
        pool: &mut FileIoPool,
        offset_table: &OffsetTable,
        table_offsets: &mut Vec<u32>,
        chunks_section_offset: u64,
        base_chunk: u32,
        amount_of_chunks: u32,
        format: Format,
        ewf_format: EwfFormat,
    ) -> EwfResult<u64> {
        table_offsets.clear();
        for chunk_index in base_chunk..base_chunk + amount_of_chunks {
            let entry = offset_table.get(chunk_index).ok_or_else(|| {
                EwfError::InvalidArgument(format!(
                    "chunk {} missing from offset table",
                    chunk_index
                ))
            })?;
            if entry.file_offset > i32::MAX as u64 {
                return Err(EwfError::ExceedsMaximum(format!(
                    "chunk {} offset {} beyond 32-bit table range",
                    chunk_index, entry.file_offset
                )));
            }
            let mut offset = entry.file_offset as u32;
            if entry.is_compressed {
                offset |= crate::format::COMPRESSED_OFFSET_BIT;
            }
            table_offsets.push(offset);
        }

        let section_end = pool.offset(self.pool_entry)?;
        let section_size = section_end - chunks_section_offset;
        let mut write_count = 0u64;

        debug!(
            chunks_section_offset,
            section_size, amount_of_chunks, "Correcting chunks section"
        );
        pool.seek(self.pool_entry, SeekFrom::Start(chunks_section_offset))?;

        match ewf_format {
            EwfFormat::S01 => {
                // The single table section holds header, offsets and data;
                // rewrite the headers and fill in the reserved offset array
                let header = SectionHeader::new("table", chunks_section_offset, section_size);
                pool.write_all(self.pool_entry, &header.encode())?;
                pool.write_all(
                    self.pool_entry,
                    &encode_table_header(amount_of_chunks, 0),
                )?;
                pool.write_all(
                    self.pool_entry,
                    &encode_table_offsets(table_offsets, false),
                )?;
                write_count += SECTION_HEADER_SIZE
                    + TABLE_HEADER_SIZE
                    + u64::from(amount_of_chunks) * TABLE_OFFSET_SIZE;
                self.sections.push(SectionDescriptor {
                    section_type: "table",
                    start_offset: chunks_section_offset,
                    size: section_size,
                });
                pool.seek(self.pool_entry, SeekFrom::Start(section_end))?;
            }
            EwfFormat::E01 => {
                let header = SectionHeader::new("sectors", chunks_section_offset, section_size);
                pool.write_all(self.pool_entry, &header.encode())?;
                write_count += SECTION_HEADER_SIZE;
                self.sections.push(SectionDescriptor {
                    section_type: "sectors",
                    start_offset: chunks_section_offset,
                    size: section_size,
                });
                pool.seek(self.pool_entry, SeekFrom::Start(section_end))?;

                write_count += self.write_table_section(pool, "table", table_offsets)?;
                if !format.is_encase1() {
                    write_count += self.write_table_section(pool, "table2", table_offsets)?;
                }
            }
        }
        Ok(write_count)
    }

    /// One `table`/`table2` section: header, table header, offsets, checksum
    fn write_table_section(
        &mut self,
        pool: &mut FileIoPool,
        section_type: &'static str,
        table_offsets: &[u32],
    ) -> EwfResult<u64> {
        let mut payload = Vec::with_capacity(
            TABLE_HEADER_SIZE as usize + table_offsets.len() * 4 + 4,
        );
        payload.extend_from_slice(&encode_table_header(table_offsets.len() as u32, 0));
        payload.extend_from_slice(&encode_table_offsets(table_offsets, true));
        self.write_section(pool, section_type, &payload)
    }

    /// Write a delta_chunk section at the current position
    #[allow(clippy::too_many_arguments)]
    pub fn write_delta_chunk(
        &mut self,
        pool: &mut FileIoPool,
        offset_table: &mut OffsetTable,
        chunk_index: u32,
        data: &[u8],
        checksum: u32,
        write_checksum: bool,
        no_section_append: bool,
    ) -> EwfResult<u64> {
        let start_offset = pool.offset(self.pool_entry)?;
        let data_size = data.len() as u64 + if write_checksum { CHECKSUM_SIZE } else { 0 };
        let section_size = SECTION_HEADER_SIZE + DELTA_CHUNK_HEADER_SIZE + data_size;

        let header = SectionHeader::new("delta_chunk", start_offset, section_size);
        pool.write_all(self.pool_entry, &header.encode())?;
        pool.write_all(
            self.pool_entry,
            &encode_delta_chunk_header(chunk_index, data_size as u32),
        )?;
        pool.write_all(self.pool_entry, data)?;
        if write_checksum {
            pool.write_all(self.pool_entry, &checksum.to_le_bytes())?;
        }

        offset_table.update(
            chunk_index,
            ChunkOffset {
                pool_entry: self.pool_entry,
                file_type: self.file_type,
                segment_number: self.segment_number,
                file_offset: start_offset + SECTION_HEADER_SIZE + DELTA_CHUNK_HEADER_SIZE,
                size: data_size as u32,
                is_compressed: false,
            },
        )?;

        if !no_section_append {
            self.sections.push(SectionDescriptor {
                section_type: "delta_chunk",
                start_offset,
                size: section_size,
            });
        }
        debug!(chunk_index, start_offset, no_section_append, "Wrote delta chunk");
        Ok(section_size)
    }

    /// Write the terminator: `done` on the last segment, `next` otherwise
    pub fn write_last_section(
        &mut self,
        pool: &mut FileIoPool,
        last_segment: bool,
    ) -> EwfResult<u64> {
        let start_offset = pool.offset(self.pool_entry)?;
        let section_type: &'static str = if last_segment { "done" } else { "next" };
        let header = SectionHeader::terminator(section_type, start_offset);
        pool.write_all(self.pool_entry, &header.encode())?;

        self.sections.push(SectionDescriptor {
            section_type,
            start_offset,
            size: SECTION_HEADER_SIZE,
        });
        trace!(section_type, start_offset, "Wrote terminator");
        Ok(SECTION_HEADER_SIZE)
    }

    /// Finish a segment file: trailing metadata sections on the last
    /// segment, then the terminator
    #[allow(clippy::too_many_arguments)]
    pub fn write_close(
        &mut self,
        pool: &mut FileIoPool,
        segment_chunks: u32,
        last_segment: bool,
        hash_values: &HashValues,
        sessions: &[Session],
        acquiry_errors: &[AcquiryError],
        format: Format,
    ) -> EwfResult<u64> {
        let mut write_count = 0u64;

        if last_segment {
            if !acquiry_errors.is_empty() {
                write_count +=
                    self.write_section(pool, "error2", &encode_error2(acquiry_errors))?;
            }
            if !sessions.is_empty() {
                write_count += self.write_section(pool, "session", &encode_session(sessions))?;
            }
            if let Some(md5) = hash_values.md5 {
                write_count += self.write_section(pool, "hash", &encode_hash(&md5))?;
            }
            if format.supports_digest() {
                if let Some(sha1) = hash_values.sha1 {
                    let md5 = hash_values.md5.unwrap_or_default();
                    write_count +=
                        self.write_section(pool, "digest", &encode_digest(&md5, &sha1))?;
                }
            }
        }
        write_count += self.write_last_section(pool, last_segment)?;

        self.amount_of_chunks = segment_chunks;
        self.write_open = false;
        pool.close(self.pool_entry);
        debug!(
            segment = self.segment_number,
            segment_chunks, last_segment, "Closed segment file"
        );
        Ok(write_count)
    }

    /// Rewrite the volume payload once the final media counts are known
    ///
    /// Needed when the media size was unknown at write start; the counts in
    /// the volume section were zero until finalize.
    pub fn patch_volume(
        &mut self,
        pool: &mut FileIoPool,
        media: &MediaValues,
        ewf_format: EwfFormat,
        compression_level: CompressionLevel,
    ) -> EwfResult<u64> {
        let descriptor = self
            .sections
            .iter()
            .find(|s| s.section_type == "volume" || s.section_type == "disk")
            .ok_or_else(|| {
                EwfError::InvalidArgument("segment file has no volume section".to_string())
            })?;
        let payload_offset = descriptor.start_offset + SECTION_HEADER_SIZE;

        let payload = match ewf_format {
            EwfFormat::S01 => encode_smart_volume(media),
            EwfFormat::E01 => encode_volume(media, compression_level),
        };
        debug!(payload_offset, "Patching volume section counts");
        pool.seek(self.pool_entry, SeekFrom::Start(payload_offset))?;
        let written = pool.write_all(self.pool_entry, &payload)?;
        pool.seek(self.pool_entry, SeekFrom::End(0))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_extension_primary() {
        assert_eq!(
            segment_extension(1, SegmentFileType::Ewf, EwfFormat::E01).unwrap(),
            "E01"
        );
        assert_eq!(
            segment_extension(99, SegmentFileType::Ewf, EwfFormat::E01).unwrap(),
            "E99"
        );
        assert_eq!(
            segment_extension(100, SegmentFileType::Ewf, EwfFormat::E01).unwrap(),
            "Ex01"
        );
    }

    #[test]
    fn test_segment_extension_smart_and_delta() {
        assert_eq!(
            segment_extension(2, SegmentFileType::Ewf, EwfFormat::S01).unwrap(),
            "s02"
        );
        assert_eq!(
            segment_extension(1, SegmentFileType::Dwf, EwfFormat::E01).unwrap(),
            "d01"
        );
    }

    #[test]
    fn test_segment_extension_limits() {
        assert!(segment_extension(0, SegmentFileType::Ewf, EwfFormat::E01).is_err());
        assert!(segment_extension(1000, SegmentFileType::Ewf, EwfFormat::E01).is_err());
    }

    #[test]
    fn test_segment_filename() {
        let path = segment_filename(
            Path::new("/evidence/drive"),
            2,
            SegmentFileType::Ewf,
            EwfFormat::E01,
        )
        .unwrap();
        assert_eq!(path, Path::new("/evidence/drive.E02"));
    }
}
