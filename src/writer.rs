//! The image writer: per-chunk state machine and delta overwrites
//!
//! `EwfWriter` owns every piece of per-image state: the file pool, the
//! segment tables for the primary and delta chains, the offset table and the
//! chunk processor. Each `write_chunk` call runs one step of the write state
//! machine: open a segment file if none is open, open a chunks section if
//! needed, append the payload, then consult the capacity planner to decide
//! whether the section or the segment must be closed.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::{debug, trace};

use crate::chunk::{ChunkProcessor, PreparedChunk, PreparedSource};
use crate::common::checksum::ewf_checksum;
use crate::common::io_pool::FileIoPool;
use crate::error::{EwfError, EwfResult};
use crate::format::{
    EwfFormat, Format, SegmentFileType, WriterConfig, CHECKSUM_SIZE, SECTION_HEADER_SIZE,
    TABLE_OFFSET_SIZE,
};
use crate::headers::{build_header_sections, HashValues, HeaderSections, HeaderValues};
use crate::media::{AcquiryError, MediaValues, Session};
use crate::offset_table::OffsetTable;
use crate::planner;
use crate::segment_file::SegmentFile;

/// Mutable write-state of one image, advanced chunk by chunk
#[derive(Debug)]
struct WriteState {
    remaining_segment_file_size: i64,
    chunks_per_segment: u32,
    chunks_per_chunks_section: u32,
    /// File offset of the open chunks section; 0 = none open
    chunks_section_offset: u64,
    /// 1-based index of the chunks section within the current segment
    chunks_section_number: u32,
    /// Chunk payload bytes written into the open section
    chunks_section_write_count: u64,
    create_chunks_section: bool,
    segment_chunks: u32,
    section_chunks: u32,
    total_chunks: u32,
    input_write_count: i64,
    write_count: u64,
    write_finalized: bool,
    /// Scratch buffer reused by every chunks-section correction
    table_offsets: Vec<u32>,
}

impl Default for WriteState {
    fn default() -> Self {
        Self {
            remaining_segment_file_size: 0,
            chunks_per_segment: 0,
            chunks_per_chunks_section: 0,
            chunks_section_offset: 0,
            chunks_section_number: 0,
            chunks_section_write_count: 0,
            create_chunks_section: false,
            segment_chunks: 0,
            section_chunks: 0,
            total_chunks: 0,
            input_write_count: 0,
            write_count: 0,
            write_finalized: false,
            table_offsets: Vec::new(),
        }
    }
}

/// Counters of a write, for progress reporting
#[derive(Debug, Clone, Serialize)]
pub struct ImageWriteInfo {
    pub segment_files: usize,
    pub delta_segment_files: usize,
    pub total_chunks: u32,
    pub input_bytes: u64,
    pub bytes_written: u64,
    pub finalized: bool,
}

/// Everything except the chunk processor, so processed payloads can borrow
/// the processor's caches while the write runs
struct WriterCore {
    config: WriterConfig,
    media: MediaValues,
    header_values: HeaderValues,
    hash_values: HashValues,
    sessions: Vec<Session>,
    acquiry_errors: Vec<AcquiryError>,
    base_path: PathBuf,
    pool: FileIoPool,
    segments: Vec<SegmentFile>,
    delta_segments: Vec<SegmentFile>,
    offset_table: OffsetTable,
    header_sections: Option<HeaderSections>,
    /// Serialized data section, built once and re-emitted per segment
    data_section_cache: Option<Vec<u8>>,
    state: WriteState,
}

/// Writer for one segmented EWF image
pub struct EwfWriter {
    processor: ChunkProcessor,
    core: WriterCore,
}

impl EwfWriter {
    /// Set up a writer; no file is created until the first chunk arrives
    pub fn create(
        base_path: impl Into<PathBuf>,
        config: WriterConfig,
        media: MediaValues,
        header_values: HeaderValues,
    ) -> EwfResult<Self> {
        config.validate()?;
        let processor = ChunkProcessor::new(
            media.chunk_size,
            config.compression_level,
            config.compress_empty_block,
            config.ewf_format(),
        );
        Ok(Self {
            processor,
            core: WriterCore {
                config,
                media,
                header_values,
                hash_values: HashValues::default(),
                sessions: Vec::new(),
                acquiry_errors: Vec::new(),
                base_path: base_path.into(),
                pool: FileIoPool::with_default_limit(),
                segments: Vec::new(),
                delta_segments: Vec::new(),
                offset_table: OffsetTable::new(),
                header_sections: None,
                data_section_cache: None,
                state: WriteState::default(),
            },
        })
    }

    /// Write one new chunk of media data
    ///
    /// `data` holds up to `chunk_size` bytes; only the final chunk of a
    /// known-size media may be shorter. Returns the input bytes consumed,
    /// or 0 once the write is finalized or the media size is reached.
    pub fn write_chunk(&mut self, chunk_index: u32, data: &[u8]) -> EwfResult<usize> {
        if self.core.state.write_finalized {
            return Ok(0);
        }
        if self.core.media.media_size > 0
            && self.core.state.input_write_count >= self.core.media.media_size as i64
        {
            return Ok(0);
        }
        let prepared = self.processor.process(data)?;
        match prepared.source {
            PreparedSource::Input => {
                self.core.write_new_chunk(chunk_index, data, &prepared)?;
            }
            PreparedSource::Compressed => {
                let payload = &self.processor.compressed()[..prepared.data_size];
                self.core.write_new_chunk(chunk_index, payload, &prepared)?;
            }
            PreparedSource::Staged => {
                let payload = &self.processor.staged()[..prepared.data_size];
                self.core.write_new_chunk(chunk_index, payload, &prepared)?;
            }
        }
        Ok(prepared.chunk_data_size)
    }

    /// Overwrite an already written chunk through the delta chain
    ///
    /// The primary segment files stay untouched; the new data lands in a
    /// parallel delta segment file, or in place when the chunk already
    /// lives in one. Delta chunks are always stored raw.
    pub fn write_delta_chunk(&mut self, chunk_index: u32, data: &[u8]) -> EwfResult<usize> {
        if data.is_empty() || data.len() > self.core.media.chunk_size as usize {
            return Err(EwfError::InvalidArgument(format!(
                "delta chunk data size {} out of range",
                data.len()
            )));
        }
        let checksum = ewf_checksum(data);
        self.core
            .write_existing_chunk(chunk_index, data, false, checksum, true)?;
        Ok(data.len())
    }

    /// Supply the media digests stored in the hash and digest sections
    pub fn set_hash_values(&mut self, hash_values: HashValues) {
        self.core.hash_values = hash_values;
    }

    /// Record a run of unreadable sectors for the error2 section
    pub fn add_acquiry_error(&mut self, first_sector: u32, amount_of_sectors: u32) {
        self.core.acquiry_errors.push(AcquiryError {
            first_sector,
            amount_of_sectors,
        });
    }

    /// Record an optical-media session for the session section
    pub fn add_session(&mut self, session_type: u32, first_sector: u32) {
        self.core.sessions.push(Session {
            session_type,
            first_sector,
        });
    }

    /// Close the open chunks section and segment file, writing the trailing
    /// metadata sections and the `done` terminator
    ///
    /// Idempotent: a second call returns 0 and writes nothing.
    pub fn finalize(&mut self) -> EwfResult<u64> {
        self.core.finalize()
    }

    pub fn info(&self) -> ImageWriteInfo {
        ImageWriteInfo {
            segment_files: self.core.segments.len(),
            delta_segment_files: self.core.delta_segments.len(),
            total_chunks: self.core.state.total_chunks,
            input_bytes: self.core.state.input_write_count.max(0) as u64,
            bytes_written: self.core.state.write_count,
            finalized: self.core.state.write_finalized,
        }
    }

    pub fn media_values(&self) -> &MediaValues {
        &self.core.media
    }

    /// Paths of the primary segment files written so far, in order
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.core
            .segments
            .iter()
            .filter_map(|s| self.core.pool.path(s.pool_entry))
            .map(Path::to_path_buf)
            .collect()
    }

    /// Paths of the delta segment files written so far, in order
    pub fn delta_segment_paths(&self) -> Vec<PathBuf> {
        self.core
            .delta_segments
            .iter()
            .filter_map(|s| self.core.pool.path(s.pool_entry))
            .map(Path::to_path_buf)
            .collect()
    }
}

impl WriterCore {
    /// Per-section framing reserve taken from the segment budget
    fn chunks_section_framing(&self, ewf_format: EwfFormat) -> i64 {
        match (ewf_format, self.config.format) {
            (EwfFormat::S01, _) => SECTION_HEADER_SIZE as i64,
            (_, Format::Encase1) => (SECTION_HEADER_SIZE + CHECKSUM_SIZE) as i64,
            _ => (3 * SECTION_HEADER_SIZE + 2 * CHECKSUM_SIZE) as i64,
        }
    }

    fn recalculate_chunks_per_segment(&mut self, segment_index: usize) -> EwfResult<()> {
        let segment = &self.segments[segment_index];
        if segment.amount_of_chunks == 0 {
            self.state.chunks_per_segment = planner::chunks_per_segment(
                self.state.remaining_segment_file_size,
                self.config.maximum_section_chunks,
                self.state.segment_chunks,
                self.state.total_chunks,
                &self.media,
                self.config.format,
                self.config.ewf_format(),
                self.config.unrestrict_offset_table,
            )?;
            trace!(
                chunks_per_segment = self.state.chunks_per_segment,
                "Calculated segment chunk budget"
            );
        } else {
            self.state.chunks_per_segment = segment.amount_of_chunks;
        }
        Ok(())
    }

    /// One step of the write state machine: append a processed chunk
    fn write_new_chunk(
        &mut self,
        chunk_index: u32,
        data: &[u8],
        prepared: &PreparedChunk,
    ) -> EwfResult<u64> {
        if self.state.write_finalized {
            return Ok(0);
        }
        if self.offset_table.is_set(chunk_index) {
            return Err(EwfError::AlreadyWritten(chunk_index));
        }
        // Preallocate the offset table when the chunk count is known
        if self.media.amount_of_chunks > 0 {
            self.offset_table.resize(self.media.amount_of_chunks);
        }
        if self.media.media_size > 0
            && self.state.input_write_count >= self.media.media_size as i64
        {
            return Ok(0);
        }
        let ewf_format = self.config.ewf_format();
        let mut total_write_count = 0u64;

        // Open a new segment file if none is open
        let segment_open = self.segments.last().map(|s| s.write_open).unwrap_or(false);
        if !segment_open {
            if self.header_sections.is_none() {
                self.header_sections = Some(build_header_sections(
                    &self.header_values,
                    self.config.format,
                    self.config.compression_level,
                )?);
            }
            let segment_number = (self.segments.len() + 1) as u16;
            debug!(segment_number, "Opening segment file");

            self.state.create_chunks_section = true;
            self.state.chunks_section_number = 0;
            self.state.chunks_per_chunks_section = 0;
            self.state.segment_chunks = 0;

            let mut segment = SegmentFile::create(
                &mut self.pool,
                &self.base_path,
                segment_number,
                SegmentFileType::Ewf,
                ewf_format,
            )?;
            // Leave space for the done or next section
            self.state.remaining_segment_file_size =
                self.config.segment_file_size as i64 - SECTION_HEADER_SIZE as i64;

            let write_count = segment.write_start(
                &mut self.pool,
                &self.media,
                self.config.format,
                ewf_format,
                self.config.compression_level,
                self.header_sections.as_ref(),
                &mut self.data_section_cache,
            )?;
            total_write_count += write_count;
            self.state.write_count += write_count;
            self.state.remaining_segment_file_size -= write_count as i64;

            self.segments.push(segment);
            self.recalculate_chunks_per_segment(self.segments.len() - 1)?;
        }
        let segment_index = self.segments.len() - 1;

        // Open a new chunks section if needed
        if self.state.create_chunks_section {
            self.state.create_chunks_section = false;
            self.state.section_chunks = 0;
            self.state.chunks_section_write_count = 0;
            self.state.remaining_segment_file_size -= self.chunks_section_framing(ewf_format);

            self.state.chunks_section_offset =
                self.pool.offset(self.segments[segment_index].pool_entry)?;
            self.state.chunks_section_number += 1;

            // A fresh estimate gives a better fill when compression is used
            self.recalculate_chunks_per_segment(segment_index)?;
            self.state.chunks_per_chunks_section = planner::chunks_per_chunks_section(
                self.config.maximum_section_chunks,
                self.state.chunks_per_segment,
                self.state.chunks_section_number,
                self.config.unrestrict_offset_table,
            )?;
            debug!(
                section = self.state.chunks_section_number,
                offset = self.state.chunks_section_offset,
                capacity = self.state.chunks_per_chunks_section,
                "Opening chunks section"
            );
            self.state
                .table_offsets
                .reserve(self.state.chunks_per_chunks_section as usize);

            let write_count = self.segments[segment_index].write_chunks_section_start(
                &mut self.pool,
                ewf_format,
                self.media.chunk_size,
                self.state.chunks_per_chunks_section,
            )?;
            total_write_count += write_count;
            self.state.write_count += write_count;
            self.state.remaining_segment_file_size -= write_count as i64;
        }

        // Append the chunk payload
        let write_count = self.segments[segment_index].write_chunk_data(
            &mut self.pool,
            &mut self.offset_table,
            chunk_index,
            data,
            prepared.is_compressed,
            prepared.checksum,
            prepared.write_checksum,
        )?;
        total_write_count += write_count;
        self.state.input_write_count += prepared.chunk_data_size as i64;
        self.state.write_count += write_count;
        self.state.chunks_section_write_count += write_count;
        self.state.remaining_segment_file_size -= write_count as i64;
        self.state.segment_chunks += 1;
        self.state.section_chunks += 1;
        self.state.total_chunks += 1;
        // Reserve the two table entries this chunk needs at section close
        self.state.remaining_segment_file_size -= 2 * TABLE_OFFSET_SIZE as i64;

        let segment_file_offset = self.pool.offset(self.segments[segment_index].pool_entry)?;

        if planner::chunks_section_full(
            self.state.chunks_section_offset,
            self.state.remaining_segment_file_size,
            &self.media,
            self.state.input_write_count,
            segment_file_offset,
            self.config.maximum_section_chunks,
            self.state.section_chunks,
            self.state.total_chunks,
            self.state.chunks_per_chunks_section,
            self.config.format,
            ewf_format,
            self.config.unrestrict_offset_table,
        ) {
            total_write_count += self.close_chunks_section(segment_index)?;

            if planner::segment_file_full(
                self.state.remaining_segment_file_size,
                self.state.segment_chunks,
                &self.media,
                self.state.input_write_count,
                self.state.chunks_per_segment,
                self.state.total_chunks,
                self.config.format,
                ewf_format,
            ) {
                // Keep the segment open for finalize when this was the last
                // chunk of a known-size media
                if self.media.media_size == 0
                    || self.state.input_write_count < self.media.media_size as i64
                {
                    let write_count = self.segments[segment_index].write_close(
                        &mut self.pool,
                        self.state.segment_chunks,
                        false,
                        &self.hash_values,
                        &self.sessions,
                        &self.acquiry_errors,
                        self.config.format,
                    )?;
                    total_write_count += write_count;
                    self.state.write_count += write_count;
                }
            }
        }
        Ok(total_write_count)
    }

    /// Run the correction pass on the open chunks section
    fn close_chunks_section(&mut self, segment_index: usize) -> EwfResult<u64> {
        debug!(
            section_chunks = self.state.section_chunks,
            data_bytes = self.state.chunks_section_write_count,
            "Closing chunks section"
        );
        let base_chunk = self.state.total_chunks - self.state.section_chunks;
        let write_count = self.segments[segment_index].write_chunks_correction(
            &mut self.pool,
            &self.offset_table,
            &mut self.state.table_offsets,
            self.state.chunks_section_offset,
            base_chunk,
            self.state.section_chunks,
            self.config.format,
            self.config.ewf_format(),
        )?;
        self.state.write_count += write_count;
        self.state.create_chunks_section = true;
        self.state.chunks_section_offset = 0;
        Ok(write_count)
    }

    /// Write an overwrite for an existing chunk into the delta chain
    fn write_existing_chunk(
        &mut self,
        chunk_index: u32,
        data: &[u8],
        is_compressed: bool,
        checksum: u32,
        write_checksum: bool,
    ) -> EwfResult<u64> {
        if is_compressed {
            return Err(EwfError::Unsupported(
                "delta chunks cannot be stored compressed".to_string(),
            ));
        }
        let entry = *self.offset_table.get(chunk_index).ok_or_else(|| {
            EwfError::InvalidArgument(format!(
                "chunk {} has not been written; delta writes need an existing chunk",
                chunk_index
            ))
        })?;
        let ewf_format = self.config.ewf_format();
        let mut total_write_count = 0u64;

        if entry.file_type != SegmentFileType::Dwf {
            // First overwrite of this chunk: append to the delta chain
            let mut reuse_last_segment = false;
            if let Some(last) = self.delta_segments.last_mut() {
                let terminator_offset = last
                    .sections
                    .last()
                    .map(|s| s.start_offset)
                    .ok_or_else(|| {
                        EwfError::InvalidArgument(
                            "delta segment file has no terminator section".to_string(),
                        )
                    })?;
                if self.pool.offset(last.pool_entry)? != terminator_offset {
                    self.pool
                        .seek(last.pool_entry, SeekFrom::Start(terminator_offset))?;
                }
                let prospective_end = terminator_offset
                    + data.len() as u64
                    + CHECKSUM_SIZE
                    + SECTION_HEADER_SIZE;
                if prospective_end > self.config.segment_file_size {
                    // Seal this delta segment and chain a new one
                    total_write_count += last.write_last_section(&mut self.pool, false)?;
                } else {
                    // The new delta chunk overwrites the old terminator
                    last.sections.pop();
                    reuse_last_segment = true;
                }
            }
            if !reuse_last_segment {
                let segment_number = (self.delta_segments.len() + 1) as u16;
                debug!(segment_number, "Opening delta segment file");
                let mut segment = SegmentFile::create(
                    &mut self.pool,
                    &self.base_path,
                    segment_number,
                    SegmentFileType::Dwf,
                    ewf_format,
                )?;
                total_write_count += segment.write_start(
                    &mut self.pool,
                    &self.media,
                    self.config.format,
                    ewf_format,
                    self.config.compression_level,
                    self.header_sections.as_ref(),
                    &mut self.data_section_cache,
                )?;
                self.delta_segments.push(segment);
            }
            let segment = self.delta_segments.last_mut().ok_or_else(|| {
                EwfError::InvalidArgument("no delta segment file open".to_string())
            })?;
            total_write_count += segment.write_delta_chunk(
                &mut self.pool,
                &mut self.offset_table,
                chunk_index,
                data,
                checksum,
                write_checksum,
                false,
            )?;
            total_write_count += segment.write_last_section(&mut self.pool, true)?;
        } else {
            // The chunk already lives in a delta segment: overwrite in place
            let section_start = entry.file_offset
                - crate::format::DELTA_CHUNK_HEADER_SIZE
                - SECTION_HEADER_SIZE;
            self.pool
                .seek(entry.pool_entry, SeekFrom::Start(section_start))?;

            let segment = self
                .delta_segments
                .iter_mut()
                .find(|s| s.pool_entry == entry.pool_entry)
                .ok_or_else(|| {
                    EwfError::InvalidArgument(format!(
                        "chunk {} points at an unknown delta segment",
                        chunk_index
                    ))
                })?;
            total_write_count += segment.write_delta_chunk(
                &mut self.pool,
                &mut self.offset_table,
                chunk_index,
                data,
                checksum,
                write_checksum,
                true,
            )?;
        }
        self.state.write_count += total_write_count;
        Ok(total_write_count)
    }

    fn finalize(&mut self) -> EwfResult<u64> {
        if self.state.write_finalized {
            return Ok(0);
        }
        let mut total_write_count = 0u64;

        // Close a chunks section left open by the last chunk
        if self.state.chunks_section_offset != 0 && self.state.section_chunks > 0 {
            let segment_index = self.segments.len() - 1;
            total_write_count += self.close_chunks_section(segment_index)?;
        }
        // Terminate the last segment file with its trailing sections
        if let Some(segment) = self.segments.last_mut() {
            if segment.write_open {
                let write_count = segment.write_close(
                    &mut self.pool,
                    self.state.segment_chunks,
                    true,
                    &self.hash_values,
                    &self.sessions,
                    &self.acquiry_errors,
                    self.config.format,
                )?;
                total_write_count += write_count;
                self.state.write_count += write_count;
            }
        }
        // With an unknown input size the volume counts were zero; patch them
        // now that the totals are known
        if self.media.media_size == 0 && self.state.total_chunks > 0 {
            self.media.media_size = self.state.input_write_count.max(0) as u64;
            self.media.derive_counts()?;
            let write_count = self.segments[0].patch_volume(
                &mut self.pool,
                &self.media,
                self.config.ewf_format(),
                self.config.compression_level,
            )?;
            total_write_count += write_count;
            self.state.write_count += write_count;
        }
        self.state.write_finalized = true;
        debug!(
            total_chunks = self.state.total_chunks,
            segments = self.segments.len(),
            bytes_written = self.state.write_count,
            "Write finalized"
        );
        Ok(total_write_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_writer(dir: &TempDir, media_size: u64) -> EwfWriter {
        let config = WriterConfig {
            format: Format::Encase5,
            segment_file_size: 2 * 1024 * 1024,
            ..Default::default()
        };
        let media = MediaValues::new(8, 512, media_size).unwrap();
        EwfWriter::create(
            dir.path().join("image"),
            config,
            media,
            HeaderValues::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_write_returns_consumed_bytes() {
        let dir = TempDir::new().unwrap();
        let mut writer = small_writer(&dir, 0);
        let chunk = vec![0x41u8; 4096];
        assert_eq!(writer.write_chunk(0, &chunk).unwrap(), 4096);
        assert_eq!(writer.info().total_chunks, 1);
    }

    #[test]
    fn test_rewriting_chunk_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = small_writer(&dir, 0);
        let chunk = vec![0x41u8; 4096];
        writer.write_chunk(0, &chunk).unwrap();
        match writer.write_chunk(0, &chunk) {
            Err(EwfError::AlreadyWritten(0)) => {}
            other => panic!("expected AlreadyWritten, got {:?}", other),
        }
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut writer = small_writer(&dir, 0);
        writer.write_chunk(0, &vec![0x41u8; 4096]).unwrap();

        assert!(writer.finalize().unwrap() > 0);
        assert_eq!(writer.finalize().unwrap(), 0);
        assert!(writer.info().finalized);
    }

    #[test]
    fn test_write_after_finalize_returns_zero() {
        let dir = TempDir::new().unwrap();
        let mut writer = small_writer(&dir, 0);
        writer.write_chunk(0, &vec![0x41u8; 4096]).unwrap();
        writer.finalize().unwrap();
        assert_eq!(writer.write_chunk(1, &vec![0x42u8; 4096]).unwrap(), 0);
    }

    #[test]
    fn test_media_complete_returns_zero() {
        let dir = TempDir::new().unwrap();
        // Two chunks of media
        let mut writer = small_writer(&dir, 2 * 4096);
        writer.write_chunk(0, &vec![0x41u8; 4096]).unwrap();
        writer.write_chunk(1, &vec![0x42u8; 4096]).unwrap();
        assert_eq!(writer.write_chunk(2, &vec![0x43u8; 4096]).unwrap(), 0);
    }

    #[test]
    fn test_delta_requires_existing_chunk() {
        let dir = TempDir::new().unwrap();
        let mut writer = small_writer(&dir, 0);
        assert!(writer.write_delta_chunk(0, &vec![0u8; 4096]).is_err());
    }
}
