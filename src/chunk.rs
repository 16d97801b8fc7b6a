//! Chunk processing: compression, checksumming and payload selection
//!
//! Every chunk handed to the writer passes through here first. The processor
//! decides the on-wire form (raw plus checksum, or a zlib stream whose
//! trailer doubles as the checksum), using its own growable compression
//! cache so the common path never allocates.

use tracing::trace;

use crate::common::binary::get_u32_be;
use crate::common::checksum::ewf_checksum;
use crate::error::{EwfError, EwfResult};
use crate::format::{CompressionLevel, EwfFormat, CHECKSUM_SIZE};

/// Which buffer holds the write-ready payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedSource {
    /// The caller's input buffer, unchanged
    Input,
    /// The processor's staging buffer (checksum appended in place)
    Staged,
    /// The processor's compression cache
    Compressed,
}

/// The outcome of processing one chunk
#[derive(Debug, Clone, Copy)]
pub struct PreparedChunk {
    pub source: PreparedSource,
    /// Bytes to put on the wire
    pub data_size: usize,
    /// Bytes of input this chunk consumed
    pub chunk_data_size: usize,
    pub is_compressed: bool,
    pub checksum: u32,
    /// True when the writer must emit the 4-byte checksum separately
    pub write_checksum: bool,
}

/// Check for an empty block: every byte equal to the first
pub fn is_empty_block(buffer: &[u8]) -> bool {
    match buffer.first() {
        Some(&first) => buffer[1..].iter().all(|&byte| byte == first),
        None => true,
    }
}

/// Worst-case zlib stream size for an input of `length` bytes
fn deflate_bound(length: usize) -> usize {
    length + (length >> 12) + (length >> 14) + (length >> 25) + 13
}

enum Deflate {
    Written(usize),
    BufferTooSmall(usize),
}

/// Compress `src` into `dst` as one zlib stream
fn deflate_into(dst: &mut [u8], src: &[u8], level: CompressionLevel) -> EwfResult<Deflate> {
    let mut compressor = flate2::Compress::new(level.to_flate2(), true);

    loop {
        let consumed = compressor.total_in() as usize;
        let produced = compressor.total_out() as usize;
        if produced >= dst.len() {
            return Ok(Deflate::BufferTooSmall(deflate_bound(src.len())));
        }
        let status = compressor
            .compress(
                &src[consumed..],
                &mut dst[produced..],
                flate2::FlushCompress::Finish,
            )
            .map_err(|e| EwfError::CompressionFailed(e.to_string()))?;

        match status {
            flate2::Status::StreamEnd => {
                return Ok(Deflate::Written(compressor.total_out() as usize))
            }
            flate2::Status::Ok | flate2::Status::BufError => {
                // No forward progress with output space left means the
                // stream cannot be finished in this buffer
                if compressor.total_in() as usize == consumed
                    && compressor.total_out() as usize == produced
                {
                    return Ok(Deflate::BufferTooSmall(deflate_bound(src.len())));
                }
            }
        }
    }
}

/// Compress into the cache, growing it once when the stream does not fit
fn compress_with_retry(
    cache: &mut Vec<u8>,
    src: &[u8],
    level: CompressionLevel,
) -> EwfResult<usize> {
    match deflate_into(cache, src, level)? {
        Deflate::Written(size) => Ok(size),
        Deflate::BufferTooSmall(required) => {
            trace!(required, have = cache.len(), "Growing compression cache");
            cache.resize(required, 0);
            match deflate_into(cache, src, level)? {
                Deflate::Written(size) => Ok(size),
                Deflate::BufferTooSmall(_) => Err(EwfError::CompressionFailed(
                    "compressed stream does not fit the grown cache".to_string(),
                )),
            }
        }
    }
}

/// Per-image chunk processor with its staging and compression caches
pub struct ChunkProcessor {
    chunk_size: u32,
    compression_level: CompressionLevel,
    compress_empty_block: bool,
    ewf_format: EwfFormat,
    cache_data: Vec<u8>,
    cache_compressed: Vec<u8>,
}

impl ChunkProcessor {
    pub fn new(
        chunk_size: u32,
        compression_level: CompressionLevel,
        compress_empty_block: bool,
        ewf_format: EwfFormat,
    ) -> Self {
        let buffer_size = chunk_size as usize + CHECKSUM_SIZE as usize;
        Self {
            chunk_size,
            compression_level,
            compress_empty_block,
            ewf_format,
            cache_data: vec![0u8; buffer_size],
            cache_compressed: vec![0u8; buffer_size],
        }
    }

    /// The staging buffer, one chunk plus room for an appended checksum
    pub fn stage(&mut self) -> &mut [u8] {
        let chunk_size = self.chunk_size as usize;
        &mut self.cache_data[..chunk_size]
    }

    /// Read access to the staging buffer
    pub fn staged(&self) -> &[u8] {
        &self.cache_data
    }

    /// Read access to the compression cache
    pub fn compressed(&self) -> &[u8] {
        &self.cache_compressed
    }

    /// Process a chunk handed in by the caller
    ///
    /// Raw payloads stay in the caller's buffer and the checksum is reported
    /// for the writer to emit separately.
    pub fn process(&mut self, chunk_data: &[u8]) -> EwfResult<PreparedChunk> {
        self.validate(chunk_data.len())?;
        if let Some(prepared) = self.try_compress(chunk_data)? {
            return Ok(prepared);
        }
        Ok(PreparedChunk {
            source: PreparedSource::Input,
            data_size: chunk_data.len(),
            chunk_data_size: chunk_data.len(),
            is_compressed: false,
            checksum: ewf_checksum(chunk_data),
            write_checksum: true,
        })
    }

    /// Process a chunk that was staged into the internal buffer
    ///
    /// Raw payloads get their checksum appended in place, so the writer
    /// emits a single contiguous buffer.
    pub fn process_staged(&mut self, length: usize) -> EwfResult<PreparedChunk> {
        self.validate(length)?;
        let (head, _) = self.cache_data.split_at(length);
        // Compression reads from the staging buffer directly
        if self.should_compress(head) {
            let level = self.effective_level(head);
            let compressed_size =
                compress_with_retry(&mut self.cache_compressed, &self.cache_data[..length], level)?;
            if let Some(prepared) = self.pick_compressed(compressed_size, length) {
                return Ok(prepared);
            }
        }
        let checksum = ewf_checksum(&self.cache_data[..length]);
        self.cache_data[length..length + 4].copy_from_slice(&checksum.to_le_bytes());
        Ok(PreparedChunk {
            source: PreparedSource::Staged,
            data_size: length + CHECKSUM_SIZE as usize,
            chunk_data_size: length,
            is_compressed: false,
            checksum,
            write_checksum: false,
        })
    }

    fn validate(&self, length: usize) -> EwfResult<()> {
        if length == 0 {
            return Err(EwfError::InvalidArgument(
                "chunk data size is zero".to_string(),
            ));
        }
        if length > self.chunk_size as usize {
            return Err(EwfError::InvalidArgument(format!(
                "chunk data size {} exceeds chunk size {}",
                length, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Empty blocks are promoted to compressed storage even at level none
    fn effective_level(&self, chunk_data: &[u8]) -> CompressionLevel {
        if self.compression_level == CompressionLevel::None
            && self.compress_empty_block
            && is_empty_block(chunk_data)
        {
            return CompressionLevel::Default;
        }
        self.compression_level
    }

    fn should_compress(&self, chunk_data: &[u8]) -> bool {
        self.ewf_format == EwfFormat::S01
            || self.effective_level(chunk_data) != CompressionLevel::None
    }

    fn try_compress(&mut self, chunk_data: &[u8]) -> EwfResult<Option<PreparedChunk>> {
        if !self.should_compress(chunk_data) {
            return Ok(None);
        }
        let level = self.effective_level(chunk_data);
        let compressed_size = compress_with_retry(&mut self.cache_compressed, chunk_data, level)?;
        Ok(self.pick_compressed(compressed_size, chunk_data.len()))
    }

    /// Store compressed iff the dialect demands it or the stream is smaller
    /// than a full chunk
    fn pick_compressed(&self, compressed_size: usize, input_size: usize) -> Option<PreparedChunk> {
        if self.ewf_format != EwfFormat::S01 && compressed_size >= self.chunk_size as usize {
            return None;
        }
        // The zlib trailer is the checksum of the uncompressed bytes
        let checksum = get_u32_be(&self.cache_compressed, compressed_size - 4);
        Some(PreparedChunk {
            source: PreparedSource::Compressed,
            data_size: compressed_size,
            chunk_data_size: input_size,
            is_compressed: true,
            checksum,
            write_checksum: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut decoder = ZlibDecoder::new(data);
        let mut output = Vec::new();
        decoder.read_to_end(&mut output).unwrap();
        output
    }

    #[test]
    fn test_empty_block_detection() {
        assert!(is_empty_block(&[0u8; 128]));
        assert!(is_empty_block(&[0xFFu8; 128]));
        assert!(is_empty_block(&[]));
        let mut data = [7u8; 128];
        data[100] = 8;
        assert!(!is_empty_block(&data));
    }

    #[test]
    fn test_raw_chunk_keeps_caller_buffer() {
        let mut processor = ChunkProcessor::new(64, CompressionLevel::None, false, EwfFormat::E01);
        let data = [0xABu8; 64];
        let prepared = processor.process(&data).unwrap();

        assert_eq!(prepared.source, PreparedSource::Input);
        assert!(!prepared.is_compressed);
        assert!(prepared.write_checksum);
        assert_eq!(prepared.data_size, 64);
        assert_eq!(prepared.checksum, ewf_checksum(&data));
    }

    #[test]
    fn test_compressible_chunk_is_compressed() {
        let mut processor =
            ChunkProcessor::new(32768, CompressionLevel::Default, false, EwfFormat::E01);
        let data = vec![0u8; 32768];
        let prepared = processor.process(&data).unwrap();

        assert!(prepared.is_compressed);
        assert!(!prepared.write_checksum);
        assert!(prepared.data_size < 200);
        assert_eq!(
            decompress(&processor.compressed()[..prepared.data_size]),
            data
        );
        // The reported checksum is the checksum of the uncompressed bytes
        assert_eq!(prepared.checksum, ewf_checksum(&data));
    }

    #[test]
    fn test_incompressible_chunk_stays_raw() {
        let mut processor = ChunkProcessor::new(256, CompressionLevel::Best, false, EwfFormat::E01);
        // Pseudo-random bytes do not deflate below one chunk
        let data: Vec<u8> = (0..256u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
            .collect();
        let prepared = processor.process(&data).unwrap();

        assert!(!prepared.is_compressed);
        assert_eq!(prepared.source, PreparedSource::Input);
    }

    #[test]
    fn test_s01_always_compresses() {
        let mut processor = ChunkProcessor::new(256, CompressionLevel::None, false, EwfFormat::S01);
        let data: Vec<u8> = (0..256u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
            .collect();
        let prepared = processor.process(&data).unwrap();

        // Level none yields a stored stream larger than the chunk; the S01
        // dialect stores it compressed regardless
        assert!(prepared.is_compressed);
        assert_eq!(
            decompress(&processor.compressed()[..prepared.data_size]),
            data
        );
    }

    #[test]
    fn test_empty_block_promotion() {
        let mut processor = ChunkProcessor::new(4096, CompressionLevel::None, true, EwfFormat::E01);
        let prepared = processor.process(&[0u8; 4096]).unwrap();
        assert!(prepared.is_compressed);

        let mut unpromoted =
            ChunkProcessor::new(4096, CompressionLevel::None, false, EwfFormat::E01);
        let prepared = unpromoted.process(&[0u8; 4096]).unwrap();
        assert!(!prepared.is_compressed);
    }

    #[test]
    fn test_staged_chunk_appends_checksum() {
        let mut processor = ChunkProcessor::new(64, CompressionLevel::None, false, EwfFormat::E01);
        processor.stage().copy_from_slice(&[0x5Au8; 64]);
        let prepared = processor.process_staged(64).unwrap();

        assert_eq!(prepared.source, PreparedSource::Staged);
        assert!(!prepared.write_checksum);
        assert_eq!(prepared.data_size, 68);
        let expected = ewf_checksum(&[0x5Au8; 64]);
        assert_eq!(
            &processor.staged()[64..68],
            &expected.to_le_bytes()
        );
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let mut processor = ChunkProcessor::new(64, CompressionLevel::None, false, EwfFormat::E01);
        assert!(processor.process(&[0u8; 65]).is_err());
        assert!(processor.process(&[]).is_err());
    }
}
