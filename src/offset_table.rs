//! In-memory chunk offset table
//!
//! Maps every written chunk to the segment file that holds it, the absolute
//! payload offset within that file, the stored size and the compression
//! flag. Primary writes may set each index exactly once; the delta path may
//! repoint an existing entry at its new location.

use crate::error::{EwfError, EwfResult};
use crate::format::SegmentFileType;

/// Location of one stored chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkOffset {
    /// Pool entry of the owning segment file (borrowed, not owned)
    pub pool_entry: usize,
    pub file_type: SegmentFileType,
    pub segment_number: u16,
    /// Absolute offset of the chunk payload within the segment file
    pub file_offset: u64,
    /// Stored size including a separately written checksum, if any
    pub size: u32,
    pub is_compressed: bool,
}

/// Dense table of chunk locations, indexed by chunk number
#[derive(Default)]
pub struct OffsetTable {
    offsets: Vec<Option<ChunkOffset>>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the table to hold at least `amount` entries
    pub fn resize(&mut self, amount: u32) {
        let amount = amount as usize;
        if amount > self.offsets.len() {
            self.offsets.resize(amount, None);
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, chunk_index: u32) -> Option<&ChunkOffset> {
        self.offsets
            .get(chunk_index as usize)
            .and_then(Option::as_ref)
    }

    pub fn is_set(&self, chunk_index: u32) -> bool {
        self.get(chunk_index).is_some()
    }

    /// Record the location of a newly written chunk
    ///
    /// Fails when the index already has an entry; primary chunk data is
    /// immutable once written.
    pub fn set(&mut self, chunk_index: u32, offset: ChunkOffset) -> EwfResult<()> {
        if self.is_set(chunk_index) {
            return Err(EwfError::AlreadyWritten(chunk_index));
        }
        self.resize(chunk_index + 1);
        self.offsets[chunk_index as usize] = Some(offset);
        Ok(())
    }

    /// Repoint an existing entry at its delta location
    pub fn update(&mut self, chunk_index: u32, offset: ChunkOffset) -> EwfResult<()> {
        match self.offsets.get_mut(chunk_index as usize) {
            Some(slot) if slot.is_some() => {
                *slot = Some(offset);
                Ok(())
            }
            _ => Err(EwfError::InvalidArgument(format!(
                "chunk {} has no offset table entry to update",
                chunk_index
            ))),
        }
    }
}
