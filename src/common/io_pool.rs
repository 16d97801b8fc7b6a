// Shared File I/O Pool for managing multiple segment file handles
//
// Provides LRU caching for file handles when writing multi-segment forensic
// images to avoid exceeding OS file descriptor limits. Unlike a read-only
// pool, evicted handles remember their stream position so a reopened handle
// resumes exactly where the writer left off.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{EwfError, EwfResult};

/// Default maximum number of simultaneously open file handles
pub const DEFAULT_MAX_OPEN_FILES: usize = 32;

/// Manages multiple writable file handles with LRU caching
pub struct FileIoPool {
    /// Paths of all registered files, indexed by pool entry
    file_paths: Vec<PathBuf>,
    /// Currently open file handles (pool entry -> File)
    open_handles: HashMap<usize, File>,
    /// Stream positions of evicted handles, restored on reopen
    saved_positions: HashMap<usize, u64>,
    /// LRU queue for file handle management
    lru_queue: VecDeque<usize>,
    /// Maximum number of simultaneously open files
    max_open: usize,
}

impl FileIoPool {
    /// Create an empty pool with the specified open-handle limit
    pub fn new(max_open: usize) -> Self {
        Self {
            file_paths: Vec::new(),
            open_handles: HashMap::new(),
            saved_positions: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open: max_open.max(1),
        }
    }

    /// Create an empty pool with the default open-handle limit
    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_MAX_OPEN_FILES)
    }

    /// Create a new file on disk and register it, returning its pool entry
    pub fn create(&mut self, path: PathBuf) -> EwfResult<usize> {
        let entry = self.file_paths.len();
        debug!(entry, ?path, "Creating pool file");

        self.evict_if_full();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| EwfError::Io {
                operation: "create segment file",
                offset: None,
                source: e,
            })?;

        self.file_paths.push(path);
        self.open_handles.insert(entry, file);
        self.lru_queue.push_front(entry);

        Ok(entry)
    }

    /// Get a file handle, reopening it if it was evicted
    fn handle(&mut self, entry: usize) -> EwfResult<&mut File> {
        if entry >= self.file_paths.len() {
            return Err(EwfError::InvalidArgument(format!(
                "pool entry {} out of range (have {} files)",
                entry,
                self.file_paths.len()
            )));
        }

        // Already open: move to front of LRU queue
        if self.open_handles.contains_key(&entry) {
            self.lru_queue.retain(|&x| x != entry);
            self.lru_queue.push_front(entry);
            trace!(entry, "File handle cache hit");
            return Ok(self.open_handles.get_mut(&entry).unwrap());
        }

        self.evict_if_full();

        let path = &self.file_paths[entry];
        debug!(entry, ?path, "Reopening evicted file handle");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EwfError::Io {
                operation: "reopen segment file",
                offset: None,
                source: e,
            })?;

        // Restore the position the handle had when it was evicted
        if let Some(position) = self.saved_positions.remove(&entry) {
            file.seek(SeekFrom::Start(position))
                .map_err(|e| EwfError::io("restore file position", position, e))?;
        }

        self.open_handles.insert(entry, file);
        self.lru_queue.push_front(entry);

        Ok(self.open_handles.get_mut(&entry).unwrap())
    }

    /// Close the least recently used handle if the pool is at capacity
    fn evict_if_full(&mut self) {
        if self.open_handles.len() < self.max_open {
            return;
        }
        if let Some(lru_entry) = self.lru_queue.pop_back() {
            trace!(lru_entry, "Evicting LRU file handle");
            if let Some(mut file) = self.open_handles.remove(&lru_entry) {
                if let Ok(position) = file.stream_position() {
                    self.saved_positions.insert(lru_entry, position);
                }
            }
        }
    }

    /// Seek within a pool file, returning the new absolute offset
    pub fn seek(&mut self, entry: usize, position: SeekFrom) -> EwfResult<u64> {
        let file = self.handle(entry)?;
        file.seek(position).map_err(|e| EwfError::Io {
            operation: "seek",
            offset: match position {
                SeekFrom::Start(offset) => Some(offset),
                _ => None,
            },
            source: e,
        })
    }

    /// Write a full buffer at the current position, returning the byte count
    pub fn write_all(&mut self, entry: usize, buffer: &[u8]) -> EwfResult<u64> {
        let file = self.handle(entry)?;
        let offset = file
            .stream_position()
            .map_err(|e| EwfError::io("get file position", 0, e))?;
        file.write_all(buffer)
            .map_err(|e| EwfError::io("write", offset, e))?;
        Ok(buffer.len() as u64)
    }

    /// Read an exact number of bytes at the current position
    pub fn read_exact(&mut self, entry: usize, buffer: &mut [u8]) -> EwfResult<()> {
        let file = self.handle(entry)?;
        let offset = file
            .stream_position()
            .map_err(|e| EwfError::io("get file position", 0, e))?;
        file.read_exact(buffer)
            .map_err(|e| EwfError::io("read", offset, e))
    }

    /// Get the current absolute offset within a pool file
    pub fn offset(&mut self, entry: usize) -> EwfResult<u64> {
        let file = self.handle(entry)?;
        file.stream_position()
            .map_err(|e| EwfError::io("get file position", 0, e))
    }

    /// Close one handle, keeping its registration and position
    pub fn close(&mut self, entry: usize) {
        if let Some(mut file) = self.open_handles.remove(&entry) {
            if let Ok(position) = file.stream_position() {
                self.saved_positions.insert(entry, position);
            }
        }
        self.lru_queue.retain(|&x| x != entry);
    }

    /// Get the path for a pool entry
    pub fn path(&self, entry: usize) -> Option<&Path> {
        self.file_paths.get(entry).map(PathBuf::as_path)
    }

    /// Get the number of registered files
    pub fn file_count(&self) -> usize {
        self.file_paths.len()
    }

    /// Get the number of currently open handles
    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        self.open_handles.clear();
        self.saved_positions.clear();
        self.lru_queue.clear();
    }
}
