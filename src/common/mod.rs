// Shared plumbing for the EWF write engine
//
// - binary: little-endian field encoding into section buffers
// - checksum: the 32-bit EWF checksum (Adler-32 seeded with 1)
// - io_pool: LRU-cached file handles for multi-segment images

pub mod binary;
pub mod checksum;
pub mod io_pool;
