// EWF 32-bit checksum
//
// Every section header, offset array and raw chunk carries the same 32-bit
// checksum: an Adler-32 rolling sum seeded with 1. This is also the value
// zlib appends to a deflate stream, which is why compressed chunks need no
// separate checksum on disk.

const MODULO: u32 = 65521;

// Largest run length whose accumulated sums still fit in a u32
const BLOCK: usize = 5552;

/// Calculate the EWF checksum of a byte buffer (seed 1)
pub fn ewf_checksum(data: &[u8]) -> u32 {
    ewf_checksum_continue(data, 1)
}

/// Continue an EWF checksum from a previous value
pub fn ewf_checksum_continue(data: &[u8], seed: u32) -> u32 {
    let mut low = seed & 0xFFFF;
    let mut high = (seed >> 16) & 0xFFFF;

    for block in data.chunks(BLOCK) {
        for &byte in block {
            low += u32::from(byte);
            high += low;
        }
        low %= MODULO;
        high %= MODULO;
    }
    (high << 16) | low
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_empty_buffer() {
        assert_eq!(ewf_checksum(&[]), 1);
    }

    #[test]
    fn test_known_vector() {
        // Standard Adler-32 test vector
        assert_eq!(ewf_checksum(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn test_continue_matches_single_pass() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let partial = ewf_checksum(&data[..20]);
        assert_eq!(
            ewf_checksum_continue(&data[20..], partial),
            ewf_checksum(data)
        );
    }

    #[test]
    fn test_long_buffer_no_overflow() {
        let data = vec![0xFFu8; 1024 * 1024];
        let checksum = ewf_checksum(&data);
        assert_ne!(checksum, 0);
        assert!(checksum >> 16 < MODULO);
        assert!(checksum & 0xFFFF < MODULO);
    }

    #[test]
    fn test_matches_zlib_stream_trailer() {
        // The trailing 4 bytes of a zlib stream are the big-endian Adler-32
        // of the uncompressed input; the format reuses them as the chunk
        // checksum for compressed chunks.
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let stream = encoder.finish().unwrap();

        let trailer = u32::from_be_bytes([
            stream[stream.len() - 4],
            stream[stream.len() - 3],
            stream[stream.len() - 2],
            stream[stream.len() - 1],
        ]);
        assert_eq!(trailer, ewf_checksum(&data));
    }
}
