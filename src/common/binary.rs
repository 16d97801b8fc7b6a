// Shared binary encoding utilities for EWF section structures
//
// Provides consistent little-endian field encoding across all section codecs

/// Write a u16 little-endian into a buffer at the given offset
pub fn put_u16_le(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a u32 little-endian into a buffer at the given offset
pub fn put_u32_le(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a u64 little-endian into a buffer at the given offset
pub fn put_u64_le(buffer: &mut [u8], offset: usize, value: u64) {
    buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Copy raw bytes into a buffer at the given offset
pub fn put_bytes(buffer: &mut [u8], offset: usize, value: &[u8]) {
    buffer[offset..offset + value.len()].copy_from_slice(value);
}

/// Copy a string into a fixed-width, null-padded field
///
/// Values longer than the field are truncated.
pub fn put_str(buffer: &mut [u8], offset: usize, width: usize, value: &str) {
    let bytes = value.as_bytes();
    let length = bytes.len().min(width);
    buffer[offset..offset + length].copy_from_slice(&bytes[..length]);
    for byte in &mut buffer[offset + length..offset + width] {
        *byte = 0;
    }
}

/// Read a u32 little-endian from a buffer at the given offset
pub fn get_u32_le(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

/// Read a u32 big-endian from a buffer at the given offset
pub fn get_u32_be(buffer: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_integers() {
        let mut buffer = [0u8; 16];
        put_u16_le(&mut buffer, 0, 0x1234);
        put_u32_le(&mut buffer, 2, 0x12345678);
        put_u64_le(&mut buffer, 6, 0x0123456789ABCDEF);

        assert_eq!(&buffer[0..2], &[0x34, 0x12]);
        assert_eq!(&buffer[2..6], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(
            &buffer[6..14],
            &[0xEF, 0xCD, 0xAB, 0x89, 0x67, 0x45, 0x23, 0x01]
        );
    }

    #[test]
    fn test_put_str_pads_and_truncates() {
        let mut buffer = [0xFFu8; 16];
        put_str(&mut buffer, 0, 8, "table");
        assert_eq!(&buffer[0..8], b"table\x00\x00\x00");

        put_str(&mut buffer, 8, 4, "sectors");
        assert_eq!(&buffer[8..12], b"sect");
    }

    #[test]
    fn test_get_u32() {
        let buffer = [0x78, 0x56, 0x34, 0x12];
        assert_eq!(get_u32_le(&buffer, 0), 0x12345678);
        assert_eq!(get_u32_be(&buffer, 0), 0x78563412);
    }
}
