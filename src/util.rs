//! Small helpers for little-endian field access and fixed-width names.

use byteorder::{ByteOrder, LittleEndian};

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..])
}

/// Writes a little-endian u32 into a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn write_u32_le_at(data: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut data[offset..], value);
}

/// Finds the position of the first null byte in a slice, or its length.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Decodes a null-padded fixed-width name such as a segment name.
pub fn fixed_name(raw: &[u8]) -> &str {
    let end = memchr_null(raw);
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}

/// Returns the last path component of an image path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Formats a byte count for humans.
pub fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / 1024.0 / 1024.0 / 1024.0)
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / 1024.0 / 1024.0)
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}
