//! Adler-32 checksum helpers.
//!
//! Despite being labeled "CRC" throughout the format (section descriptor
//! `crc[4]`, uncompressed chunk trailer, `table`/`table2` entry CRC), every
//! on-disk checksum in EWF is Adler-32, including the one zlib itself
//! appends to every deflate stream. This module is the single place that
//! computes or verifies one, so the "CRC-but-really-Adler32" naming from
//! the spec never leaks past this file.

use adler::Adler32;

/// Computes the Adler-32 checksum of `data`, matching zlib/libewf's
/// definition (initial state, single call, `checksum()` on completion).
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.write_slice(data);
    hasher.checksum()
}

/// Verifies `data` against a little-endian Adler-32 trailer, returning the
/// computed value either way so callers can report it on mismatch.
pub fn verify(data: &[u8], expected: u32) -> Result<(), u32> {
    let actual = adler32(data);
    if actual == expected {
        Ok(())
    } else {
        Err(actual)
    }
}
