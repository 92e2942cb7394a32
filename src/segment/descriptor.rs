//! Bit-exact encode/decode of the two fixed-size structures that bracket
//! every segment file: the 13-byte segment header and the 76-byte section
//! descriptor (spec §6.1), plus their Adler-32 ("CRC") checksums.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::checksum;
use crate::error::{EwfError, EwfResult};

pub const SEGMENT_HEADER_SIZE: usize = 13;
pub const SECTION_DESCRIPTOR_SIZE: usize = 76;

/// Standard EWF/E01 magic. `LVF`/`LEF` variants substitute the first three
/// bytes; this crate only writes the standard signature but accepts all
/// three on read.
pub const SIGNATURE_EVF: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const SIGNATURE_LVF: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const SIGNATURE_LEF: [u8; 8] = [0x4C, 0x45, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

/// The 13-byte header at the start of every segment file.
#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    pub signature: [u8; 8],
    pub segment_number: u16,
}

impl SegmentHeader {
    pub fn new(segment_number: u16) -> Self {
        SegmentHeader {
            signature: SIGNATURE_EVF,
            segment_number,
        }
    }

    pub fn read<R: Read>(mut r: R) -> EwfResult<Self> {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        r.read_exact(&mut buf).map_err(EwfError::io_read)?;

        let signature: [u8; 8] = buf[0..8].try_into().unwrap();
        if signature != SIGNATURE_EVF && signature != SIGNATURE_LVF && signature != SIGNATURE_LEF {
            return Err(EwfError::format_invalid("invalid segment signature"));
        }
        if buf[8] != 1 {
            return Err(EwfError::format_invalid(
                "invalid segment header constant field",
            ));
        }
        let segment_number = u16::from_le_bytes([buf[9], buf[10]]);
        if buf[11] != 0 || buf[12] != 0 {
            return Err(EwfError::format_invalid(
                "invalid segment header reserved field",
            ));
        }

        Ok(SegmentHeader {
            signature,
            segment_number,
        })
    }

    pub fn write<W: Write>(&self, mut w: W) -> EwfResult<()> {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.signature);
        buf[8] = 1;
        buf[9..11].copy_from_slice(&self.segment_number.to_le_bytes());
        buf[11] = 0;
        buf[12] = 0;
        w.write_all(&buf).map_err(EwfError::io_write)
    }
}

/// The 76-byte descriptor that precedes every section's payload.
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    /// NUL-padded on disk, trimmed here.
    pub section_type: String,
    /// Absolute file offset of the *next* section descriptor.
    pub next_offset: u64,
    /// Total size in bytes, including this 76-byte descriptor.
    pub size: u64,
}

impl SectionDescriptor {
    pub fn new(section_type: impl Into<String>, next_offset: u64, size: u64) -> Self {
        SectionDescriptor {
            section_type: section_type.into(),
            next_offset,
            size,
        }
    }

    /// Reads and CRC-validates a descriptor at the reader's current
    /// position, leaving the cursor positioned at the start of the
    /// section's payload.
    pub fn read<R: Read>(mut r: R) -> EwfResult<Self> {
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE];
        r.read_exact(&mut buf).map_err(EwfError::io_read)?;

        let stored_crc = u32::from_le_bytes(buf[72..76].try_into().unwrap());
        let expected_crc = checksum::adler32(&buf[..72]);
        if stored_crc != expected_crc {
            return Err(EwfError::format_invalid(format!(
                "section descriptor CRC mismatch: stored {stored_crc:#010x}, computed {expected_crc:#010x}"
            )));
        }

        let mut section_type = String::from_utf8_lossy(&buf[0..16]).into_owned();
        section_type.retain(|c| c != '\0');

        let next_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(buf[24..32].try_into().unwrap());

        Ok(SectionDescriptor {
            section_type,
            next_offset,
            size,
        })
    }

    /// Reads a descriptor located at an absolute offset, restoring nothing
    /// about the reader's prior position (caller seeks again as needed).
    pub fn read_at<R: Read + Seek>(mut r: R, offset: u64) -> EwfResult<Self> {
        r.seek(SeekFrom::Start(offset)).map_err(EwfError::io_seek)?;
        Self::read(&mut r)
    }

    /// Serializes the descriptor, computing its CRC over the first 72
    /// bytes as it goes.
    pub fn encode(&self) -> EwfResult<[u8; SECTION_DESCRIPTOR_SIZE]> {
        if self.section_type.len() > 16 {
            return Err(EwfError::ArgumentOutOfRange(format!(
                "section type '{}' exceeds 16 bytes",
                self.section_type
            )));
        }
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE];
        buf[0..self.section_type.len()].copy_from_slice(self.section_type.as_bytes());
        buf[16..24].copy_from_slice(&self.next_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.size.to_le_bytes());
        // buf[32..72] is the 40-byte reserved padding, already zeroed.
        let crc = checksum::adler32(&buf[..72]);
        buf[72..76].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    pub fn write<W: Write>(&self, mut w: W) -> EwfResult<()> {
        let buf = self.encode()?;
        w.write_all(&buf).map_err(EwfError::io_write)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.section_type.as_str(), "next" | "done")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn segment_header_round_trips() {
        let header = SegmentHeader::new(1);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SEGMENT_HEADER_SIZE);
        let parsed = SegmentHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.segment_number, 1);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[8] = 1;
        assert!(SegmentHeader::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn section_descriptor_round_trips() {
        let desc = SectionDescriptor::new("volume", 200, 100);
        let buf = desc.encode().unwrap();
        let parsed = SectionDescriptor::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.section_type, "volume");
        assert_eq!(parsed.next_offset, 200);
        assert_eq!(parsed.size, 100);
    }

    #[test]
    fn section_descriptor_detects_corruption() {
        let desc = SectionDescriptor::new("table", 0, 0);
        let mut buf = desc.encode().unwrap();
        buf[0] ^= 0xFF;
        assert!(SectionDescriptor::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn terminator_detection() {
        assert!(SectionDescriptor::new("next", 0, 0).is_terminator());
        assert!(SectionDescriptor::new("done", 0, 0).is_terminator());
        assert!(!SectionDescriptor::new("table", 0, 0).is_terminator());
    }
}
