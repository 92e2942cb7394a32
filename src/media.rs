//! Media geometry and acquisition-target description (component J, part 1).
//!
//! `MediaValues` is the handle's root of immutability: once the write
//! engine has staged its first byte (`values_initialized`), every geometry
//! setter on the handle must refuse further changes (spec §4.K, §8 "State
//! guard").

use crate::error::{EwfError, EwfResult};

/// Default sectors packed into a single chunk (spec §6.3).
pub const DEFAULT_SECTORS_PER_CHUNK: u32 = 64;
/// Default logical sector size in bytes.
pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;
/// Default segment-file size: 1.4 GiB.
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 1_400 * 1024 * 1024;
/// Largest segment file size the format's 8-byte size fields can address.
pub const MAX_SEGMENT_FILE_SIZE: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// The kind of physical or logical target an image was acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Unknown,
    Removable,
    Fixed,
    Optical,
    Memory,
}

impl MediaType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x10 => MediaType::Memory,
            _ => MediaType::Unknown,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Memory => 0x10,
            MediaType::Unknown => 0x01,
        }
    }
}

bitflags::bitflags! {
    /// Bit 0: image (vs. "raw" direct device access trace); bit 1:
    /// physical (set) vs logical (clear); bit 2: acquired via FastBloc
    /// write-blocker; bit 3: media was write-protected during acquisition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MediaFlags: u8 {
        const IMAGE = 0b0000_0001;
        const PHYSICAL = 0b0000_0010;
        const FASTBLOC = 0b0000_0100;
        const WRITE_BLOCKED = 0b0000_1000;
    }
}

/// 16-byte image GUID, generated once at acquisition start and carried
/// verbatim thereafter (spec §3 "Media values").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub fn new_random() -> Self {
        Guid(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn nil() -> Self {
        Guid([0u8; 16])
    }

    /// Accepts any slice of at least 16 bytes, using the first 16 — the
    /// "use first N bytes" behavior spec §9's Open Questions calls for.
    pub fn from_slice(bytes: &[u8]) -> EwfResult<Self> {
        if bytes.len() < 16 {
            return Err(EwfError::ArgumentOutOfRange(format!(
                "GUID requires at least 16 bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes[..16]);
        Ok(Guid(buf))
    }
}

/// Immutable-once-writing media geometry (spec §3 "Media values").
#[derive(Debug, Clone)]
pub struct MediaValues {
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub total_sectors: u64,
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub error_granularity: u32,
    pub guid: Guid,
    pub compression_level: u8,
}

impl Default for MediaValues {
    fn default() -> Self {
        MediaValues {
            sectors_per_chunk: DEFAULT_SECTORS_PER_CHUNK,
            bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
            total_sectors: 0,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::IMAGE | MediaFlags::PHYSICAL,
            error_granularity: DEFAULT_SECTORS_PER_CHUNK,
            guid: Guid::nil(),
            compression_level: 0,
        }
    }
}

impl MediaValues {
    /// `chunk_size = sectors_per_chunk × bytes_per_sector` (spec §3).
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    /// `media_size = total_sectors × bytes_per_sector` (spec §3).
    #[inline]
    pub fn media_size(&self) -> u64 {
        self.total_sectors * self.bytes_per_sector as u64
    }

    #[inline]
    pub fn total_chunks(&self) -> u64 {
        let spc = self.sectors_per_chunk as u64;
        (self.total_sectors + spc - 1) / spc.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_matches_spec() {
        let mv = MediaValues::default();
        assert_eq!(mv.chunk_size(), 64 * 512);
    }

    #[test]
    fn media_size_derives_from_sectors() {
        let mut mv = MediaValues::default();
        mv.total_sectors = 1;
        assert_eq!(mv.media_size(), 512);
    }

    #[test]
    fn guid_from_slice_uses_first_16_bytes() {
        let long = vec![0xAAu8; 20];
        let guid = Guid::from_slice(&long).unwrap();
        assert_eq!(guid.0, [0xAAu8; 16]);
    }

    #[test]
    fn guid_from_short_slice_errors() {
        assert!(Guid::from_slice(&[0u8; 8]).is_err());
    }
}
