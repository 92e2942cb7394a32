//! Section codec (component B): bit-exact payload layouts for every fixed-
//! shape section type. The 76-byte descriptor that brackets each payload is
//! `segment::descriptor::SectionDescriptor`; the `table`/`table2` payload
//! lives in `crate::table` since it is tightly coupled to the chunk index.
//! This module covers everything else: `volume`/`disk`/`data`, `digest`,
//! `hash`, `error2`, `session`, and the zlib-compressed text blobs
//! (`header`, `header2`, `xheader`, `xhash`).

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::checksum;
use crate::error::{EwfError, EwfResult};
use crate::media::{Guid, MediaFlags, MediaType, MediaValues};
use crate::sector_table::SectorRangeTable;

/// `volume`/`disk`/`data` payload: 1052 content bytes + trailing CRC.
pub const VOLUME_PAYLOAD_SIZE: usize = 1052;
const VOLUME_SECTION_SIZE: usize = VOLUME_PAYLOAD_SIZE + 4;

/// Decodes a `volume`/`disk`/`data` section payload into `MediaValues`.
/// Both section names share this exact layout; which name is present on
/// disk is a format-profile concern, not a parsing one.
pub fn decode_volume(payload: &[u8]) -> EwfResult<MediaValues> {
    if payload.len() < VOLUME_SECTION_SIZE {
        return Err(EwfError::format_invalid("volume payload too short"));
    }
    let stored_crc = u32::from_le_bytes(payload[VOLUME_PAYLOAD_SIZE..VOLUME_SECTION_SIZE].try_into().unwrap());
    let computed_crc = checksum::adler32(&payload[..VOLUME_PAYLOAD_SIZE]);
    if stored_crc != computed_crc {
        return Err(EwfError::format_invalid("volume payload CRC mismatch"));
    }

    let media_type = MediaType::from_byte(payload[0x00]);
    let sectors_per_chunk = u32::from_le_bytes(payload[0x08..0x0C].try_into().unwrap());
    let bytes_per_sector = u32::from_le_bytes(payload[0x0C..0x10].try_into().unwrap());
    let total_sectors = u32::from_le_bytes(payload[0x10..0x14].try_into().unwrap()) as u64;
    let media_flags = MediaFlags::from_bits_truncate(payload[0x20]);
    let compression_level = payload[0x2C];
    let error_granularity = u32::from_le_bytes(payload[0x30..0x34].try_into().unwrap());
    let guid = Guid::from_slice(&payload[0x38..0x48])?;

    Ok(MediaValues {
        sectors_per_chunk,
        bytes_per_sector,
        total_sectors,
        media_type,
        media_flags,
        error_granularity,
        guid,
        compression_level,
    })
}

/// Encodes `MediaValues` into the 1056-byte `volume` section payload
/// (content + trailing CRC), leaving CHS geometry and the Palm/SMART
/// start-sector fields zeroed — this crate does not model them, matching
/// spec §1's carve-out of acquisition-tool-specific geometry quirks.
pub fn encode_volume(media: &MediaValues, amount_of_chunks: u32) -> Vec<u8> {
    let mut buf = vec![0u8; VOLUME_PAYLOAD_SIZE];
    buf[0x00] = media.media_type.to_byte();
    buf[0x04..0x08].copy_from_slice(&amount_of_chunks.to_le_bytes());
    buf[0x08..0x0C].copy_from_slice(&media.sectors_per_chunk.to_le_bytes());
    buf[0x0C..0x10].copy_from_slice(&media.bytes_per_sector.to_le_bytes());
    buf[0x10..0x14].copy_from_slice(&(media.total_sectors as u32).to_le_bytes());
    buf[0x20] = media.media_flags.bits();
    buf[0x2C] = media.compression_level;
    buf[0x30..0x34].copy_from_slice(&media.error_granularity.to_le_bytes());
    buf[0x38..0x48].copy_from_slice(&media.guid.0);

    let crc = checksum::adler32(&buf);
    let mut out = buf;
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// `digest` section: `md5[16] || sha1[20] || padding[40] || crc[4]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestPayload {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
}

const DIGEST_PAYLOAD_SIZE: usize = 16 + 20 + 40;

pub fn decode_digest(payload: &[u8]) -> EwfResult<DigestPayload> {
    if payload.len() < DIGEST_PAYLOAD_SIZE + 4 {
        return Err(EwfError::format_invalid("digest payload too short"));
    }
    let stored_crc = u32::from_le_bytes(payload[DIGEST_PAYLOAD_SIZE..DIGEST_PAYLOAD_SIZE + 4].try_into().unwrap());
    let computed_crc = checksum::adler32(&payload[..DIGEST_PAYLOAD_SIZE]);
    if stored_crc != computed_crc {
        return Err(EwfError::format_invalid("digest payload CRC mismatch"));
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&payload[0..16]);
    let mut sha1 = [0u8; 20];
    sha1.copy_from_slice(&payload[16..36]);
    Ok(DigestPayload { md5, sha1 })
}

pub fn encode_digest(digest: &DigestPayload) -> Vec<u8> {
    let mut buf = vec![0u8; DIGEST_PAYLOAD_SIZE];
    buf[0..16].copy_from_slice(&digest.md5);
    buf[16..36].copy_from_slice(&digest.sha1);
    let crc = checksum::adler32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Legacy `hash` section: `md5[16] || unknown[16] || crc[4]`. The "unknown"
/// 16 bytes are preserved verbatim on copy and zeroed on fresh creation
/// (spec §9 Open Questions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashPayload {
    pub md5: [u8; 16],
    pub unknown: [u8; 16],
}

const HASH_PAYLOAD_SIZE: usize = 16 + 16;

pub fn decode_hash(payload: &[u8]) -> EwfResult<HashPayload> {
    if payload.len() < HASH_PAYLOAD_SIZE + 4 {
        return Err(EwfError::format_invalid("hash payload too short"));
    }
    let stored_crc = u32::from_le_bytes(payload[HASH_PAYLOAD_SIZE..HASH_PAYLOAD_SIZE + 4].try_into().unwrap());
    let computed_crc = checksum::adler32(&payload[..HASH_PAYLOAD_SIZE]);
    if stored_crc != computed_crc {
        return Err(EwfError::format_invalid("hash payload CRC mismatch"));
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&payload[0..16]);
    let mut unknown = [0u8; 16];
    unknown.copy_from_slice(&payload[16..32]);
    Ok(HashPayload { md5, unknown })
}

pub fn encode_hash(hash: &HashPayload) -> Vec<u8> {
    let mut buf = vec![0u8; HASH_PAYLOAD_SIZE];
    buf[0..16].copy_from_slice(&hash.md5);
    buf[16..32].copy_from_slice(&hash.unknown);
    let crc = checksum::adler32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// `error2`/`session` fixed header size before the entry array (spec §6.1:
/// `amount[4] || padding[512-8-4] || crc[4]`, i.e. a 512-byte header block).
const RANGE_HEADER_SIZE: usize = 512;
const RANGE_ENTRY_SIZE: usize = 8;

/// Decodes an `error2` or `session` section payload into a
/// `SectorRangeTable`. `coalesce_adjacent` must match the table kind the
/// caller is populating (`true` for `error2`, `false` for `session`).
pub fn decode_sector_range_section(payload: &[u8], coalesce_adjacent: bool) -> EwfResult<SectorRangeTable> {
    if payload.len() < RANGE_HEADER_SIZE {
        return Err(EwfError::format_invalid("sector-range section too short"));
    }
    let amount = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let header_crc = u32::from_le_bytes(payload[RANGE_HEADER_SIZE - 4..RANGE_HEADER_SIZE].try_into().unwrap());
    let computed_header_crc = checksum::adler32(&payload[..RANGE_HEADER_SIZE - 4]);
    if header_crc != computed_header_crc {
        return Err(EwfError::format_invalid("sector-range header CRC mismatch"));
    }

    let entries_len = amount * RANGE_ENTRY_SIZE;
    if payload.len() < RANGE_HEADER_SIZE + entries_len + 4 {
        return Err(EwfError::format_invalid(
            "sector-range section truncated before entry array end",
        ));
    }
    let entries_bytes = &payload[RANGE_HEADER_SIZE..RANGE_HEADER_SIZE + entries_len];
    let trailing_crc = u32::from_le_bytes(
        payload[RANGE_HEADER_SIZE + entries_len..RANGE_HEADER_SIZE + entries_len + 4]
            .try_into()
            .unwrap(),
    );
    let computed_trailing_crc = checksum::adler32(entries_bytes);
    if trailing_crc != computed_trailing_crc {
        return Err(EwfError::format_invalid(
            "sector-range entry array CRC mismatch",
        ));
    }

    let mut table = SectorRangeTable::new(coalesce_adjacent);
    for chunk in entries_bytes.chunks_exact(RANGE_ENTRY_SIZE) {
        let first_sector = u32::from_le_bytes(chunk[0..4].try_into().unwrap()) as u64;
        let sector_count = u32::from_le_bytes(chunk[4..8].try_into().unwrap()) as u64;
        table.add(first_sector, sector_count);
    }
    Ok(table)
}

pub fn encode_sector_range_section(table: &SectorRangeTable) -> Vec<u8> {
    let mut header = vec![0u8; RANGE_HEADER_SIZE - 4];
    header[0..4].copy_from_slice(&(table.amount() as u32).to_le_bytes());
    let header_crc = checksum::adler32(&header);

    let mut entries_bytes = Vec::with_capacity(table.amount() * RANGE_ENTRY_SIZE);
    for entry in table.iter() {
        entries_bytes.extend_from_slice(&(entry.first_sector as u32).to_le_bytes());
        entries_bytes.extend_from_slice(&(entry.sector_count as u32).to_le_bytes());
    }
    let entries_crc = checksum::adler32(&entries_bytes);

    let mut out = header;
    out.extend_from_slice(&header_crc.to_le_bytes());
    out.extend_from_slice(&entries_bytes);
    out.extend_from_slice(&entries_crc.to_le_bytes());
    out
}

/// Decodes a zlib-compressed UTF-8 text blob (`header`, `header2`, `xheader`,
/// `xhash`) followed by a trailing `crc[4]` over the *compressed* bytes.
pub fn decode_compressed_text(payload: &[u8]) -> EwfResult<Vec<u8>> {
    if payload.len() < 4 {
        return Err(EwfError::format_invalid("compressed text section too short"));
    }
    let (compressed, crc_bytes) = payload.split_at(payload.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let computed_crc = checksum::adler32(compressed);
    if stored_crc != computed_crc {
        return Err(EwfError::format_invalid(
            "compressed text section CRC mismatch",
        ));
    }
    let mut decoder = ZlibDecoder::new(compressed);
    let mut text = Vec::new();
    decoder
        .read_to_end(&mut text)
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    Ok(text)
}

/// Compresses `text` and appends the trailing CRC, ready to become a
/// section payload.
pub fn encode_compressed_text(text: &[u8]) -> EwfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(text)
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    let crc = checksum::adler32(&compressed);
    let mut out = compressed;
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}
