//! Chunk table (component C): the `table`/`table2` on-disk payload codec
//! plus the resolved, segment-spanning index used by the read/write
//! engines.

use std::collections::HashMap;

use crate::checksum;
use crate::error::{EwfError, EwfResult};

const TABLE_HEADER_SIZE: usize = 36;
const TABLE_ENTRY_SIZE: usize = 4;
const TABLE_COMPRESSED_BIT: u32 = 0x8000_0000;
const TABLE_OFFSET_MASK: u32 = 0x7FFF_FFFF;

/// The raw `table`/`table2` payload: a base offset and an array of
/// MSB-tagged entry offsets (spec §6.1 "`table` payload").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub base_offset: u64,
    pub entries: Vec<u32>,
}

impl RawTable {
    pub fn new(base_offset: u64) -> Self {
        RawTable {
            base_offset,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, offset_from_base: u32, compressed: bool) {
        let tagged = if compressed {
            offset_from_base | TABLE_COMPRESSED_BIT
        } else {
            offset_from_base
        };
        self.entries.push(tagged);
    }

    /// Decodes a `table`/`table2` section payload, verifying both the
    /// header CRC and the trailing entry-array CRC.
    pub fn decode(payload: &[u8]) -> EwfResult<Self> {
        if payload.len() < TABLE_HEADER_SIZE + TABLE_ENTRY_SIZE {
            return Err(EwfError::format_invalid("table payload too short"));
        }
        let amount = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
        let base_offset = u64::from_le_bytes(payload[20..28].try_into().unwrap());
        let header_crc = u32::from_le_bytes(payload[32..36].try_into().unwrap());
        let computed_header_crc = checksum::adler32(&payload[0..32]);
        if header_crc != computed_header_crc {
            return Err(EwfError::format_invalid(
                "table header CRC mismatch",
            ));
        }

        let entries_start = TABLE_HEADER_SIZE;
        let entries_len = amount * TABLE_ENTRY_SIZE;
        if payload.len() < entries_start + entries_len + 4 {
            return Err(EwfError::format_invalid(
                "table payload truncated before entry array end",
            ));
        }
        let entries_bytes = &payload[entries_start..entries_start + entries_len];
        let trailing_crc = u32::from_le_bytes(
            payload[entries_start + entries_len..entries_start + entries_len + 4]
                .try_into()
                .unwrap(),
        );
        let computed_trailing_crc = checksum::adler32(entries_bytes);
        if trailing_crc != computed_trailing_crc {
            return Err(EwfError::format_invalid(
                "table entry array CRC mismatch",
            ));
        }

        let entries = entries_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        Ok(RawTable {
            base_offset,
            entries,
        })
    }

    /// Encodes the table back to its on-disk form.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(TABLE_HEADER_SIZE);
        header.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        header.extend_from_slice(&[0u8; 16]);
        header.extend_from_slice(&self.base_offset.to_le_bytes());
        header.extend_from_slice(&[0u8; 4]);
        let header_crc = checksum::adler32(&header);
        header.extend_from_slice(&header_crc.to_le_bytes());

        let mut entries_bytes = Vec::with_capacity(self.entries.len() * 4);
        for e in &self.entries {
            entries_bytes.extend_from_slice(&e.to_le_bytes());
        }
        let entries_crc = checksum::adler32(&entries_bytes);

        let mut out = header;
        out.extend_from_slice(&entries_bytes);
        out.extend_from_slice(&entries_crc.to_le_bytes());
        out
    }

    pub fn is_compressed(entry: u32) -> bool {
        entry & TABLE_COMPRESSED_BIT != 0
    }

    pub fn offset_of(&self, entry: u32) -> u64 {
        (entry & TABLE_OFFSET_MASK) as u64 + self.base_offset
    }
}

/// Resolved location of one chunk: which segment holds it and at what
/// absolute byte offset within that segment's `sectors` data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub segment: u64,
    pub file_offset: u64,
    pub compressed: bool,
}

/// Global, segment-spanning chunk index (spec §4.C). Built by walking
/// every segment's `table` (optionally cross-checked against `table2`)
/// sections in order.
#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    entries: Vec<ChunkLocation>,
    /// Per-segment absolute offset marking the end of that segment's
    /// `sectors` data — needed to size the final chunk of each segment.
    segment_end_of_sectors: HashMap<u64, u64>,
}

impl ChunkTable {
    pub fn new() -> Self {
        ChunkTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, location: ChunkLocation) {
        self.entries.push(location);
    }

    pub fn extend_from_raw(&mut self, raw: &RawTable, segment: u64) {
        for &entry in &raw.entries {
            self.push(ChunkLocation {
                segment,
                file_offset: raw.offset_of(entry),
                compressed: RawTable::is_compressed(entry),
            });
        }
    }

    pub fn set_segment_end(&mut self, segment: u64, end_offset: u64) {
        self.segment_end_of_sectors.insert(segment, end_offset);
    }

    pub fn get(&self, index: u64) -> EwfResult<ChunkLocation> {
        self.entries
            .get(index as usize)
            .copied()
            .ok_or_else(|| EwfError::ArgumentOutOfRange(format!("chunk index {index} out of range")))
    }

    /// Size in bytes of chunk `index`'s stored (possibly compressed) form,
    /// inferred from the gap to the next chunk or, for a segment's last
    /// chunk, from the recorded end-of-sectors offset (spec §3 "Chunk
    /// table entry").
    pub fn stored_size(&self, index: u64) -> EwfResult<u64> {
        let loc = self.get(index)?;
        if let Some(next) = self.entries.get(index as usize + 1) {
            if next.segment == loc.segment {
                return Ok(next.file_offset - loc.file_offset);
            }
        }
        let end = self
            .segment_end_of_sectors
            .get(&loc.segment)
            .copied()
            .ok_or_else(|| {
                EwfError::format_invalid(format!(
                    "no end-of-sectors offset recorded for segment {}",
                    loc.segment
                ))
            })?;
        Ok(end - loc.file_offset)
    }

    /// Compares this table's view of a segment's chunks (already merged
    /// in from `table`) against a freshly parsed `table2`, per spec
    /// invariant 2. A byte-exact encode of both raw tables is the
    /// authoritative comparison — returns `true` iff they match.
    pub fn table2_matches(primary: &RawTable, secondary: &RawTable) -> bool {
        primary.base_offset == secondary.base_offset && primary.entries == secondary.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_table_round_trips() {
        let mut t = RawTable::new(100);
        t.push(0, false);
        t.push(64, true);
        let bytes = t.encode();
        let parsed = RawTable::decode(&bytes).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn offset_resolution_adds_base_and_strips_compressed_bit() {
        let mut t = RawTable::new(1000);
        t.push(50, true);
        assert!(RawTable::is_compressed(t.entries[0]));
        assert_eq!(t.offset_of(t.entries[0]), 1050);
    }

    #[test]
    fn corrupted_table_header_crc_is_rejected() {
        let t = RawTable::new(0);
        let mut bytes = t.encode();
        bytes[0] ^= 0xFF;
        assert!(RawTable::decode(&bytes).is_err());
    }

    #[test]
    fn chunk_table_infers_size_from_next_entry() {
        let mut ct = ChunkTable::new();
        ct.push(ChunkLocation {
            segment: 1,
            file_offset: 0,
            compressed: false,
        });
        ct.push(ChunkLocation {
            segment: 1,
            file_offset: 100,
            compressed: false,
        });
        ct.set_segment_end(1, 150);
        assert_eq!(ct.stored_size(0).unwrap(), 100);
        assert_eq!(ct.stored_size(1).unwrap(), 50);
    }

    #[test]
    fn table2_mismatch_is_detected() {
        let mut a = RawTable::new(0);
        a.push(0, false);
        let mut b = RawTable::new(0);
        b.push(4, false);
        assert!(!ChunkTable::table2_matches(&a, &b));
    }
}
