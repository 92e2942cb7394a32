//! Delta overwriter (component I): an in-place *logical* overwrite
//! implemented as a second, minimal segment-file chain that shadows only
//! the chunks it touches. The main chain is never reopened for writing.
//!
//! On-disk shape (spec §4.I): header + `volume` copy + `sectors`
//! containing only overwritten chunks + `table`/`table2` + `done`. This
//! implementation's one deliberate departure from the main chain's table
//! layout is recorded in DESIGN.md: delta chunks are always stored
//! uncompressed (no reason to pay compression cost for a small overlay),
//! and `table2`'s entry array carries the *original* chunk index for
//! each delta entry rather than a byte-identical copy of `table` - the
//! main chain's table/table2 redundancy invariant (spec §3 invariant 2)
//! is specific to the main chain; the delta chain has no such copy to
//! cross-check against, so table2 is repurposed as the index map a
//! reader needs to resolve "which original chunk does entry N replace".

use std::collections::HashMap;
use std::path::PathBuf;

use log::info;

use crate::codec::{self, CompressionPolicy};
use crate::error::EwfResult;
use crate::format::ImageFormat;
use crate::media::MediaValues;
use crate::read_engine::{self, ReadEngine};
use crate::sector_table::SectorRangeTable;
use crate::segment::descriptor::{SectionDescriptor, SegmentHeader, SECTION_DESCRIPTOR_SIZE};
use crate::segment::naming::NamingScheme;
use crate::segment::pool::SegmentPool;
use crate::table::{ChunkLocation, ChunkTable, RawTable};
use crate::values::HeaderValues;

/// Delta chains always store chunks uncompressed: they exist for fast,
/// small overlays, not space efficiency.
const DELTA_POLICY: CompressionPolicy = CompressionPolicy {
    level: crate::codec::CompressionLevel::None,
    compress_empty_block: false,
};

/// A writable overlay chain addressed by a different basename/extension
/// than the main chain (`.d01`, spec §6.2).
pub struct DeltaOverwriter {
    pool: SegmentPool,
    media: MediaValues,
    /// Original chunk index -> location within the delta chain.
    overrides: HashMap<u64, ChunkLocation>,
    /// Insertion order, needed to emit `table`/`table2` in a stable order.
    order: Vec<u64>,
    segment: u64,
    sectors_descriptor_offset: Option<u64>,
    sectors_payload_start: Option<u64>,
    closed: bool,
}

impl DeltaOverwriter {
    /// Opens (creating if absent) the delta chain rooted at `basename`.
    /// `header_values` is copied in verbatim (spec §4.I, SPEC_FULL.md B.3)
    /// so the delta segment is independently inspectable.
    pub fn create(basename: PathBuf, media: MediaValues, header_values: &HeaderValues) -> EwfResult<Self> {
        let mut pool = SegmentPool::new_for_write(basename, NamingScheme::Delta);
        pool.create_segment(1)?;

        let mut header_buf = Vec::new();
        SegmentHeader::new(1).write(&mut header_buf)?;
        pool.append(1, &header_buf)?;

        let mut overwriter = DeltaOverwriter {
            pool,
            media,
            overrides: HashMap::new(),
            order: Vec::new(),
            segment: 1,
            sectors_descriptor_offset: None,
            sectors_payload_start: None,
            closed: false,
        };
        overwriter.write_headers_and_volume(header_values)?;
        Ok(overwriter)
    }

    fn write_headers_and_volume(&mut self, header_values: &HeaderValues) -> EwfResult<()> {
        let text = crate::values::encode_value_table(&header_values.0);
        self.write_section("header", &crate::section::encode_compressed_text(&text)?)?;
        let amount_of_chunks = self.media.total_chunks() as u32;
        let volume_payload = crate::section::encode_volume(&self.media, amount_of_chunks);
        self.write_section("volume", &volume_payload)?;
        Ok(())
    }

    fn write_section(&mut self, kind: &str, payload: &[u8]) -> EwfResult<u64> {
        let descriptor_offset = self.pool.size(self.segment)?;
        let total_size = SECTION_DESCRIPTOR_SIZE as u64 + payload.len() as u64;
        let next_offset = descriptor_offset + total_size;
        let descriptor = SectionDescriptor::new(kind, next_offset, total_size);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        buf.extend_from_slice(payload);
        self.pool.append(self.segment, &buf)?;
        Ok(descriptor_offset + SECTION_DESCRIPTOR_SIZE as u64)
    }

    fn reserve_descriptor(&mut self) -> EwfResult<u64> {
        let offset = self.pool.size(self.segment)?;
        let placeholder = SectionDescriptor::new("", 0, 0);
        let mut buf = Vec::new();
        placeholder.write(&mut buf)?;
        self.pool.append(self.segment, &buf)?;
        Ok(offset)
    }

    fn patch_descriptor(&mut self, offset: u64, kind: &str, next_offset: u64, size: u64) -> EwfResult<()> {
        let descriptor = SectionDescriptor::new(kind, next_offset, size);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        self.pool.write_at(self.segment, offset, &buf)
    }

    fn ensure_sectors_open(&mut self) -> EwfResult<()> {
        if self.sectors_descriptor_offset.is_some() {
            return Ok(());
        }
        let descriptor_offset = self.reserve_descriptor()?;
        self.sectors_descriptor_offset = Some(descriptor_offset);
        self.sectors_payload_start = Some(descriptor_offset + SECTION_DESCRIPTOR_SIZE as u64);
        Ok(())
    }

    /// Looks up whether `chunk_index` has been overridden by this delta
    /// chain, for the read engine to consult before the main chain.
    pub fn lookup(&self, chunk_index: u64) -> Option<ChunkLocation> {
        self.overrides.get(&chunk_index).copied()
    }

    /// Reads and decodes an overridden chunk from *this* delta chain's own
    /// pool (never the main chain's — `lookup`'s `ChunkLocation` is a
    /// position inside the `.d01` file, not the `.E01`). Mirrors
    /// `current_chunk_bytes` below but surfaces the decode error so the
    /// caller can record it into its own `crc_errors` table.
    pub fn read_chunk(
        &mut self,
        chunk_index: u64,
        expected_size: usize,
        wipe_on_error: bool,
    ) -> EwfResult<codec::DecodedChunk> {
        let loc = self.overrides.get(&chunk_index).copied().ok_or_else(|| {
            crate::error::EwfError::ValueMissing(format!("chunk {chunk_index} not overridden by delta"))
        })?;
        let mut stored = vec![0u8; expected_size + 4];
        self.pool.read_at(loc.segment, loc.file_offset, &mut stored)?;
        let range = read_engine::chunk_sector_range(&self.media, chunk_index);
        codec::decode_chunk(&stored, loc.compressed, expected_size, range, wipe_on_error)
    }

    /// Overwrites byte range `[offset, offset + data.len())` against the
    /// main chain. Each touched chunk is read in full (delta override
    /// first, else main chain), patched in memory, and re-appended
    /// whole to the delta chain — a delta entry always carries an
    /// entire chunk's worth of data, never a partial one.
    #[allow(clippy::too_many_arguments)]
    pub fn overwrite(
        &mut self,
        main_pool: &mut SegmentPool,
        main_table: &ChunkTable,
        main_read_engine: &mut ReadEngine,
        crc_errors: &mut SectorRangeTable,
        offset: u64,
        data: &[u8],
    ) -> EwfResult<()> {
        let chunk_size = self.media.chunk_size() as u64;
        let media_size = self.media.media_size();
        let end = (offset + data.len() as u64).min(media_size);
        let mut pos = offset;
        let mut consumed = 0usize;

        while pos < end {
            let chunk_index = pos / chunk_size;
            let in_chunk_offset = (pos % chunk_size) as usize;
            let expected_size =
                read_engine::expected_chunk_size(&self.media, chunk_index, self.media.total_chunks());
            let take = (expected_size - in_chunk_offset).min((end - pos) as usize);

            let mut chunk_bytes = self.current_chunk_bytes(
                main_pool,
                main_table,
                main_read_engine,
                crc_errors,
                chunk_index,
                expected_size,
            )?;
            chunk_bytes[in_chunk_offset..in_chunk_offset + take]
                .copy_from_slice(&data[consumed..consumed + take]);
            self.store_chunk(chunk_index, &chunk_bytes)?;

            pos += take as u64;
            consumed += take;
        }
        Ok(())
    }

    fn current_chunk_bytes(
        &mut self,
        main_pool: &mut SegmentPool,
        main_table: &ChunkTable,
        main_read_engine: &mut ReadEngine,
        crc_errors: &mut SectorRangeTable,
        chunk_index: u64,
        expected_size: usize,
    ) -> EwfResult<Vec<u8>> {
        if self.overrides.contains_key(&chunk_index) {
            let decoded = self.read_chunk(chunk_index, expected_size, false)?;
            return Ok(decoded.data);
        }
        let mut buf = vec![0u8; expected_size];
        let offset = chunk_index * self.media.chunk_size() as u64;
        main_read_engine.read(main_pool, main_table, &self.media, crc_errors, None, offset, &mut buf)?;
        Ok(buf)
    }

    fn store_chunk(&mut self, chunk_index: u64, raw: &[u8]) -> EwfResult<()> {
        self.ensure_sectors_open()?;
        let encoded = codec::encode_chunk(raw, &DELTA_POLICY)?;
        debug_assert!(!encoded.compressed);
        let offset = self.pool.append(self.segment, &encoded.bytes)?;

        if !self.overrides.contains_key(&chunk_index) {
            self.order.push(chunk_index);
        }
        self.overrides.insert(
            chunk_index,
            ChunkLocation {
                segment: self.segment,
                file_offset: offset,
                compressed: false,
            },
        );
        Ok(())
    }

    /// Closes the `sectors` section, emits `table`/`table2` (the latter
    /// carrying original chunk indices, see module docs), and the final
    /// `done` terminator.
    pub fn finalize(mut self) -> EwfResult<()> {
        if self.overrides.is_empty() {
            info!("delta overwriter closed with no overwritten chunks; chain left minimal");
        }
        if let (Some(descriptor_offset), Some(payload_start)) =
            (self.sectors_descriptor_offset, self.sectors_payload_start)
        {
            let sectors_end = self.pool.size(self.segment)?;
            let sectors_size = sectors_end - descriptor_offset;
            self.patch_descriptor(descriptor_offset, "sectors", sectors_end, sectors_size)?;

            let mut table = RawTable::new(payload_start);
            let mut index_table = RawTable::new(0);
            for &chunk_index in &self.order {
                let loc = self.overrides[&chunk_index];
                table.push((loc.file_offset - payload_start) as u32, false);
                index_table.push(chunk_index as u32, false);
            }
            let table_payload = table.encode();
            self.write_section("table", &table_payload)?;
            let index_payload = index_table.encode();
            self.write_section("table2", &index_payload)?;
        }

        self.write_terminator()?;
        self.pool.flush(self.segment)?;
        self.closed = true;
        info!(
            "delta overwriter finalized: {} chunk(s) overridden",
            self.overrides.len()
        );
        Ok(())
    }

    fn write_terminator(&mut self) -> EwfResult<()> {
        let offset = self.pool.size(self.segment)?;
        let descriptor = SectionDescriptor::new("done", offset, SECTION_DESCRIPTOR_SIZE as u64);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        self.pool.append(self.segment, &buf)
    }

    /// Reopens an existing delta chain for read, rebuilding the
    /// chunk-index -> location map from its `table`/`table2` pair.
    pub fn open_existing(basename: PathBuf, media: MediaValues) -> EwfResult<Self> {
        let delta_path = crate::segment::naming::segment_path(&basename, NamingScheme::Delta, 1)?;
        let mut pool = SegmentPool::open_existing(&delta_path, NamingScheme::Delta)?;

        let size = pool.size(1)?;
        let mut offset = crate::segment::descriptor::SEGMENT_HEADER_SIZE as u64;
        let mut overrides = HashMap::new();
        let mut order = Vec::new();
        let mut pending_table: Option<RawTable> = None;

        loop {
            if offset + SECTION_DESCRIPTOR_SIZE as u64 > size {
                return Err(crate::error::EwfError::format_invalid(
                    "delta chain truncated before a complete section descriptor",
                ));
            }
            let mut desc_buf = [0u8; SECTION_DESCRIPTOR_SIZE];
            pool.read_at(1, offset, &mut desc_buf)?;
            let descriptor = SectionDescriptor::read(&desc_buf[..])?;
            let payload_offset = offset + SECTION_DESCRIPTOR_SIZE as u64;
            let payload_len = (descriptor.size - SECTION_DESCRIPTOR_SIZE as u64) as usize;

            match descriptor.section_type.as_str() {
                "table" => {
                    let mut payload = vec![0u8; payload_len];
                    pool.read_at(1, payload_offset, &mut payload)?;
                    pending_table = Some(RawTable::decode(&payload)?);
                }
                "table2" => {
                    let mut payload = vec![0u8; payload_len];
                    pool.read_at(1, payload_offset, &mut payload)?;
                    let index_table = RawTable::decode(&payload)?;
                    if let Some(raw) = &pending_table {
                        for (slot, &entry) in raw.entries.iter().enumerate() {
                            let chunk_index = index_table.entries[slot] as u64;
                            let file_offset = raw.offset_of(entry);
                            overrides.insert(
                                chunk_index,
                                ChunkLocation {
                                    segment: 1,
                                    file_offset,
                                    compressed: false,
                                },
                            );
                            order.push(chunk_index);
                        }
                    }
                }
                "done" => break,
                _ => {}
            }
            if descriptor.next_offset <= offset && !descriptor.is_terminator() {
                return Err(crate::error::EwfError::format_invalid(
                    "delta chain section does not advance",
                ));
            }
            offset = descriptor.next_offset;
        }

        Ok(DeltaOverwriter {
            pool,
            media,
            overrides,
            order,
            segment: 1,
            sectors_descriptor_offset: None,
            sectors_payload_start: None,
            closed: true,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether `ImageFormat` compatibility matters for a delta chain:
    /// it never does — delta segments have no format-profile-dependent
    /// header duplication or xheader/digest sections.
    pub fn format_agnostic() -> ImageFormat {
        ImageFormat::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_chunk, CompressionPolicy};
    use crate::format::ImageFormat as Fmt;
    use crate::segment::naming::NamingScheme as Scheme;
    use crate::writer::SegmentWriter;
    use tempfile::tempdir;

    fn write_main_chain(dir: &std::path::Path, payload: &[u8]) -> MediaValues {
        let mut media = MediaValues::default();
        media.total_sectors = payload.len() as u64 / media.bytes_per_sector as u64;
        let mut writer = SegmentWriter::create(
            dir.join("image"),
            Scheme::Standard,
            Fmt::EnCase6,
            media.clone(),
            crate::media::DEFAULT_SEGMENT_FILE_SIZE,
        );
        writer.begin(&HeaderValues::default()).unwrap();
        let encoded = encode_chunk(payload, &CompressionPolicy::default()).unwrap();
        writer.add_chunk(&encoded).unwrap();
        writer
            .finalize(
                [0u8; 16],
                [0u8; 20],
                &crate::values::HashValues::default(),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(false),
            )
            .unwrap();
        media
    }

    #[test]
    fn overwrite_patches_only_the_targeted_bytes() {
        let dir = tempdir().unwrap();
        let payload = vec![0x41u8; 512];
        let media = write_main_chain(dir.path(), &payload);

        let mut main_pool = SegmentPool::open_existing(&dir.path().join("image.E01"), Scheme::Standard).unwrap();
        let chain = read_engine::open_chain(&mut main_pool).unwrap();
        let mut read_engine = ReadEngine::new(4, true);
        let mut crc_errors = SectorRangeTable::new(true);

        let mut delta = DeltaOverwriter::create(dir.path().join("image"), media.clone(), &HeaderValues::default()).unwrap();
        delta
            .overwrite(
                &mut main_pool,
                &chain.table,
                &mut read_engine,
                &mut crc_errors,
                256,
                &[0x5Au8; 64],
            )
            .unwrap();

        let loc = delta.lookup(0).expect("chunk 0 overridden");
        let mut stored = vec![0u8; 512 + 4];
        delta.pool.read_at(loc.segment, loc.file_offset, &mut stored).unwrap();
        let range = read_engine::chunk_sector_range(&media, 0);
        let decoded = codec::decode_chunk(&stored, false, 512, range, false).unwrap();
        assert_eq!(&decoded.data[0..256], &payload[0..256]);
        assert_eq!(&decoded.data[256..320], &[0x5Au8; 64][..]);
        assert_eq!(&decoded.data[320..], &payload[320..]);

        delta.finalize().unwrap();
    }
}
