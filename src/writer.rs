//! Segment-file writer (component F): the `INIT → HEADERS → BODY →
//! FINALIZING → CLOSED` state machine that turns a stream of encoded
//! chunks into a valid segment-file chain.
//!
//! Only the first segment in a chain carries `header`/`header2`/`xheader`
//! and `volume`/`disk` sections; later segments share that geometry and
//! open straight into `BODY`. This mirrors how every real EWF/E01 chain is
//! laid out and keeps header duplication (spec §6.1, format-profile driven)
//! from being repeated once per segment.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::checksum;
use crate::codec::EncodedChunk;
use crate::error::{EwfError, EwfResult};
use crate::format::{self, FormatProfile, ImageFormat};
use crate::media::MediaValues;
use crate::section;
use crate::sector_table::SectorRangeTable;
use crate::segment::descriptor::{SectionDescriptor, SegmentHeader, SECTION_DESCRIPTOR_SIZE};
use crate::segment::naming::NamingScheme;
use crate::segment::pool::SegmentPool;
use crate::table::{ChunkLocation, RawTable};
use crate::values::{self, HashValues, HeaderValues};

/// Worst-case bytes of trailer a writer must always keep room for when
/// deciding whether another chunk still fits in the current segment: two
/// table sections (descriptor + growing entry array, estimated at the
/// current pending count) plus a terminator descriptor.
const TERMINATOR_RESERVE: u64 = SECTION_DESCRIPTOR_SIZE as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Init,
    Headers,
    Body,
    Finalizing,
    Closed,
}

pub struct SegmentWriter {
    pool: SegmentPool,
    scheme: NamingScheme,
    format: ImageFormat,
    profile: &'static FormatProfile,
    media: MediaValues,
    segment_file_size: u64,
    state: WriterState,
    current_segment: u64,
    /// Absolute offset of the current segment's open `sectors` descriptor,
    /// patched with its real size/next_offset when the section closes.
    sectors_descriptor_offset: Option<u64>,
    /// Absolute offset of the start of the `sectors` payload — doubles as
    /// the current segment's pending table's `base_offset`.
    sectors_payload_start: Option<u64>,
    pending_table: RawTable,
    /// Absolute offset of segment 1's volume payload, kept so `finalize`
    /// can patch `amount_of_chunks` if it wasn't known at `begin`.
    volume_patch_offset: Option<u64>,
    total_chunks_written: u64,
}

impl SegmentWriter {
    pub fn create(
        basename: PathBuf,
        scheme: NamingScheme,
        format: ImageFormat,
        media: MediaValues,
        segment_file_size: u64,
    ) -> Self {
        SegmentWriter {
            pool: SegmentPool::new_for_write(basename, scheme),
            scheme,
            format,
            profile: format::profile_for(format),
            media,
            segment_file_size,
            state: WriterState::Init,
            current_segment: 0,
            sectors_descriptor_offset: None,
            sectors_payload_start: None,
            pending_table: RawTable::new(0),
            volume_patch_offset: None,
            total_chunks_written: 0,
        }
    }

    /// Opens segment 1 and emits its header duplication + volume section.
    pub fn begin(&mut self, header_values: &HeaderValues) -> EwfResult<()> {
        if self.state != WriterState::Init {
            return Err(EwfError::StateImmutable(
                "segment writer already started".into(),
            ));
        }
        self.current_segment = 1;
        self.pool.create_segment(1)?;
        self.open_segment_header(1)?;
        self.state = WriterState::Headers;
        self.write_headers_and_volume(header_values)?;
        self.state = WriterState::Body;
        info!("segment writer opened chain, segment 1 ready for chunk data");
        Ok(())
    }

    fn open_segment_header(&mut self, n: u64) -> EwfResult<()> {
        let mut buf = Vec::new();
        SegmentHeader::new(n as u16).write(&mut buf)?;
        self.pool.append(n, &buf)?;
        Ok(())
    }

    fn write_headers_and_volume(&mut self, header_values: &HeaderValues) -> EwfResult<()> {
        let text = values::encode_value_table(&header_values.0);

        for _ in 0..self.profile.header_duplication.max(1) {
            self.write_section("header", &section::encode_compressed_text(&text)?)?;
        }
        if self.profile.has_header2 {
            let utf16: Vec<u8> = text
                .iter()
                .flat_map(|&b| (b as u16).to_le_bytes())
                .collect();
            self.write_section("header2", &section::encode_compressed_text(&utf16)?)?;
        }
        if self.profile.has_xheader {
            self.write_section("xheader", &section::encode_compressed_text(&text)?)?;
        }

        let amount_of_chunks = if self.media.total_sectors > 0 {
            self.media.total_chunks() as u32
        } else {
            0
        };
        let volume_payload = section::encode_volume(&self.media, amount_of_chunks);
        let offset = self.write_section("volume", &volume_payload)?;
        self.volume_patch_offset = Some(offset);
        Ok(())
    }

    /// Writes one complete section (descriptor + payload) at the current
    /// end of the active segment, returning the absolute offset its
    /// payload starts at.
    fn write_section(&mut self, kind: &str, payload: &[u8]) -> EwfResult<u64> {
        let descriptor_offset = self.pool.size(self.current_segment)?;
        let total_size = SECTION_DESCRIPTOR_SIZE as u64 + payload.len() as u64;
        let next_offset = descriptor_offset + total_size;
        let descriptor = SectionDescriptor::new(kind, next_offset, total_size);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        buf.extend_from_slice(payload);
        self.pool.append(self.current_segment, &buf)?;
        Ok(descriptor_offset + SECTION_DESCRIPTOR_SIZE as u64)
    }

    /// Reserves a terminator-style descriptor (`next`/`done`/table slots
    /// that will be patched once their payload size is known) by writing a
    /// placeholder and returning its absolute offset.
    fn reserve_descriptor(&mut self) -> EwfResult<u64> {
        let offset = self.pool.size(self.current_segment)?;
        let placeholder = SectionDescriptor::new("", 0, 0);
        let mut buf = Vec::new();
        placeholder.write(&mut buf)?;
        self.pool.append(self.current_segment, &buf)?;
        Ok(offset)
    }

    fn patch_descriptor(&mut self, offset: u64, kind: &str, next_offset: u64, size: u64) -> EwfResult<()> {
        let descriptor = SectionDescriptor::new(kind, next_offset, size);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        self.pool.write_at(self.current_segment, offset, &buf)
    }

    fn open_sectors_section(&mut self) -> EwfResult<()> {
        let descriptor_offset = self.reserve_descriptor()?;
        self.sectors_descriptor_offset = Some(descriptor_offset);
        self.sectors_payload_start = Some(descriptor_offset + SECTION_DESCRIPTOR_SIZE as u64);
        self.pending_table = RawTable::new(descriptor_offset + SECTION_DESCRIPTOR_SIZE as u64);
        Ok(())
    }

    /// Appends one encoded chunk, rolling the segment first if it would no
    /// longer fit under `segment_file_size` (spec §4.F rollover rule).
    pub fn add_chunk(&mut self, encoded: &EncodedChunk) -> EwfResult<ChunkLocation> {
        if self.state != WriterState::Body {
            return Err(EwfError::StateImmutable(
                "segment writer is not in its body-writing state".into(),
            ));
        }
        self.ensure_room_for(encoded.bytes.len())?;
        if self.sectors_descriptor_offset.is_none() {
            self.open_sectors_section()?;
        }

        let offset = self.pool.append(self.current_segment, &encoded.bytes)?;
        let relative = offset - self.sectors_payload_start.expect("sectors section open");
        self.pending_table.push(relative as u32, encoded.compressed);
        self.total_chunks_written += 1;

        Ok(ChunkLocation {
            segment: self.current_segment,
            file_offset: offset,
            compressed: encoded.compressed,
        })
    }

    fn ensure_room_for(&mut self, chunk_len: usize) -> EwfResult<()> {
        if self.pending_table.entries.is_empty() {
            return Ok(());
        }
        let current_size = self.pool.size(self.current_segment)?;
        let projected_table_cost = (self.pending_table.entries.len() + 1) as u64 * 4 * 2
            + 36 * 2
            + 4 * 2;
        let projected = current_size + chunk_len as u64 + projected_table_cost + TERMINATOR_RESERVE;
        if projected > self.segment_file_size {
            self.roll_segment()?;
        }
        Ok(())
    }

    fn roll_segment(&mut self) -> EwfResult<()> {
        self.close_sectors_and_emit_tables()?;
        self.write_terminator("next")?;
        self.pool.flush(self.current_segment)?;

        self.current_segment += 1;
        self.pool.create_segment(self.current_segment)?;
        self.open_segment_header(self.current_segment)?;
        self.sectors_descriptor_offset = None;
        self.sectors_payload_start = None;
        debug!("rolled over to segment {}", self.current_segment);
        Ok(())
    }

    fn close_sectors_and_emit_tables(&mut self) -> EwfResult<()> {
        let (descriptor_offset, payload_start) = match (self.sectors_descriptor_offset, self.sectors_payload_start)
        {
            (Some(d), Some(p)) => (d, p),
            _ => return Ok(()),
        };

        let sectors_end = self.pool.size(self.current_segment)?;
        let sectors_size = sectors_end - descriptor_offset;
        self.patch_descriptor(descriptor_offset, "sectors", sectors_end, sectors_size)?;

        let table_payload = self.pending_table.encode();
        self.write_section("table", &table_payload)?;
        self.write_section("table2", &table_payload)?;

        self.sectors_descriptor_offset = None;
        self.sectors_payload_start = None;
        let _ = payload_start;
        Ok(())
    }

    fn write_terminator(&mut self, kind: &str) -> EwfResult<()> {
        let offset = self.pool.size(self.current_segment)?;
        let total_size = SECTION_DESCRIPTOR_SIZE as u64;
        let descriptor = SectionDescriptor::new(kind, offset, total_size);
        let mut buf = Vec::new();
        descriptor.write(&mut buf)?;
        self.pool.append(self.current_segment, &buf)?;
        Ok(())
    }

    /// Derives `total_sectors` from a `media_size` the caller only knows
    /// at close (spec §4.H: "if not declared, `media_size` is derived at
    /// close from total bytes written"), so `finalize`'s `volume` patch
    /// below reflects the real chunk count instead of leaving it at 0.
    pub fn reconcile_media_size(&mut self, derived_media_size: u64) {
        let bps = self.media.bytes_per_sector.max(1) as u64;
        self.media.total_sectors = (derived_media_size + bps - 1) / bps;
    }

    /// Emits the metadata tail (`error2`, `session`, `hash`, `digest`,
    /// `xhash`) and the final `done` terminator, patching segment 1's
    /// `amount_of_chunks` if it was unknown at `begin`.
    #[allow(clippy::too_many_arguments)]
    pub fn finalize(
        &mut self,
        md5: [u8; 16],
        sha1: [u8; 20],
        hash_values: &HashValues,
        acquiry_errors: &SectorRangeTable,
        crc_errors: &SectorRangeTable,
        sessions: &SectorRangeTable,
    ) -> EwfResult<()> {
        if self.state != WriterState::Body {
            return Err(EwfError::StateImmutable(
                "segment writer is not open for finalization".into(),
            ));
        }
        self.state = WriterState::Finalizing;
        self.close_sectors_and_emit_tables()?;

        if !acquiry_errors.is_empty() {
            self.write_section("error2", &section::encode_sector_range_section(acquiry_errors))?;
        }
        let _ = crc_errors; // crc_errors are a read-side bookkeeping table, not written back.
        if !sessions.is_empty() {
            self.write_section("session", &section::encode_sector_range_section(sessions))?;
        }

        if self.profile.has_digest {
            let digest = section::DigestPayload { md5, sha1 };
            self.write_section("digest", &section::encode_digest(&digest))?;
        } else {
            let hash = section::HashPayload {
                md5,
                unknown: [0u8; 16],
            };
            self.write_section("hash", &section::encode_hash(&hash))?;
        }

        if hash_values.0.iter().next().is_some() {
            let xhash_text = values::encode_value_table(&hash_values.0);
            self.write_section("xhash", &section::encode_compressed_text(&xhash_text)?)?;
        }

        self.write_terminator("done")?;
        self.pool.flush(self.current_segment)?;

        if self.media.total_sectors == 0 {
            warn!("media_size was not declared up front; volume section's amount_of_chunks left at 0");
        } else if let Some(offset) = self.volume_patch_offset {
            self.patch_volume_amount_of_chunks(offset)?;
        }

        self.state = WriterState::Closed;
        info!(
            "segment writer finalized after {} chunks across {} segment(s)",
            self.total_chunks_written, self.current_segment
        );
        Ok(())
    }

    fn patch_volume_amount_of_chunks(&mut self, payload_offset: u64) -> EwfResult<()> {
        let amount = self.media.total_chunks() as u32;
        let mut field = [0u8; 4];
        field.copy_from_slice(&amount.to_le_bytes());
        self.pool.write_at(1, payload_offset + 0x04, &field)?;

        let mut buf = vec![0u8; section::VOLUME_PAYLOAD_SIZE];
        self.pool.read_at(1, payload_offset, &mut buf)?;
        let crc = checksum::adler32(&buf);
        self.pool.write_at(1, payload_offset + section::VOLUME_PAYLOAD_SIZE as u64, &crc.to_le_bytes())
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn segment_count(&self) -> u64 {
        self.current_segment
    }

    pub fn naming_scheme(&self) -> NamingScheme {
        self.scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_chunk, CompressionPolicy};
    use tempfile::tempdir;

    #[test]
    fn single_chunk_write_produces_one_segment() {
        let dir = tempdir().unwrap();
        let mut media = MediaValues::default();
        media.total_sectors = 1;
        let mut writer = SegmentWriter::create(
            dir.path().join("image"),
            NamingScheme::Standard,
            ImageFormat::EnCase6,
            media,
            crate::media::DEFAULT_SEGMENT_FILE_SIZE,
        );
        writer.begin(&HeaderValues::default()).unwrap();

        let payload = vec![0x41u8; 512];
        let encoded = encode_chunk(&payload, &CompressionPolicy::default()).unwrap();
        writer.add_chunk(&encoded).unwrap();

        writer
            .finalize(
                [0u8; 16],
                [0u8; 20],
                &HashValues::default(),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(false),
            )
            .unwrap();

        assert_eq!(writer.segment_count(), 1);
        assert_eq!(writer.state(), WriterState::Closed);
    }

    #[test]
    fn rollover_triggers_on_tiny_segment_size() {
        let dir = tempdir().unwrap();
        let mut media = MediaValues::default();
        media.total_sectors = 256;
        // Small enough that a handful of 32 KiB chunks forces a rollover.
        let mut writer = SegmentWriter::create(
            dir.path().join("image"),
            NamingScheme::Standard,
            ImageFormat::EnCase6,
            media,
            4096,
        );
        writer.begin(&HeaderValues::default()).unwrap();

        let payload = vec![0x00u8; 32 * 1024];
        for _ in 0..4 {
            let encoded = encode_chunk(&payload, &CompressionPolicy::default()).unwrap();
            writer.add_chunk(&encoded).unwrap();
        }
        writer
            .finalize(
                [0u8; 16],
                [0u8; 20],
                &HashValues::default(),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(true),
                &SectorRangeTable::new(false),
            )
            .unwrap();

        assert!(writer.segment_count() > 1);
    }
}
