//! Read engine (component G): opens an existing segment-file chain,
//! resolves its chunk table from `table`/`table2` sections, and serves
//! random-access `(offset, length)` reads through the chunk cache and
//! compression/CRC pipeline.

use log::{debug, info, warn};

use crate::cache::ChunkCache;
use crate::codec::{self, CompressionLevel};
use crate::error::{EwfError, EwfResult, SectorRange};
use crate::format::{self, FormatProfile, ImageFormat};
use crate::media::MediaValues;
use crate::section;
use crate::sector_table::SectorRangeTable;
use crate::segment::descriptor::{SectionDescriptor, SegmentHeader, SECTION_DESCRIPTOR_SIZE};
use crate::segment::pool::SegmentPool;
use crate::table::{ChunkTable, RawTable};
use crate::values::{self, HashValues, HeaderValues};

/// Everything recovered by walking a chain's sections once (spec §4.C
/// "Build phase" plus the rest of component J's on-disk tables).
pub struct OpenedChain {
    pub media: MediaValues,
    pub header_values: HeaderValues,
    pub hash_values: HashValues,
    pub stored_md5: Option<[u8; 16]>,
    pub stored_sha1: Option<[u8; 20]>,
    pub acquiry_errors: SectorRangeTable,
    pub sessions: SectorRangeTable,
    pub table: ChunkTable,
    pub format: ImageFormat,
    pub profile: &'static FormatProfile,
}

/// Walks every segment in `pool` (in ascending segment-number order),
/// dispatching on each section's type, and assembles the combined view
/// spec §3 "Lifecycle" describes as "parse volume/table from segment 1,
/// discover table of contents for segments 2..N lazily" — this
/// implementation resolves the whole chain eagerly, which is simpler and
/// still well within the chunk-count a forensic image realistically has.
pub fn open_chain(pool: &mut SegmentPool) -> EwfResult<OpenedChain> {
    let segment_numbers = pool.segment_numbers();
    if segment_numbers.is_empty() {
        return Err(EwfError::format_invalid("no segments registered in pool"));
    }

    let mut media: Option<MediaValues> = None;
    let mut header_values = HeaderValues::default();
    let mut hash_values = HashValues::default();
    let mut stored_md5 = None;
    let mut stored_sha1 = None;
    let mut acquiry_errors = SectorRangeTable::new(true);
    let mut sessions = SectorRangeTable::new(false);
    let mut table = ChunkTable::new();
    let mut format = ImageFormat::default();
    let mut saw_done = false;

    for &segment in &segment_numbers {
        if saw_done {
            warn!("segment {segment} follows a 'done' terminator; ignoring");
            break;
        }
        let chunks_before = table.len() as u64;
        let size = pool.size(segment)?;

        let mut buf = vec![0u8; SEGMENT_HEADER_READ];
        pool.read_at(segment, 0, &mut buf)?;
        let header = SegmentHeader::read(&buf[..])?;
        if header.segment_number as u64 != segment {
            warn!(
                "segment file reports number {} but occupies chain slot {}",
                header.segment_number, segment
            );
        }

        let mut offset = crate::segment::descriptor::SEGMENT_HEADER_SIZE as u64;
        let mut pending_table: Option<RawTable> = None;
        let mut sectors_end: Option<u64> = None;

        loop {
            if offset + SECTION_DESCRIPTOR_SIZE as u64 > size {
                return Err(EwfError::format_invalid(format!(
                    "segment {segment}: truncated before a complete section descriptor"
                )));
            }
            let mut desc_buf = [0u8; SECTION_DESCRIPTOR_SIZE];
            pool.read_at(segment, offset, &mut desc_buf)?;
            let descriptor = SectionDescriptor::read(&desc_buf[..])?;
            let payload_offset = offset + SECTION_DESCRIPTOR_SIZE as u64;
            let payload_len = descriptor
                .size
                .checked_sub(SECTION_DESCRIPTOR_SIZE as u64)
                .ok_or_else(|| EwfError::format_invalid("section size smaller than its descriptor"))?;

            debug!(
                "segment {segment}: section '{}' at 0x{:x}, {} byte payload",
                descriptor.section_type, offset, payload_len
            );

            match descriptor.section_type.as_str() {
                "header" | "header2" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let text = section::decode_compressed_text(&payload)?;
                    let parsed = values::parse_value_table(&text);
                    // header2 (UTF-16) is preferred on conflict: merged second.
                    header_values.0.merge_from(&parsed);
                }
                "xheader" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let text = section::decode_compressed_text(&payload)?;
                    let parsed = values::parse_value_table(&text);
                    header_values.0.merge_from(&parsed);
                }
                "xhash" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let text = section::decode_compressed_text(&payload)?;
                    let parsed = values::parse_value_table(&text);
                    hash_values.0.merge_from(&parsed);
                }
                "volume" | "disk" | "data" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let parsed = section::decode_volume(&payload)?;
                    format = pick_format_for_profile(&parsed);
                    media = Some(parsed);
                }
                "table" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let raw = RawTable::decode(&payload)?;
                    table.extend_from_raw(&raw, segment);
                    pending_table = Some(raw);
                }
                "table2" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let raw2 = RawTable::decode(&payload)?;
                    match &pending_table {
                        Some(raw1) if ChunkTable::table2_matches(raw1, &raw2) => {}
                        Some(_) => {
                            warn!(
                                "segment {segment}: table2 disagrees with table, preferring table (spec invariant 2)"
                            );
                            let span = table.len() as u64 - chunks_before;
                            if let Some(mv) = &media {
                                record_table_mismatch(&mut acquiry_errors, &mv, chunks_before, span);
                            }
                        }
                        None => {
                            warn!("segment {segment}: table2 present without a preceding table");
                        }
                    }
                }
                "sectors" => {
                    sectors_end = Some(payload_offset + payload_len);
                }
                "error2" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    acquiry_errors = section::decode_sector_range_section(&payload, true)?;
                }
                "session" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    sessions = section::decode_sector_range_section(&payload, false)?;
                }
                "digest" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let digest = section::decode_digest(&payload)?;
                    stored_md5 = Some(digest.md5);
                    stored_sha1 = Some(digest.sha1);
                }
                "hash" => {
                    let mut payload = vec![0u8; payload_len as usize];
                    pool.read_at(segment, payload_offset, &mut payload)?;
                    let hash = section::decode_hash(&payload)?;
                    stored_md5 = Some(hash.md5);
                }
                "next" => {
                    break;
                }
                "done" => {
                    saw_done = true;
                    break;
                }
                _ => {}
            }

            if descriptor.next_offset <= offset && !descriptor.is_terminator() {
                return Err(EwfError::format_invalid(
                    "section chain does not advance; possible corruption",
                ));
            }
            offset = descriptor.next_offset;
        }

        if let Some(end) = sectors_end {
            table.set_segment_end(segment, end);
        }
    }

    if !saw_done {
        warn!("chain has no 'done' terminator; treating it as a recoverable truncated image");
    }

    let media = media.ok_or_else(|| EwfError::format_invalid("no volume/disk section found in chain"))?;
    let expected_chunks = media.total_chunks();
    if (table.len() as u64) < expected_chunks {
        warn!(
            "chunk table has {} entries, expected {} from declared sector count",
            table.len(),
            expected_chunks
        );
    }

    info!(
        "opened chain: {} segment(s), {} chunk(s), format {:?}",
        segment_numbers.len(),
        table.len(),
        format
    );

    Ok(OpenedChain {
        media,
        header_values,
        hash_values,
        stored_md5,
        stored_sha1,
        acquiry_errors,
        sessions,
        table,
        format,
        profile: format::profile_for(format),
    })
}

const SEGMENT_HEADER_READ: usize = crate::segment::descriptor::SEGMENT_HEADER_SIZE;

/// Best-effort format inference from a parsed `volume` section: only the
/// presence of a digest-capable compression level can be observed this
/// way, so this defaults to the most capable profile and lets explicit
/// header metadata (acquisition software version) refine it upstream.
fn pick_format_for_profile(media: &MediaValues) -> ImageFormat {
    if CompressionLevel::from_byte(media.compression_level) == CompressionLevel::None {
        ImageFormat::EnCase2
    } else {
        ImageFormat::EnCase6
    }
}

fn record_table_mismatch(
    acquiry_errors: &mut SectorRangeTable,
    media: &MediaValues,
    first_chunk: u64,
    chunk_span: u64,
) {
    let spc = media.sectors_per_chunk as u64;
    acquiry_errors.add(first_chunk * spc, chunk_span * spc);
}

/// Component G proper: serves `(offset, length)` reads against an opened
/// chain's chunk table, routing through the chunk cache before touching
/// the codec or segment pool.
pub struct ReadEngine {
    cache: ChunkCache,
    wipe_on_error: bool,
}

impl ReadEngine {
    pub fn new(cache_capacity: usize, wipe_on_error: bool) -> Self {
        ReadEngine {
            cache: ChunkCache::new(cache_capacity),
            wipe_on_error,
        }
    }

    pub fn set_wipe_on_error(&mut self, wipe: bool) {
        self.wipe_on_error = wipe;
    }

    pub fn wipe_on_error(&self) -> bool {
        self.wipe_on_error
    }

    pub fn invalidate(&mut self, chunk_index: u64) {
        self.cache.invalidate(chunk_index);
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// actual number delivered (short only at `media_size`, spec §4.G).
    /// `delta` is consulted first for each chunk, falling through to the
    /// main chain's pool/table on a miss (component I's override rule).
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &mut self,
        pool: &mut SegmentPool,
        table: &ChunkTable,
        media: &MediaValues,
        crc_errors: &mut SectorRangeTable,
        delta: Option<&mut crate::delta::DeltaOverwriter>,
        offset: u64,
        buf: &mut [u8],
    ) -> EwfResult<usize> {
        let media_size = media.media_size();
        if offset >= media_size || buf.is_empty() {
            return Ok(0);
        }
        let chunk_size = media.chunk_size() as u64;
        let end = (offset + buf.len() as u64).min(media_size);
        let mut delivered = 0usize;
        let mut pos = offset;
        let mut delta = delta;

        while pos < end {
            let chunk_index = pos / chunk_size;
            let in_chunk_offset = (pos % chunk_size) as usize;
            let overridden = delta
                .as_deref()
                .map(|d| d.lookup(chunk_index).is_some())
                .unwrap_or(false);
            let chunk_data = if overridden {
                let expected_size = expected_chunk_size(media, chunk_index, media.total_chunks());
                let decoded = delta
                    .as_deref_mut()
                    .expect("overridden implies delta present")
                    .read_chunk(chunk_index, expected_size, self.wipe_on_error)?;
                if let Some(detail) = &decoded.error {
                    warn!("delta chunk {chunk_index} integrity check failed: {detail}");
                    let range = chunk_sector_range(media, chunk_index);
                    crc_errors.add(range.first_sector, range.sector_count);
                }
                decoded.data
            } else {
                self.fetch_cached(pool, table, media, crc_errors, chunk_index)?
            };

            let take = (chunk_data.len() - in_chunk_offset).min((end - pos) as usize);
            buf[delivered..delivered + take]
                .copy_from_slice(&chunk_data[in_chunk_offset..in_chunk_offset + take]);
            delivered += take;
            pos += take as u64;
        }
        Ok(delivered)
    }

    fn fetch_cached(
        &mut self,
        pool: &mut SegmentPool,
        table: &ChunkTable,
        media: &MediaValues,
        crc_errors: &mut SectorRangeTable,
        chunk_index: u64,
    ) -> EwfResult<Vec<u8>> {
        if let Some(cached) = self.cache.get(chunk_index) {
            return Ok(cached.to_vec());
        }
        let loc = table.get(chunk_index)?;
        let stored_size = table.stored_size(chunk_index)? as usize;
        let mut stored = vec![0u8; stored_size];
        pool.read_at(loc.segment, loc.file_offset, &mut stored)?;
        let expected_size = expected_chunk_size(media, chunk_index, table.len() as u64);
        let range = chunk_sector_range(media, chunk_index);

        let decoded = codec::decode_chunk(&stored, loc.compressed, expected_size, range, self.wipe_on_error)?;
        if let Some(detail) = &decoded.error {
            warn!("chunk {chunk_index} integrity check failed: {detail}");
            crc_errors.add(range.first_sector, range.sector_count);
        }
        self.cache.insert(chunk_index, decoded.data.clone());
        Ok(decoded.data)
    }
}

/// The raw byte size a chunk's *decompressed* form should have: the full
/// `chunk_size` for every chunk except the image's very last one, which
/// may be short (spec §3 "Chunk").
pub fn expected_chunk_size(media: &MediaValues, chunk_index: u64, total_chunks: u64) -> usize {
    let chunk_size = media.chunk_size() as u64;
    if total_chunks == 0 || chunk_index + 1 < total_chunks {
        return chunk_size as usize;
    }
    let remainder = media.media_size() % chunk_size;
    if remainder == 0 {
        chunk_size as usize
    } else {
        remainder as usize
    }
}

pub fn chunk_sector_range(media: &MediaValues, chunk_index: u64) -> SectorRange {
    let spc = media.sectors_per_chunk as u64;
    let first_sector = chunk_index * spc;
    let remaining_sectors = media.total_sectors.saturating_sub(first_sector);
    SectorRange {
        first_sector,
        sector_count: spc.min(remaining_sectors.max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_chunk, CompressionPolicy};
    use crate::format::ImageFormat;
    use crate::segment::naming::NamingScheme;
    use crate::values::HeaderValues;
    use crate::writer::SegmentWriter;
    use tempfile::tempdir;

    fn write_simple_image(dir: &std::path::Path, sectors: u64, payload: &[u8]) {
        let mut media = MediaValues::default();
        media.total_sectors = sectors;
        let mut writer = SegmentWriter::create(
            dir.join("image"),
            NamingScheme::Standard,
            ImageFormat::EnCase6,
            media,
            crate::media::DEFAULT_SEGMENT_FILE_SIZE,
        );
        writer.begin(&HeaderValues::default()).unwrap();
        let encoded = encode_chunk(payload, &CompressionPolicy::default()).unwrap();
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
    }

    #[test]
    fn open_and_read_round_trips_single_chunk() {
        let dir = tempdir().unwrap();
        let payload = vec![0x41u8; 512];
        write_simple_image(dir.path(), 1, &payload);

        let mut pool = SegmentPool::open_existing(&dir.path().join("image.E01"), crate::segment::naming::NamingScheme::Standard).unwrap();
        let chain = open_chain(&mut pool).unwrap();
        assert_eq!(chain.table.len(), 1);

        let mut engine = ReadEngine::new(8, true);
        let mut crc_errors = SectorRangeTable::new(true);
        let mut buf = vec![0u8; 512];
        let n = engine
            .read(&mut pool, &chain.table, &chain.media, &mut crc_errors, None, 0, &mut buf)
            .unwrap();
        assert_eq!(n, 512);
        assert_eq!(buf, payload);
        assert_eq!(crc_errors.amount(), 0);
    }

    #[test]
    fn read_past_media_size_is_short() {
        let dir = tempdir().unwrap();
        let payload = vec![0x41u8; 512];
        write_simple_image(dir.path(), 1, &payload);

        let mut pool = SegmentPool::open_existing(&dir.path().join("image.E01"), crate::segment::naming::NamingScheme::Standard).unwrap();
        let chain = open_chain(&mut pool).unwrap();

        let mut engine = ReadEngine::new(8, true);
        let mut crc_errors = SectorRangeTable::new(true);
        let mut buf = vec![0u8; 4096];
        let n = engine
            .read(&mut pool, &chain.table, &chain.media, &mut crc_errors, None, 0, &mut buf)
            .unwrap();
        assert_eq!(n, 512);
    }
}
