//! Public handle API (component K): the single entry point the rest of
//! this crate's modules are orchestrated behind. Owns the media model,
//! segment-file pool(s), chunk table, cache, and pending writer/delta
//! state, and enforces the state-machine guards spec §4.K and §8's
//! "State guard" property describe.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::info;

use crate::codec::{CompressionLevel, CompressionPolicy};
use crate::delta::DeltaOverwriter;
use crate::digest::format_hex;
use crate::error::{EwfError, EwfResult};
use crate::format::ImageFormat;
use crate::media::{Guid, MediaFlags, MediaType, MediaValues, DEFAULT_SEGMENT_FILE_SIZE};
use crate::read_engine::{self, ReadEngine};
use crate::sector_table::{SectorRangeEntry, SectorRangeTable};
use crate::segment::naming::NamingScheme;
use crate::segment::pool::SegmentPool;
use crate::table::ChunkTable;
use crate::values::{HashValues, HeaderCodepage, HeaderValues};
use crate::write_engine::WriteEngine;
use crate::writer::SegmentWriter;

/// Handle lifecycle states (spec §3 "Image handle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    OpenRead,
    OpenWrite,
    OpenReadWrite,
    Finalized,
}

/// Parameters fixed when a write session is opened, before the first
/// chunk is staged (held separately from `WriteEngine` since that engine
/// isn't constructed until the first byte is written - see
/// `values_initialized` below).
struct PendingWrite {
    basename: PathBuf,
    scheme: NamingScheme,
}

/// The aggregate root described in spec §3. A single handle is never
/// shared between threads (spec §5); nothing here is internally
/// synchronized.
pub struct EwfHandle {
    state: HandleState,
    media: MediaValues,
    header_values: HeaderValues,
    hash_values: HashValues,
    stored_md5: Option<[u8; 16]>,
    stored_sha1: Option<[u8; 20]>,
    acquiry_errors: SectorRangeTable,
    crc_errors: SectorRangeTable,
    sessions: SectorRangeTable,
    format: ImageFormat,
    codepage: HeaderCodepage,
    compression: CompressionPolicy,
    segment_file_size: u64,
    max_open_handles: usize,
    cache_capacity: usize,
    wipe_on_error: bool,

    // Read-side state, present once a chain has been opened.
    read_pool: Option<SegmentPool>,
    table: ChunkTable,
    read_engine: ReadEngine,
    naming_scheme: NamingScheme,
    basename: Option<PathBuf>,

    // Write-side state.
    pending_write: Option<PendingWrite>,
    write_engine: Option<WriteEngine>,
    values_initialized: bool,

    // Delta overlay, used by OpenReadWrite sessions.
    delta: Option<DeltaOverwriter>,

    position: u64,
}

impl Default for EwfHandle {
    fn default() -> Self {
        EwfHandle {
            state: HandleState::Closed,
            media: MediaValues::default(),
            header_values: HeaderValues::default(),
            hash_values: HashValues::default(),
            stored_md5: None,
            stored_sha1: None,
            acquiry_errors: SectorRangeTable::new(true),
            crc_errors: SectorRangeTable::new(true),
            sessions: SectorRangeTable::new(false),
            format: ImageFormat::default(),
            codepage: HeaderCodepage::default(),
            compression: CompressionPolicy::default(),
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            max_open_handles: crate::segment::pool::DEFAULT_MAX_OPEN_HANDLES,
            cache_capacity: crate::cache::DEFAULT_CACHE_SIZE,
            wipe_on_error: true,
            read_pool: None,
            table: ChunkTable::new(),
            read_engine: ReadEngine::new(crate::cache::DEFAULT_CACHE_SIZE, true),
            naming_scheme: NamingScheme::Standard,
            basename: None,
            pending_write: None,
            write_engine: None,
            values_initialized: false,
            delta: None,
            position: 0,
        }
    }
}

impl EwfHandle {
    pub fn new() -> Self {
        EwfHandle::default()
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    // ---- Opening ---------------------------------------------------

    /// Opens an existing chain for read, discovering every segment that
    /// shares `path`'s basename (spec §3 "Lifecycle"). If a delta chain
    /// (`.d01`) exists alongside it, it is transparently attached so
    /// reads are already merged (spec §4.I).
    pub fn open_read(path: impl AsRef<Path>) -> EwfResult<Self> {
        let path = path.as_ref();
        let scheme = NamingScheme::Standard;
        let mut pool = SegmentPool::open_existing(path, scheme)?;
        let chain = read_engine::open_chain(&mut pool)?;
        let basename = crate::segment::naming::basename_of(path)?;

        let mut handle = EwfHandle::default();
        handle.media = chain.media;
        handle.header_values = chain.header_values;
        handle.hash_values = chain.hash_values;
        handle.stored_md5 = chain.stored_md5;
        handle.stored_sha1 = chain.stored_sha1;
        handle.acquiry_errors = chain.acquiry_errors;
        handle.sessions = chain.sessions;
        handle.table = chain.table;
        handle.format = chain.format;
        handle.naming_scheme = scheme;
        handle.basename = Some(basename.clone());
        handle.read_pool = Some(pool);
        handle.values_initialized = true;

        if let Ok(delta) = DeltaOverwriter::open_existing(basename, handle.media.clone()) {
            handle.delta = Some(delta);
        }

        handle.state = HandleState::OpenRead;
        info!("handle opened for read: {}", path.display());
        Ok(handle)
    }

    /// Opens an existing chain for read plus in-place delta overwrite
    /// (spec §4.I). The main chain is never mutated; overwrites land in
    /// a parallel `.d01` chain created alongside it.
    pub fn open_read_write(path: impl AsRef<Path>) -> EwfResult<Self> {
        let mut handle = Self::open_read(path)?;
        if handle.delta.is_none() {
            let basename = handle.basename.clone().expect("set by open_read");
            handle.delta = Some(DeltaOverwriter::create(
                basename,
                handle.media.clone(),
                &handle.header_values,
            )?);
        }
        handle.state = HandleState::OpenReadWrite;
        Ok(handle)
    }

    /// Opens a brand-new write session. Media geometry may still be
    /// configured via the setters below until the first byte is written
    /// (spec §4.K).
    pub fn create_write(basename: impl Into<PathBuf>, format: ImageFormat) -> EwfResult<Self> {
        let basename = basename.into();
        let mut handle = EwfHandle::default();
        handle.format = format;
        handle.basename = Some(basename.clone());
        handle.pending_write = Some(PendingWrite {
            basename,
            scheme: NamingScheme::Standard,
        });
        handle.state = HandleState::OpenWrite;
        Ok(handle)
    }

    // ---- Geometry setters (spec §4.K state-machine guards) ----------

    fn guard_geometry_mutable(&self) -> EwfResult<()> {
        if self.values_initialized {
            return Err(EwfError::StateImmutable(
                "media geometry cannot change once the first chunk has been written".into(),
            ));
        }
        if self.state != HandleState::OpenWrite {
            return Err(EwfError::StateImmutable(
                "media geometry can only be set while opened for write".into(),
            ));
        }
        Ok(())
    }

    pub fn set_sectors_per_chunk(&mut self, value: u32) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        if value == 0 {
            return Err(EwfError::ArgumentOutOfRange("sectors_per_chunk must be nonzero".into()));
        }
        self.media.sectors_per_chunk = value;
        Ok(())
    }

    pub fn set_bytes_per_sector(&mut self, value: u32) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        if value == 0 {
            return Err(EwfError::ArgumentOutOfRange("bytes_per_sector must be nonzero".into()));
        }
        self.media.bytes_per_sector = value;
        Ok(())
    }

    /// Declares `media_size` up front (spec §4.H): writes past this size
    /// are rejected rather than silently growing the image.
    pub fn set_media_size(&mut self, bytes: u64) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        let bps = self.media.bytes_per_sector as u64;
        self.media.total_sectors = (bytes + bps - 1) / bps.max(1);
        Ok(())
    }

    pub fn set_media_type(&mut self, media_type: MediaType) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.media.media_type = media_type;
        Ok(())
    }

    pub fn set_media_flags(&mut self, flags: MediaFlags) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.media.media_flags = flags;
        Ok(())
    }

    /// Accepts any slice of at least 16 bytes, per spec §9 Open
    /// Questions ("use first N bytes" for oversized size arguments).
    pub fn set_guid(&mut self, bytes: &[u8]) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.media.guid = Guid::from_slice(bytes)?;
        Ok(())
    }

    pub fn set_error_granularity(&mut self, value: u32) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.media.error_granularity = value;
        Ok(())
    }

    pub fn set_format(&mut self, format: ImageFormat) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.format = format;
        Ok(())
    }

    pub fn set_compression(&mut self, level: CompressionLevel, compress_empty_block: bool) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.compression = CompressionPolicy {
            level,
            compress_empty_block,
        };
        self.media.compression_level = level.to_byte();
        Ok(())
    }

    pub fn set_md5(&mut self, digest: [u8; 16]) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.stored_md5 = Some(digest);
        Ok(())
    }

    pub fn set_sha1(&mut self, digest: [u8; 20]) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        self.stored_sha1 = Some(digest);
        Ok(())
    }

    pub fn set_header_codepage(&mut self, codepage: HeaderCodepage) -> EwfResult<()> {
        // Not geometry, but still immutable-after-init per the same rule.
        self.guard_geometry_mutable()?;
        if !codepage.is_supported() {
            return Err(EwfError::Unsupported(format!("{codepage:?} header codepage")));
        }
        self.codepage = codepage;
        Ok(())
    }

    pub fn set_segment_file_size(&mut self, bytes: u64) -> EwfResult<()> {
        self.guard_geometry_mutable()?;
        if bytes < self.media.chunk_size() as u64 {
            return Err(EwfError::ArgumentOutOfRange(
                "segment_file_size must be at least one chunk plus overhead".into(),
            ));
        }
        self.segment_file_size = bytes;
        Ok(())
    }

    /// Not immutability-guarded: read-path tunables may change any time.
    pub fn set_read_wipe_chunk_on_error(&mut self, wipe: bool) {
        self.wipe_on_error = wipe;
        self.read_engine.set_wipe_on_error(wipe);
    }

    pub fn set_maximum_amount_of_open_handles(&mut self, max_open: usize) {
        self.max_open_handles = max_open;
        if let Some(pool) = &mut self.read_pool {
            pool.set_max_open(max_open);
        }
    }

    pub fn set_header_value(&mut self, identifier: impl Into<String>, value: impl Into<String>) -> EwfResult<()> {
        if self.state == HandleState::OpenRead || self.state == HandleState::Finalized {
            return Err(EwfError::StateImmutable(
                "header values cannot be set on a read-only or finalized handle".into(),
            ));
        }
        self.header_values.0.set_by_name(identifier, value);
        Ok(())
    }

    // ---- Write path (component H) -----------------------------------

    /// Writes `buf` sequentially to a brand-new image (spec §4.H).
    /// Lazily opens the segment-file chain and marks geometry immutable
    /// on the very first call.
    pub fn write(&mut self, buf: &[u8]) -> EwfResult<usize> {
        if self.state != HandleState::OpenWrite {
            return Err(EwfError::StateImmutable(
                "write is only valid on a handle opened for write".into(),
            ));
        }
        if self.write_engine.is_none() {
            self.begin_write_engine()?;
        }
        self.values_initialized = true;
        let engine = self.write_engine.as_mut().expect("just ensured present");
        engine.write(buf)
    }

    fn begin_write_engine(&mut self) -> EwfResult<()> {
        let pending = self
            .pending_write
            .take()
            .ok_or_else(|| EwfError::StateImmutable("write session was not opened".into()))?;
        let mut writer = SegmentWriter::create(
            pending.basename,
            pending.scheme,
            self.format,
            self.media.clone(),
            self.segment_file_size,
        );
        writer.begin(&self.header_values)?;
        let chunk_size = self.media.chunk_size();
        let declared = if self.media.total_sectors > 0 {
            Some(self.media.media_size())
        } else {
            None
        };
        self.write_engine = Some(WriteEngine::new(writer, self.compression, chunk_size, declared));
        Ok(())
    }

    /// Overwrites `[offset, offset + data.len())` via the delta chain
    /// (spec §4.I), valid only on an `OpenReadWrite` handle.
    pub fn overwrite_at(&mut self, offset: u64, data: &[u8]) -> EwfResult<()> {
        if self.state != HandleState::OpenReadWrite {
            return Err(EwfError::StateImmutable(
                "overwrite_at is only valid on a handle opened for read+write".into(),
            ));
        }
        let pool = self
            .read_pool
            .as_mut()
            .ok_or_else(|| EwfError::ValueMissing("no main chain attached".into()))?;
        let delta = self
            .delta
            .as_mut()
            .ok_or_else(|| EwfError::ValueMissing("delta overlay not attached".into()))?;
        delta.overwrite(pool, &self.table, &mut self.read_engine, &mut self.crc_errors, offset, data)?;
        for chunk_index in affected_chunk_range(&self.media, offset, data.len() as u64) {
            self.read_engine.invalidate(chunk_index);
        }
        Ok(())
    }

    // ---- Read path (component G) -------------------------------------

    /// Reads up to `buf.len()` bytes starting at `offset`, merging the
    /// delta overlay first (spec §4.I, §4.G).
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> EwfResult<usize> {
        if self.state != HandleState::OpenRead && self.state != HandleState::OpenReadWrite {
            return Err(EwfError::StateImmutable(
                "read_at requires a handle opened for read".into(),
            ));
        }
        let pool = self
            .read_pool
            .as_mut()
            .ok_or_else(|| EwfError::ValueMissing("no chain attached".into()))?;
        self.read_engine.read(
            pool,
            &self.table,
            &self.media,
            &mut self.crc_errors,
            self.delta.as_mut(),
            offset,
            buf,
        )
    }

    // ---- Closing -------------------------------------------------------

    /// Finalizes whichever side is active: flushes and emits the
    /// metadata tail for a write session, or closes a delta overlay.
    /// A pure read session just releases its resources.
    pub fn close(&mut self) -> EwfResult<()> {
        match self.state {
            HandleState::Closed | HandleState::Finalized => return Ok(()),
            HandleState::OpenRead => {
                self.read_pool = None;
            }
            HandleState::OpenReadWrite => {
                if let Some(delta) = self.delta.take() {
                    delta.finalize()?;
                }
                self.read_pool = None;
            }
            HandleState::OpenWrite => {
                if self.write_engine.is_none() {
                    self.begin_write_engine()?;
                }
                let engine = self.write_engine.take().expect("just ensured present");
                let outcome = engine.close(&self.hash_values, &self.acquiry_errors, &self.crc_errors, &self.sessions)?;
                self.table = outcome.table;
                self.stored_md5 = Some(outcome.md5);
                self.stored_sha1 = Some(outcome.sha1);
                self.media.total_sectors = crate::write_engine::sectors_for(outcome.media_size, &self.media);
            }
        }
        self.state = HandleState::Finalized;
        Ok(())
    }

    // ---- Getters (component K, spec SPEC_FULL.md B.1) ------------------

    pub fn media_size(&self) -> u64 {
        self.media.media_size()
    }

    pub fn sectors_per_chunk(&self) -> u32 {
        self.media.sectors_per_chunk
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.media.bytes_per_sector
    }

    pub fn chunk_size(&self) -> usize {
        self.media.chunk_size()
    }

    pub fn media_type(&self) -> MediaType {
        self.media.media_type
    }

    pub fn media_flags(&self) -> MediaFlags {
        self.media.media_flags
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn guid(&self) -> Guid {
        self.media.guid
    }

    pub fn get_md5_hash(&self) -> EwfResult<String> {
        self.stored_md5
            .map(|d| format_hex(&d))
            .ok_or_else(|| EwfError::ValueMissing("no MD5 digest present on this image".into()))
    }

    pub fn get_sha1_hash(&self) -> EwfResult<String> {
        self.stored_sha1
            .map(|d| format_hex(&d))
            .ok_or_else(|| EwfError::ValueMissing("no SHA-1 digest present on this image".into()))
    }

    pub fn amount_of_chunks(&self) -> u64 {
        self.table.len() as u64
    }

    pub fn amount_of_acquiry_errors(&self) -> usize {
        self.acquiry_errors.amount()
    }

    pub fn get_acquiry_error(&self, index: usize) -> EwfResult<SectorRangeEntry> {
        self.acquiry_errors.get(index)
    }

    pub fn amount_of_crc_errors(&self) -> usize {
        self.crc_errors.amount()
    }

    pub fn get_crc_error(&self, index: usize) -> EwfResult<SectorRangeEntry> {
        self.crc_errors.get(index)
    }

    pub fn amount_of_sessions(&self) -> usize {
        self.sessions.amount()
    }

    pub fn get_session(&self, index: usize) -> EwfResult<SectorRangeEntry> {
        self.sessions.get(index)
    }

    pub fn amount_of_header_values(&self) -> usize {
        self.header_values.0.amount()
    }

    pub fn get_header_value(&self, identifier: &str) -> Option<&str> {
        self.header_values.0.get_by_name(identifier)
    }

    pub fn get_header_value_by_index(&self, index: usize) -> EwfResult<(&str, &str)> {
        self.header_values.0.get_by_index(index)
    }

    pub fn amount_of_hash_values(&self) -> usize {
        self.hash_values.0.amount()
    }

    pub fn get_hash_value(&self, identifier: &str) -> Option<&str> {
        self.hash_values.0.get_by_name(identifier)
    }

    pub fn segment_filename(&self, n: u64) -> EwfResult<PathBuf> {
        let basename = self
            .basename
            .as_ref()
            .ok_or_else(|| EwfError::ValueMissing("no chain attached".into()))?;
        crate::segment::naming::segment_path(basename, self.naming_scheme, n)
    }
}

/// The half-open `[first, last]` chunk-index range touched by a byte
/// range, used to invalidate cache entries after a delta overwrite.
fn affected_chunk_range(media: &MediaValues, offset: u64, len: u64) -> std::ops::RangeInclusive<u64> {
    let chunk_size = media.chunk_size() as u64;
    let first = offset / chunk_size;
    let last = if len == 0 {
        first
    } else {
        (offset + len - 1) / chunk_size
    };
    first..=last
}

impl Read for EwfHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.read_at(self.position, buf).map_err(std::io::Error::from)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for EwfHandle {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let media_size = self.media_size();
        let new_pos = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => self.position as i64 + off,
            SeekFrom::End(off) => media_size as i64 + off,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of image",
            ));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}
