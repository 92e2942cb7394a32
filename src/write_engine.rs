//! Write engine (component H): turns a sequential byte stream into
//! chunk-sized, codec-encoded, segment-written units, and tracks the
//! running MD5/SHA-1 hashes the finalized image carries in its `digest`
//! section.

use log::{info, warn};

use crate::codec::{self, CompressionPolicy};
use crate::digest::HashState;
use crate::error::{EwfError, EwfResult};
use crate::media::MediaValues;
use crate::sector_table::SectorRangeTable;
use crate::table::ChunkTable;
use crate::values::HashValues;
use crate::writer::SegmentWriter;

/// Sequential write engine over one `SegmentWriter` (spec §4.H).
///
/// `media_size_declared` mirrors the handle-level choice between a caller
/// committing to a size up front (writes past it are rejected) and an
/// open-ended write whose `media_size` is derived from the total bytes
/// seen by the time `close` runs.
pub struct WriteEngine {
    writer: SegmentWriter,
    policy: CompressionPolicy,
    chunk_size: usize,
    staging: Vec<u8>,
    hash: HashState,
    table: ChunkTable,
    media_size_declared: Option<u64>,
    bytes_written: u64,
    poisoned: bool,
}

impl WriteEngine {
    pub fn new(writer: SegmentWriter, policy: CompressionPolicy, chunk_size: usize, media_size_declared: Option<u64>) -> Self {
        WriteEngine {
            writer,
            policy,
            chunk_size,
            staging: Vec::with_capacity(chunk_size),
            hash: HashState::new(),
            table: ChunkTable::new(),
            media_size_declared,
            bytes_written: 0,
            poisoned: false,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn amount_of_chunks_written(&self) -> u64 {
        self.table.len() as u64
    }

    /// Accepts `buf`, staging it into `chunk_size`-sized units and
    /// handing each full unit to the codec and segment writer as it
    /// fills (spec §4.H). Rejects writes past a declared `media_size`.
    pub fn write(&mut self, buf: &[u8]) -> EwfResult<usize> {
        if self.poisoned {
            return Err(EwfError::StateImmutable(
                "write engine is poisoned after a prior failure".into(),
            ));
        }
        if let Some(limit) = self.media_size_declared {
            if self.bytes_written + buf.len() as u64 > limit {
                return Err(EwfError::ArgumentOutOfRange(format!(
                    "write of {} bytes at offset {} exceeds declared media_size {}",
                    buf.len(),
                    self.bytes_written,
                    limit
                )));
            }
        }
        match self.write_inner(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn write_inner(&mut self, buf: &[u8]) -> EwfResult<usize> {
        self.hash.update(buf);
        let mut consumed = 0;
        while consumed < buf.len() {
            let space = self.chunk_size - self.staging.len();
            let take = space.min(buf.len() - consumed);
            self.staging.extend_from_slice(&buf[consumed..consumed + take]);
            consumed += take;
            if self.staging.len() == self.chunk_size {
                self.flush_staged_chunk()?;
            }
        }
        self.bytes_written += consumed as u64;
        Ok(consumed)
    }

    fn flush_staged_chunk(&mut self) -> EwfResult<()> {
        let payload = std::mem::take(&mut self.staging);
        self.staging = Vec::with_capacity(self.chunk_size);
        let encoded = codec::encode_chunk(&payload, &self.policy)?;
        let loc = self.writer.add_chunk(&encoded)?;
        self.table.push(loc);
        Ok(())
    }

    /// Zero-pads up to `target_size` bytes total and flushes, used at
    /// `close` to reconcile a declared `media_size` larger than what the
    /// caller actually wrote (spec invariant 6's "pad policy").
    fn pad_to(&mut self, target_size: u64) -> EwfResult<()> {
        while self.bytes_written < target_size {
            let remaining = (target_size - self.bytes_written) as usize;
            let take = remaining.min(self.chunk_size);
            let zeros = vec![0u8; take];
            self.write_inner(&zeros)?;
        }
        Ok(())
    }

    /// Finalizes the image: flushes any short tail chunk, pads to a
    /// declared `media_size` if one was set and under-written, finalizes
    /// the running hashes, and asks the segment writer to emit the
    /// metadata tail and `done` terminator.
    #[allow(clippy::too_many_arguments)]
    pub fn close(
        mut self,
        hash_values: &HashValues,
        acquiry_errors: &SectorRangeTable,
        crc_errors: &SectorRangeTable,
        sessions: &SectorRangeTable,
    ) -> EwfResult<CloseOutcome> {
        if self.poisoned {
            return Err(EwfError::StateImmutable(
                "cannot close a poisoned write engine".into(),
            ));
        }

        if let Some(declared) = self.media_size_declared {
            if self.bytes_written < declared {
                self.pad_to(declared)?;
            }
        }
        if !self.staging.is_empty() {
            let payload = std::mem::take(&mut self.staging);
            let encoded = codec::encode_chunk(&payload, &self.policy)?;
            let loc = self.writer.add_chunk(&encoded)?;
            self.table.push(loc);
        }

        let media_size = self.media_size_declared.unwrap_or(self.bytes_written);
        if self.media_size_declared.is_none() {
            warn!(
                "media_size was not declared up front; deriving it from {} bytes written",
                self.bytes_written
            );
            self.writer.reconcile_media_size(media_size);
        }

        let (md5, sha1) = self.hash.finalize();
        self.writer
            .finalize(md5, sha1, hash_values, acquiry_errors, crc_errors, sessions)?;

        info!(
            "write engine closed: {} chunks, {} bytes, media_size {}",
            self.table.len(),
            self.bytes_written,
            media_size
        );

        Ok(CloseOutcome {
            table: self.table,
            md5,
            sha1,
            media_size,
            segment_count: self.writer.segment_count(),
        })
    }
}

pub struct CloseOutcome {
    pub table: ChunkTable,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub media_size: u64,
    pub segment_count: u64,
}

/// Derives `total_sectors` from a byte count and `bytes_per_sector`,
/// rounding up — used when `media_size` is inferred at close rather than
/// declared up front.
pub fn sectors_for(byte_count: u64, media: &MediaValues) -> u64 {
    let bps = media.bytes_per_sector.max(1) as u64;
    (byte_count + bps - 1) / bps
}
