//! Crate-wide error taxonomy.
//!
//! One enum for every kind named in the format's error-handling design:
//! caller contract violations, state-machine guards, on-disk integrity
//! problems, and the underlying I/O/compression failures that bubble up
//! from the segment-file pool and the codec pipeline.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EwfResult<T> = Result<T, EwfError>;

/// A byte range expressed in sectors, used to annotate integrity errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub first_sector: u64,
    pub sector_count: u64,
}

impl fmt::Display for SectorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sectors [{}, {})",
            self.first_sector,
            self.first_sector + self.sector_count
        )
    }
}

/// Taxonomy of everything that can go wrong operating on an EWF image.
///
/// Variant groups mirror the design document: 1-4 are caller bugs and are
/// surfaced immediately, 5/8/10 abort the current operation, 6 is non-fatal
/// as long as a usable chunk table was built from other sections, and 7 on
/// the read path is recorded rather than propagated (see `crc_errors` on
/// the handle) — callers that want it as a hard error can check that table
/// themselves after the read returns.
#[derive(Debug, Error)]
pub enum EwfError {
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),

    #[error("value cannot be changed once writing has started: {0}")]
    StateImmutable(String),

    #[error("required value is missing: {0}")]
    ValueMissing(String),

    #[error("on-disk value exceeds representable maximum: {0}")]
    ValueExceedsMaximum(String),

    #[error("I/O error reading segment data: {0}")]
    IoRead(#[source] io::Error),

    #[error("I/O error writing segment data: {0}")]
    IoWrite(#[source] io::Error),

    #[error("I/O error seeking within a segment: {0}")]
    IoSeek(#[source] io::Error),

    #[error("malformed EWF structure: {0}")]
    FormatInvalid(String),

    #[error("integrity check failed for {range}: {detail}")]
    IntegrityMismatch { range: SectorRange, detail: String },

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl EwfError {
    pub fn io_read(e: io::Error) -> Self {
        EwfError::IoRead(e)
    }

    pub fn io_write(e: io::Error) -> Self {
        EwfError::IoWrite(e)
    }

    pub fn io_seek(e: io::Error) -> Self {
        EwfError::IoSeek(e)
    }

    pub fn format_invalid(detail: impl Into<String>) -> Self {
        EwfError::FormatInvalid(detail.into())
    }

    pub fn integrity_mismatch(range: SectorRange, detail: impl Into<String>) -> Self {
        EwfError::IntegrityMismatch {
            range,
            detail: detail.into(),
        }
    }
}

/// Converts an uncategorized I/O failure into a read error by default.
/// Call sites that know the operation was a write or seek should prefer
/// `EwfError::io_write` / `EwfError::io_seek` instead of relying on `?`.
impl From<io::Error> for EwfError {
    fn from(e: io::Error) -> Self {
        EwfError::IoRead(e)
    }
}

impl From<EwfError> for io::Error {
    fn from(e: EwfError) -> Self {
        match e {
            EwfError::IoRead(e) | EwfError::IoWrite(e) | EwfError::IoSeek(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
