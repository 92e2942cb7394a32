//! Compression/CRC pipeline (component D): turns a raw chunk payload into
//! its on-disk form and back, verifying integrity either way.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::checksum;
use crate::error::{EwfError, EwfResult, SectorRange};

/// Writer-side compression policy (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

impl CompressionLevel {
    /// The `compression_level` byte stored in the `volume` section.
    pub fn to_byte(self) -> u8 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => CompressionLevel::Fast,
            2 => CompressionLevel::Best,
            _ => CompressionLevel::None,
        }
    }

    fn flate2_level(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Best => Compression::best(),
        }
    }
}

/// Full writer-side policy: the configured level plus the
/// "empty-block compressible" opt-in (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub level: CompressionLevel,
    pub compress_empty_block: bool,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        CompressionPolicy {
            level: CompressionLevel::None,
            compress_empty_block: false,
        }
    }
}

/// The on-disk form of one chunk, ready to append to a `sectors` section.
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

fn is_single_valued(data: &[u8]) -> bool {
    match data.first() {
        None => true,
        Some(&first) => data.iter().all(|&b| b == first),
    }
}

fn deflate(data: &[u8], level: Compression) -> EwfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder
        .write_all(data)
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EwfError::CompressionError(e.to_string()))
}

/// Encodes one chunk's raw payload per the configured policy (spec §4.D
/// "Write").
pub fn encode_chunk(payload: &[u8], policy: &CompressionPolicy) -> EwfResult<EncodedChunk> {
    let wants_compression = policy.level != CompressionLevel::None
        || (policy.compress_empty_block && is_single_valued(payload));

    if wants_compression {
        let level = if policy.level == CompressionLevel::None {
            // "Empty-block compressible" chunk under an overall NONE
            // policy: still emitted compressed, at the highest ratio
            // since the input is trivial either way.
            Compression::best()
        } else {
            policy.level.flate2_level()
        };
        let bytes = deflate(payload, level)?;
        Ok(EncodedChunk {
            bytes,
            compressed: true,
        })
    } else {
        let mut bytes = Vec::with_capacity(payload.len() + 4);
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&checksum::adler32(payload).to_le_bytes());
        Ok(EncodedChunk {
            bytes,
            compressed: false,
        })
    }
}

/// Outcome of decoding one chunk: the recovered bytes (zeroed on error
/// when `wipe_on_error` is set) and, on failure, the detail to record in
/// `crc_errors`.
pub struct DecodedChunk {
    pub data: Vec<u8>,
    pub error: Option<String>,
}

/// Decodes one chunk's stored bytes back to `expected_size` raw bytes
/// (spec §4.D "Read"). `range` is used only to produce a useful error
/// message; the caller owns recording it into `crc_errors`.
pub fn decode_chunk(
    stored: &[u8],
    compressed: bool,
    expected_size: usize,
    range: SectorRange,
    wipe_on_error: bool,
) -> EwfResult<DecodedChunk> {
    if compressed {
        let mut decoder = ZlibDecoder::new(stored);
        let mut data = Vec::with_capacity(expected_size);
        match decoder.read_to_end(&mut data) {
            Ok(_) if data.len() == expected_size => Ok(DecodedChunk { data, error: None }),
            Ok(_) => {
                let detail = format!(
                    "decompressed {} bytes, expected {}",
                    data.len(),
                    expected_size
                );
                let data = if wipe_on_error {
                    vec![0u8; expected_size]
                } else {
                    let mut data = data;
                    data.resize(expected_size, 0);
                    data
                };
                Ok(DecodedChunk {
                    data,
                    error: Some(detail),
                })
            }
            Err(e) => {
                let detail = format!("deflate error in {range}: {e}");
                let data = vec![0u8; expected_size];
                Ok(DecodedChunk {
                    data,
                    error: Some(detail),
                })
            }
        }
    } else {
        if stored.len() < 4 {
            return Err(EwfError::format_invalid(
                "uncompressed chunk shorter than its trailing checksum",
            ));
        }
        let (payload, crc_bytes) = stored.split_at(stored.len() - 4);
        let expected_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        match checksum::verify(payload, expected_crc) {
            Ok(()) => Ok(DecodedChunk {
                data: payload.to_vec(),
                error: None,
            }),
            Err(actual) => {
                let detail = format!(
                    "Adler-32 mismatch in {range}: stored {expected_crc:#010x}, computed {actual:#010x}"
                );
                let data = if wipe_on_error {
                    vec![0u8; payload.len()]
                } else {
                    payload.to_vec()
                };
                Ok(DecodedChunk {
                    data,
                    error: Some(detail),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> SectorRange {
        SectorRange {
            first_sector: 0,
            sector_count: 64,
        }
    }

    #[test]
    fn uncompressed_round_trip() {
        let payload = vec![0x41u8; 512];
        let policy = CompressionPolicy {
            level: CompressionLevel::None,
            compress_empty_block: false,
        };
        let encoded = encode_chunk(&payload, &policy).unwrap();
        assert!(!encoded.compressed);
        let decoded = decode_chunk(&encoded.bytes, false, 512, range(), true).unwrap();
        assert!(decoded.error.is_none());
        assert_eq!(decoded.data, payload);
    }

    #[test]
    fn compressed_round_trip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(2048).collect();
        let policy = CompressionPolicy {
            level: CompressionLevel::Best,
            compress_empty_block: false,
        };
        let encoded = encode_chunk(&payload, &policy).unwrap();
        assert!(encoded.compressed);
        let decoded = decode_chunk(&encoded.bytes, true, payload.len(), range(), true).unwrap();
        assert!(decoded.error.is_none());
        assert_eq!(decoded.data, payload);
    }

    #[test]
    fn empty_block_compression_under_none_policy() {
        let payload = vec![0u8; 4096];
        let policy = CompressionPolicy {
            level: CompressionLevel::None,
            compress_empty_block: true,
        };
        let encoded = encode_chunk(&payload, &policy).unwrap();
        assert!(encoded.compressed);
        assert!(encoded.bytes.len() < payload.len());
    }

    #[test]
    fn corrupted_uncompressed_chunk_is_wiped_and_reported() {
        let payload = vec![0x42u8; 64];
        let policy = CompressionPolicy::default();
        let mut encoded = encode_chunk(&payload, &policy).unwrap();
        encoded.bytes[0] ^= 0xFF;
        let decoded = decode_chunk(&encoded.bytes, false, 64, range(), true).unwrap();
        assert!(decoded.error.is_some());
        assert_eq!(decoded.data, vec![0u8; 64]);
    }

    #[test]
    fn corrupted_chunk_without_wipe_keeps_raw_bytes() {
        let payload = vec![0x42u8; 64];
        let policy = CompressionPolicy::default();
        let mut encoded = encode_chunk(&payload, &policy).unwrap();
        encoded.bytes[0] ^= 0xFF;
        let decoded = decode_chunk(&encoded.bytes, false, 64, range(), false).unwrap();
        assert!(decoded.error.is_some());
        assert_ne!(decoded.data, vec![0u8; 64]);
    }
}
