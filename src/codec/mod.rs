//! Compression algorithm dispatch for xbc1 blocks.
//!
//! # Identity rules
//! Every algorithm is identified on disk by a little-endian `u32` written at
//! offset 4 of the block header.  The set is closed: `1` is Zlib and `3` is
//! Zstd.  Any other id is a format error and decoding MUST NOT continue.
//!
//! Each variant carries its own encode/decode pair; there is no registry and
//! no runtime plugin lookup.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

/// Highest zstd level accepted by libzstd.
pub const ZSTD_MAX_LEVEL: i32 = 22;

/// Payloads larger than this are wrapped with Zstd by the builder.
pub const DEFAULT_ZSTD_THRESHOLD: usize = 1024 * 1024;

// ── Algorithm enum ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Algorithm {
    Zlib = 1,
    Zstd = 3,
}

impl Algorithm {
    /// The numeric id written into the block header.
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Resolve an on-disk id.  Returns `None` for ids this format does not define.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Algorithm::Zlib),
            3 => Some(Algorithm::Zstd),
            _ => None,
        }
    }

    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Zlib => "zlib",
            Algorithm::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string; accepts the name or the numeric id.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "zlib" | "1" => Some(Algorithm::Zlib),
            "zstd" | "3" => Some(Algorithm::Zstd),
            _ => None,
        }
    }

    /// Pick the algorithm the builder uses for a payload of `len` bytes.
    pub fn for_payload_len(len: usize, zstd_threshold: usize) -> Self {
        if len > zstd_threshold {
            Algorithm::Zstd
        } else {
            Algorithm::Zlib
        }
    }

    /// Compress at the algorithm's maximum level.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Algorithm::Zlib => zlib_compress(data),
            Algorithm::Zstd => zstd::encode_all(data, ZSTD_MAX_LEVEL)
                .map_err(|e| CodecError::Compression(e.to_string())),
        }
    }

    /// Decompress a complete payload.  `size_hint` only pre-sizes the output.
    pub fn decompress(self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        match self {
            Algorithm::Zlib => zlib_decompress(data, size_hint),
            Algorithm::Zstd => zstd::decode_all(data)
                .map_err(|e| CodecError::Decompression(e.to_string())),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
}

// ── Zlib ─────────────────────────────────────────────────────────────────────

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let compression_err = |e: io::Error| CodecError::Compression(e.to_string());
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(compression_err)?;
    encoder.finish().map_err(compression_err)
}

fn zlib_decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
    // Cap the reservation; the header value is untrusted.
    let mut out = Vec::with_capacity(size_hint.min(64 * 1024 * 1024));
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    Ok(out)
}
