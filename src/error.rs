use std::io;
use thiserror::Error;

use crate::codec::CodecError;

/// Errors raised by the block codec, the index codec, the extractor and the
/// builder.
///
/// Structural errors (`Format`, header-level `Io`) abort the operation that
/// hit them.  During extraction and building, entry-level errors are caught,
/// logged and counted instead.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Bad magic, unknown algorithm id, or a header shorter than its layout.
    #[error("Format error: {0}")]
    Format(String),
    /// Decompressed length differs from the length the block header declares.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// The blob ends before `stored_size` bytes could be read at the cursor.
    #[error("Corrupt entry {cache_id:016x}: expected {expected} bytes at offset {offset}, only {available} available")]
    CorruptEntry {
        cache_id:  u64,
        offset:    u64,
        expected:  u32,
        available: u64,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ArchiveError::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
