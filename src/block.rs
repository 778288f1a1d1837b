//! xbc1 compressed-block container.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "xbc1"
//!      4     4  algorithm id (1 = zlib, 3 = zstd)
//!      8     4  uncompressed size
//!     12     4  compressed size
//!     16     4  checksum: wrapping sum of the uncompressed bytes (advisory)
//!     20    28  name, ASCII, null padded
//!     48     n  compressed payload
//! ```
//!
//! All integers are little-endian.  The checksum is written on encode and
//! never checked on decode.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use crate::codec::Algorithm;
use crate::error::{ArchiveError, Result};

pub const BLOCK_MAGIC: &[u8; 4] = b"xbc1";
pub const BLOCK_HEADER_SIZE: usize = 48;
pub const NAME_FIELD_LEN: usize = 28;
/// One byte of the name field is kept for the terminator.
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic:             [u8; 4],
    /// Raw id; resolve with [`Algorithm::from_id`].
    pub algorithm:         u32,
    pub uncompressed_size: u32,
    pub compressed_size:   u32,
    pub checksum:          u32,
    pub name:              [u8; NAME_FIELD_LEN],
}

impl BlockHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.algorithm)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        writer.write_all(&self.name)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let algorithm = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let checksum = reader.read_u32::<LittleEndian>()?;
        let mut name = [0u8; NAME_FIELD_LEN];
        reader.read_exact(&mut name)?;
        Ok(Self { magic, algorithm, uncompressed_size, compressed_size, checksum, name })
    }

    /// Parse and validate the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if !is_block(bytes) {
            return Err(ArchiveError::format(format!(
                "not an xbc1 block (magic {:02x?})",
                &bytes[..bytes.len().min(4)]
            )));
        }
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(ArchiveError::format(format!(
                "xbc1 header truncated: {} of {BLOCK_HEADER_SIZE} bytes",
                bytes.len()
            )));
        }
        Ok(Self::read(Cursor::new(bytes))?)
    }

    /// The recognised algorithm, or a `Format` error for unknown ids.
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_id(self.algorithm).ok_or_else(|| {
            ArchiveError::format(format!("unknown compression algorithm id {}", self.algorithm))
        })
    }

    /// Header name up to the first null byte.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// `true` when `bytes` starts with the xbc1 magic.
#[inline]
pub fn is_block(bytes: &[u8]) -> bool {
    bytes.starts_with(BLOCK_MAGIC)
}

/// Wrapping sum of every byte.  Advisory only; too weak to detect reordering.
pub fn additive_checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Pack `name` into the fixed name field: first 27 characters, ASCII only.
pub fn name_field(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut field = [0u8; NAME_FIELD_LEN];
    let ascii = name.chars().take(MAX_NAME_LEN).filter(char::is_ascii);
    for (slot, c) in field.iter_mut().zip(ascii) {
        *slot = c as u8;
    }
    field
}

/// Compress `payload` and wrap it in an xbc1 container.
pub fn encode_block(payload: &[u8], algorithm: Algorithm, name: &str) -> Result<Vec<u8>> {
    let uncompressed_size = u32::try_from(payload.len())
        .map_err(|_| ArchiveError::format(format!("payload of {} bytes exceeds u32", payload.len())))?;
    let compressed = algorithm.compress(payload)?;
    let compressed_size = u32::try_from(compressed.len())
        .map_err(|_| ArchiveError::format("compressed payload exceeds u32"))?;

    let header = BlockHeader {
        magic: *BLOCK_MAGIC,
        algorithm: algorithm.id(),
        uncompressed_size,
        compressed_size,
        checksum: additive_checksum(payload),
        name: name_field(name),
    };

    let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE + compressed.len());
    header.write(&mut out)?;
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Unwrap an xbc1 container and return the decompressed payload.
///
/// Exactly `compressed_size` bytes after the header are inflated; trailing
/// bytes (alignment padding, for instance) are ignored.
pub fn decode_block(bytes: &[u8]) -> Result<Vec<u8>> {
    let header = BlockHeader::parse(bytes)?;
    let algorithm = header.algorithm()?;

    let end = BLOCK_HEADER_SIZE + header.compressed_size as usize;
    let payload = bytes.get(BLOCK_HEADER_SIZE..end).ok_or_else(|| {
        ArchiveError::format(format!(
            "xbc1 payload truncated: header declares {} bytes, {} present",
            header.compressed_size,
            bytes.len() - BLOCK_HEADER_SIZE
        ))
    })?;

    let out = algorithm.decompress(payload, header.uncompressed_size as usize)?;
    if out.len() != header.uncompressed_size as usize {
        return Err(ArchiveError::SizeMismatch {
            expected: header.uncompressed_size as u64,
            actual:   out.len() as u64,
        });
    }
    Ok(out)
}

// ── Standalone file mode ─────────────────────────────────────────────────────

/// Compress one file into an xbc1 container.
///
/// `output` defaults to the input path with its extension replaced by `xbc1`;
/// `name` defaults to the input's file name.  Returns the written path.
pub fn compress_file(
    input:     &Path,
    output:    Option<&Path>,
    algorithm: Algorithm,
    name:      Option<&str>,
) -> Result<PathBuf> {
    let data = fs::read(input)?;
    let default_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.filter(|n| !n.is_empty()).unwrap_or(&default_name);

    let block = encode_block(&data, algorithm, name)?;
    let output = output.map(Path::to_path_buf).unwrap_or_else(|| input.with_extension("xbc1"));
    fs::write(&output, &block)?;

    info!(
        algorithm = %algorithm,
        original = data.len(),
        compressed = block.len() - BLOCK_HEADER_SIZE,
        name = %name,
        "compressed {} -> {}",
        input.display(),
        output.display()
    );
    Ok(output)
}

/// Decompress one xbc1 file.  `output` defaults to the input path with its
/// extension replaced by `dec`.  Returns the written path.
pub fn decompress_file(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let bytes = fs::read(input)?;
    let header = BlockHeader::parse(&bytes)?;
    debug!(
        algorithm = header.algorithm,
        compressed = header.compressed_size,
        uncompressed = header.uncompressed_size,
        name = %header.name(),
        "xbc1 header"
    );

    let data = decode_block(&bytes)?;
    let output = output.map(Path::to_path_buf).unwrap_or_else(|| input.with_extension("dec"));
    fs::write(&output, &data)?;
    info!("decompressed {} -> {}", input.display(), output.display());
    Ok(output)
}
