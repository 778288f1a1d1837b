//! ARH archive index.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "arh2"
//!      4     4  entry count
//!      8     4  absolute offset of the entry table
//!     12     4  reserved (zero)
//!  table  16*n  records: cache_id u64, stored_size u32, declared_uncompressed_size u32
//! ```
//!
//! Readers honour the table offset, so headers longer than 16 bytes parse.
//! Writers always place the table directly after the 16-byte header.
//!
//! Record order is the physical order of entries in the blob.  See
//! [`crate::layout`] for how offsets are derived.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use crate::error::{ArchiveError, Result};
use crate::layout::OffsetReplay;

pub const INDEX_MAGIC: &[u8; 4] = b"arh2";
pub const INDEX_HEADER_SIZE: u32 = 16;
pub const ENTRY_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub cache_id:                   u64,
    /// Exact byte length of the entry in the blob, padding excluded.
    pub stored_size:                u32,
    /// Pre-wrap length for entries the builder compressed, otherwise 0.
    /// Not a compression flag: only the xbc1 magic is.
    pub declared_uncompressed_size: u32,
}

impl ArchiveEntry {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.cache_id)?;
        writer.write_u32::<LittleEndian>(self.stored_size)?;
        writer.write_u32::<LittleEndian>(self.declared_uncompressed_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            cache_id:                   reader.read_u64::<LittleEndian>()?,
            stored_size:                reader.read_u32::<LittleEndian>()?,
            declared_uncompressed_size: reader.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveIndex {
    pub fn new(entries: Vec<ArchiveEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: ArchiveEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries paired with their derived blob offsets.
    pub fn offsets(&self) -> OffsetReplay<'_> {
        OffsetReplay::new(&self.entries)
    }

    /// Parse a complete index file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)
            .map_err(|_| ArchiveError::format("index too short for magic"))?;
        if &magic != INDEX_MAGIC {
            return Err(ArchiveError::format(format!("bad index magic {magic:02x?}")));
        }

        let header = |e: io::Error| ArchiveError::format(format!("index header truncated: {e}"));
        let count = cur.read_u32::<LittleEndian>().map_err(header)? as usize;
        let table_offset = cur.read_u32::<LittleEndian>().map_err(header)? as u64;

        let available = (bytes.len() as u64).saturating_sub(table_offset) as usize;
        if table_offset > bytes.len() as u64 || count > available / ENTRY_RECORD_SIZE {
            return Err(ArchiveError::format(format!(
                "index declares {count} records at offset {table_offset}, file is {} bytes",
                bytes.len()
            )));
        }

        cur.seek(SeekFrom::Start(table_offset))?;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let entry = ArchiveEntry::read(&mut cur)
                .map_err(|_| ArchiveError::format(format!("index record {i} truncated")))?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Read and parse an index from a stream.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }

    /// Serialize `entries` in the given order.
    pub fn build(entries: &[ArchiveEntry]) -> Vec<u8> {
        let mut out = Vec::with_capacity(INDEX_HEADER_SIZE as usize + entries.len() * ENTRY_RECORD_SIZE);
        // Writes into a Vec cannot fail.
        let _ = write_index(&mut out, entries);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Self::build(&self.entries)
    }

    pub fn write<W: Write>(&self, writer: W) -> io::Result<()> {
        write_index(writer, &self.entries)
    }
}

fn write_index<W: Write>(mut writer: W, entries: &[ArchiveEntry]) -> io::Result<()> {
    let count = u32::try_from(entries.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many index entries"))?;
    writer.write_all(INDEX_MAGIC)?;
    writer.write_u32::<LittleEndian>(count)?;
    writer.write_u32::<LittleEndian>(INDEX_HEADER_SIZE)?;
    writer.write_u32::<LittleEndian>(0)?;
    for entry in entries {
        entry.write(&mut writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ArchiveEntry> {
        vec![
            ArchiveEntry { cache_id: 0x1, stored_size: 10, declared_uncompressed_size: 0 },
            ArchiveEntry { cache_id: 0xdead_beef_0000_0002, stored_size: 20, declared_uncompressed_size: 400 },
        ]
    }

    #[test]
    fn build_layout() {
        let bytes = ArchiveIndex::build(&sample());
        assert_eq!(bytes.len(), 16 + 2 * 16);
        assert_eq!(&bytes[0..4], b"arh2");
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &16u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0u8; 4]);
        assert_eq!(&bytes[16..24], &1u64.to_le_bytes());
        assert_eq!(&bytes[24..28], &10u32.to_le_bytes());
    }

    #[test]
    fn parse_preserves_order() {
        let index = ArchiveIndex::parse(&ArchiveIndex::build(&sample())).unwrap();
        assert_eq!(index.entries, sample());
    }

    #[test]
    fn parse_honours_table_offset() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"arh2");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.resize(40, 0xAA);
        sample()[1].write(&mut bytes).unwrap();

        let index = ArchiveIndex::parse(&bytes).unwrap();
        assert_eq!(index.entries, vec![sample()[1]]);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = ArchiveIndex::build(&sample());
        bytes[3] = b'1';
        assert!(matches!(ArchiveIndex::parse(&bytes), Err(ArchiveError::Format(_))));
    }

    #[test]
    fn truncated_record_rejected() {
        let bytes = ArchiveIndex::build(&sample());
        let err = ArchiveIndex::parse(&bytes[..bytes.len() - 3]);
        assert!(matches!(err, Err(ArchiveError::Format(_))));
    }

    #[test]
    fn empty_index() {
        let bytes = ArchiveIndex::build(&[]);
        assert_eq!(bytes.len(), 16);
        assert!(ArchiveIndex::parse(&bytes).unwrap().is_empty());
    }
}
