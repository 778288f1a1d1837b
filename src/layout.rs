//! Blob alignment and offset replay.
//!
//! The index never stores offsets.  The start of entry *k* is the sum, over
//! entries `0..k`, of `stored_size + pad(stored_size, ALIGNMENT)`, so offsets
//! can only be recovered by walking the index in order.

use crate::index::ArchiveEntry;

/// Every entry in the blob starts on this boundary.
pub const ALIGNMENT: u64 = 16;

/// Zero bytes needed after `n` bytes to reach the next multiple of `align`.
#[inline]
pub fn pad(n: u64, align: u64) -> u64 {
    (align - n % align) % align
}

/// `n` rounded up to a multiple of `align`.
#[inline]
pub fn aligned(n: u64, align: u64) -> u64 {
    n + pad(n, align)
}

/// Bytes one entry occupies in the blob, padding included.
#[inline]
pub fn footprint(stored_size: u32) -> u64 {
    aligned(stored_size as u64, ALIGNMENT)
}

/// Total blob length implied by `entries`.
pub fn blob_len(entries: &[ArchiveEntry]) -> u64 {
    entries.iter().map(|e| footprint(e.stored_size)).sum()
}

/// Yields `(offset, entry)` pairs in index order.
#[derive(Debug, Clone)]
pub struct OffsetReplay<'a> {
    entries: std::slice::Iter<'a, ArchiveEntry>,
    cursor:  u64,
}

impl<'a> OffsetReplay<'a> {
    pub fn new(entries: &'a [ArchiveEntry]) -> Self {
        Self { entries: entries.iter(), cursor: 0 }
    }
}

impl<'a> Iterator for OffsetReplay<'a> {
    type Item = (u64, &'a ArchiveEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        let offset = self.cursor;
        self.cursor += footprint(entry.stored_size);
        Some((offset, entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
