//! Sequential ARD extraction driven by an ARH index.
//!
//! # Cursor replay
//! Offsets are not stored, so the [`Extractor`] walks the index in order and
//! keeps one cursor into the blob.  After every entry the cursor advances by
//! `stored_size` plus alignment padding, whatever happened to the entry.  A
//! failed read, a failed decode, a filtered entry or a sink error never moves
//! any later entry.
//!
//! # Failure policy
//! Only the index and the blob as a whole can abort extraction (bad index
//! magic, unreadable files).  Per-entry problems are logged, counted in the
//! [`ExtractReport`], and extraction continues with the next record.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::block::{decode_block, is_block};
use crate::content::ContentKind;
use crate::error::{ArchiveError, Result};
use crate::index::{ArchiveEntry, ArchiveIndex};
use crate::layout::footprint;

/// Log a progress line every this many entries.
const PROGRESS_EVERY: usize = 100;
/// Upper bound on the read buffer reserved up front for one entry.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// When set, only entries of this kind are emitted.
    pub only: Option<ContentKind>,
}

// ── Entry outcomes ──────────────────────────────────────────────────────────

/// One entry ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub cache_id: u64,
    /// Blob offset recovered by replay.
    pub offset:   u64,
    pub kind:     ContentKind,
    /// Decoded payload, or the raw stored bytes when decoding failed.
    pub data:     Vec<u8>,
    /// Non-fatal metadata inconsistencies seen for this entry.
    pub warnings: usize,
}

impl ExtractedEntry {
    /// `{cache_id:016x}.{ext}`
    pub fn file_name(&self) -> String {
        format!("{:016x}.{}", self.cache_id, self.kind.extension())
    }
}

#[derive(Debug)]
pub enum EntryOutcome {
    Extracted(ExtractedEntry),
    /// Filtered out; the cursor still moved past it.
    Skipped { cache_id: u64, kind: ContentKind, warnings: usize },
    /// Unreadable; nothing to emit.
    Failed { cache_id: u64, error: ArchiveError },
}

// ── Sinks ───────────────────────────────────────────────────────────────────

/// Destination for extracted entries.
pub trait EntrySink {
    fn write_entry(&mut self, entry: &ExtractedEntry) -> io::Result<()>;
}

impl EntrySink for Vec<ExtractedEntry> {
    fn write_entry(&mut self, entry: &ExtractedEntry) -> io::Result<()> {
        self.push(entry.clone());
        Ok(())
    }
}

/// Writes each entry to `{dir}/{cache_id:016x}.{ext}`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create `dir` (and parents) if needed.
    pub fn create<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EntrySink for DirectorySink {
    fn write_entry(&mut self, entry: &ExtractedEntry) -> io::Result<()> {
        fs::write(self.dir.join(entry.file_name()), &entry.data)
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub entries:  usize,
    pub saved:    usize,
    pub skipped:  usize,
    pub failed:   usize,
    pub warnings: usize,
}

// ── Extractor ───────────────────────────────────────────────────────────────

pub struct Extractor<R: Read + Seek> {
    blob:     R,
    entries:  Vec<ArchiveEntry>,
    position: usize,
    cursor:   u64,
    options:  ExtractOptions,
}

impl<R: Read + Seek> Extractor<R> {
    pub fn new(index: ArchiveIndex, blob: R) -> Self {
        Self::with_options(index, blob, ExtractOptions::default())
    }

    pub fn with_options(index: ArchiveIndex, blob: R, options: ExtractOptions) -> Self {
        Self { blob, entries: index.entries, position: 0, cursor: 0, options }
    }

    /// Current blob offset: the start of the next entry.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` once every index record has been consumed.
    pub fn is_done(&self) -> bool {
        self.position >= self.entries.len()
    }

    /// Process the next index record.  Returns `None` once all are consumed.
    pub fn next_entry(&mut self) -> Option<EntryOutcome> {
        let entry = *self.entries.get(self.position)?;
        let offset = self.cursor;

        let outcome = match self.read_stored(&entry, offset) {
            Ok(raw) => self.classify(&entry, offset, raw),
            Err(error) => EntryOutcome::Failed { cache_id: entry.cache_id, error },
        };

        // Unconditional: later offsets depend only on the index.
        self.cursor += footprint(entry.stored_size);
        self.position += 1;
        Some(outcome)
    }

    /// Drain the index into `sink`.
    pub fn extract_all<S: EntrySink>(&mut self, sink: &mut S) -> ExtractReport {
        let total = self.entries.len();
        let mut report = ExtractReport { entries: total, ..ExtractReport::default() };

        while let Some(outcome) = self.next_entry() {
            match outcome {
                EntryOutcome::Extracted(entry) => {
                    report.warnings += entry.warnings;
                    if entry.kind == ContentKind::Failed {
                        report.failed += 1;
                    }
                    match sink.write_entry(&entry) {
                        Ok(()) => report.saved += 1,
                        Err(e) => {
                            error!("Error saving file {:016x}: {e}", entry.cache_id);
                            if entry.kind != ContentKind::Failed {
                                report.failed += 1;
                            }
                        }
                    }
                }
                EntryOutcome::Skipped { kind, warnings, .. } => {
                    report.warnings += warnings;
                    report.skipped += 1;
                    if kind == ContentKind::Failed {
                        report.failed += 1;
                    }
                }
                EntryOutcome::Failed { cache_id, error } => {
                    error!("Error processing file {cache_id:016x}: {error}");
                    report.failed += 1;
                }
            }

            if self.position % PROGRESS_EVERY == 0 || self.position == total {
                info!("Processed files: {}/{total}, saved: {}", self.position, report.saved);
            }
        }
        report
    }

    fn read_stored(&mut self, entry: &ArchiveEntry, offset: u64) -> Result<Vec<u8>> {
        self.blob.seek(SeekFrom::Start(offset))?;
        // stored_size is untrusted; the short-read check below catches lies.
        let mut raw = Vec::with_capacity((entry.stored_size as usize).min(MAX_PREALLOC));
        (&mut self.blob)
            .take(entry.stored_size as u64)
            .read_to_end(&mut raw)?;
        if raw.len() < entry.stored_size as usize {
            return Err(ArchiveError::CorruptEntry {
                cache_id:  entry.cache_id,
                offset,
                expected:  entry.stored_size,
                available: raw.len() as u64,
            });
        }
        Ok(raw)
    }

    fn classify(&self, entry: &ArchiveEntry, offset: u64, raw: Vec<u8>) -> EntryOutcome {
        let id = entry.cache_id;
        let declared = entry.declared_uncompressed_size;
        let mut warnings = 0;

        let (data, kind) = if is_block(&raw) {
            match decode_block(&raw) {
                Ok(decoded) => {
                    if declared > 0 && decoded.len() != declared as usize {
                        warn!(
                            "Decompressed file size mismatch {id:016x}: expected {declared}, got {}",
                            decoded.len()
                        );
                        warnings += 1;
                    }
                    let kind = ContentKind::sniff(&decoded);
                    (decoded, kind)
                }
                Err(e) => {
                    error!("Error decompressing file {id:016x}: {e}");
                    (raw, ContentKind::Failed)
                }
            }
        } else {
            if declared > 0 {
                warn!("File {id:016x} is marked as compressed (uncompressed size {declared}) but is not xbc1");
                warnings += 1;
            }
            let kind = ContentKind::sniff(&raw);
            (raw, kind)
        };

        if self.options.only.is_some_and(|only| only != kind) {
            return EntryOutcome::Skipped { cache_id: id, kind, warnings };
        }
        EntryOutcome::Extracted(ExtractedEntry { cache_id: id, offset, kind, data, warnings })
    }
}

impl<R: Read + Seek> Iterator for Extractor<R> {
    type Item = EntryOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

/// Open an ARH/ARD pair.  Index errors are fatal; the blob is only opened.
pub fn open_archive(
    index_path: &Path,
    blob_path:  &Path,
    options:    ExtractOptions,
) -> Result<Extractor<BufReader<File>>> {
    let index = ArchiveIndex::parse(&fs::read(index_path)?)?;
    info!("Found {} files in {}", index.len(), index_path.display());
    let blob = BufReader::new(File::open(blob_path)?);
    Ok(Extractor::with_options(index, blob, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::encode_block;
    use crate::codec::Algorithm;
    use std::io::Cursor;

    fn entry(cache_id: u64, stored_size: u32, declared: u32) -> ArchiveEntry {
        ArchiveEntry { cache_id, stored_size, declared_uncompressed_size: declared }
    }

    fn blob_of(parts: &[&[u8]]) -> Vec<u8> {
        let mut blob = Vec::new();
        for p in parts {
            blob.extend_from_slice(p);
            blob.resize(blob.len() + crate::layout::pad(p.len() as u64, 16) as usize, 0);
        }
        blob
    }

    #[test]
    fn reads_entries_at_replayed_offsets() {
        let a = [0xA1u8; 10];
        let b = [0xB2u8; 20];
        let blob = blob_of(&[&a, &b]);
        assert_eq!(blob.len(), 10 + 6 + 20 + 12);

        let index = ArchiveIndex::new(vec![entry(0x1, 10, 0), entry(0x2, 20, 0)]);
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::new(index, Cursor::new(blob)).extract_all(&mut out);

        assert_eq!(report.saved, 2);
        assert_eq!(out[0].offset, 0);
        assert_eq!(out[0].data, a);
        assert_eq!(out[1].offset, 16);
        assert_eq!(out[1].data, b);
        assert_eq!(out[1].file_name(), "0000000000000002.dec");
    }

    #[test]
    fn decodes_blocks_and_sniffs_payload() {
        let block = encode_block(b"BDAT\x00", Algorithm::Zlib, "table.bdat").unwrap();
        let index = ArchiveIndex::new(vec![entry(0xab, block.len() as u32, 5)]);
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::new(index, Cursor::new(blob_of(&[&block]))).extract_all(&mut out);

        assert_eq!(report.warnings, 0);
        assert_eq!(out[0].kind, ContentKind::Bdat);
        assert_eq!(out[0].data, b"BDAT\x00");
        assert_eq!(out[0].file_name(), "00000000000000ab.bdat");
    }

    #[test]
    fn declared_size_mismatch_warns_but_keeps_decoded_bytes() {
        let block = encode_block(b"hello", Algorithm::Zstd, "").unwrap();
        let index = ArchiveIndex::new(vec![entry(1, block.len() as u32, 999)]);
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::new(index, Cursor::new(blob_of(&[&block]))).extract_all(&mut out);

        assert_eq!(report.warnings, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(out[0].data, b"hello");
    }

    #[test]
    fn raw_entry_with_declared_size_warns() {
        let index = ArchiveIndex::new(vec![entry(1, 4, 100)]);
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::new(index, Cursor::new(blob_of(&[b"BDAT"]))).extract_all(&mut out);
        assert_eq!(report.warnings, 1);
        assert_eq!(out[0].kind, ContentKind::Bdat);
    }

    #[test]
    fn undecodable_block_is_emitted_raw_as_failed() {
        let mut block = encode_block(b"payload", Algorithm::Zlib, "").unwrap();
        block[4..8].copy_from_slice(&99u32.to_le_bytes());
        let index = ArchiveIndex::new(vec![entry(7, block.len() as u32, 0)]);
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::new(index, Cursor::new(blob_of(&[&block]))).extract_all(&mut out);

        assert_eq!(report.failed, 1);
        assert_eq!(report.saved, 1);
        assert_eq!(out[0].kind, ContentKind::Failed);
        assert_eq!(out[0].data, block);
        assert_eq!(out[0].file_name(), "0000000000000007.failed");
    }

    #[test]
    fn filter_skips_but_keeps_alignment() {
        let other = [1u8; 33];
        let blob = blob_of(&[&other, b"BDAT-table"]);
        let index = ArchiveIndex::new(vec![entry(1, 33, 0), entry(2, 10, 0)]);
        let opts = ExtractOptions { only: Some(ContentKind::Bdat) };
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::with_options(index, Cursor::new(blob), opts).extract_all(&mut out);

        assert_eq!(report.skipped, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cache_id, 2);
        assert_eq!(out[0].offset, 48);
        assert_eq!(out[0].data, b"BDAT-table");
    }

    #[test]
    fn filtered_out_decode_failure_still_counts_as_failed() {
        let mut block = encode_block(b"payload", Algorithm::Zlib, "").unwrap();
        block[4..8].copy_from_slice(&99u32.to_le_bytes());
        let index = ArchiveIndex::new(vec![entry(7, block.len() as u32, 0)]);
        let opts = ExtractOptions { only: Some(ContentKind::Bdat) };
        let mut out: Vec<ExtractedEntry> = Vec::new();
        let report = Extractor::with_options(index, Cursor::new(blob_of(&[&block])), opts).extract_all(&mut out);

        assert!(out.is_empty());
        assert_eq!(report, ExtractReport { entries: 1, saved: 0, skipped: 1, failed: 1, warnings: 0 });
    }

    #[test]
    fn oversized_stored_size_is_corrupt_entry() {
        let index = ArchiveIndex::new(vec![entry(5, u32::MAX, 0)]);
        let mut ex = Extractor::new(index, Cursor::new(vec![0u8; 32]));

        match ex.next_entry() {
            Some(EntryOutcome::Failed { error: ArchiveError::CorruptEntry { expected, available, .. }, .. }) => {
                assert_eq!(expected, u32::MAX);
                assert_eq!(available, 32);
            }
            other => panic!("expected CorruptEntry, got {other:?}"),
        }
        assert!(ex.is_done());
    }

    #[test]
    fn short_blob_is_corrupt_entry_and_cursor_still_advances() {
        let index = ArchiveIndex::new(vec![entry(1, 8, 0), entry(2, 64, 0), entry(3, 4, 0)]);
        let mut ex = Extractor::new(index, Cursor::new(vec![9u8; 20]));

        assert!(matches!(ex.next_entry(), Some(EntryOutcome::Extracted(_))));
        assert_eq!(ex.cursor(), 16);
        match ex.next_entry() {
            Some(EntryOutcome::Failed { error: ArchiveError::CorruptEntry { offset, available, .. }, .. }) => {
                assert_eq!(offset, 16);
                assert_eq!(available, 4);
            }
            other => panic!("expected CorruptEntry, got {other:?}"),
        }
        assert_eq!(ex.cursor(), 80);
        assert!(matches!(ex.next_entry(), Some(EntryOutcome::Failed { cache_id: 3, .. })));
        assert!(ex.next_entry().is_none());
        assert!(ex.is_done());
    }

    #[test]
    fn sink_errors_are_counted_not_fatal() {
        struct Flaky(usize);
        impl EntrySink for Flaky {
            fn write_entry(&mut self, _: &ExtractedEntry) -> io::Result<()> {
                self.0 += 1;
                if self.0 == 1 {
                    Err(io::Error::new(io::ErrorKind::Other, "disk full"))
                } else {
                    Ok(())
                }
            }
        }
        let index = ArchiveIndex::new(vec![entry(1, 2, 0), entry(2, 2, 0)]);
        let report = Extractor::new(index, Cursor::new(blob_of(&[b"aa", b"bb"])))
            .extract_all(&mut Flaky(0));
        assert_eq!(report, ExtractReport { entries: 2, saved: 1, skipped: 0, failed: 1, warnings: 0 });
    }
}
