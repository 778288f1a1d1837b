//! ARH/ARD archive builder.
//!
//! # Pipeline
//!
//! 1. **Prepare** (parallel, any order): each [`SourceFile`] is read, given a
//!    `cache_id`, and optionally wrapped in an xbc1 block.  A file that cannot
//!    be read or compressed is logged and dropped; siblings are unaffected.
//! 2. **Assemble** (single thread): prepared entries are sorted by
//!    `(cache_id, rel_path)` and appended to the blob one by one, each padded
//!    to the 16-byte boundary, while the matching index records are
//!    collected in the same order.
//!
//! Sorting before assembly means thread scheduling in step 1 never reaches
//! the bytes on disk: the same inputs always produce the same archive.
//!
//! # Cache ids
//! A file whose stem (the name up to the first `.`) is 1 to 16 hex digits
//! keeps that number as its id.  Any other file gets the first eight bytes,
//! little-endian, of the BLAKE3 hash of its relative path, with `/` as the
//! separator on every platform.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::block::{encode_block, is_block};
use crate::codec::{Algorithm, DEFAULT_ZSTD_THRESHOLD};
use crate::error::{ArchiveError, Result};
use crate::index::{ArchiveEntry, ArchiveIndex};
use crate::layout::{pad, ALIGNMENT};

const ZERO_PAD: [u8; ALIGNMENT as usize] = [0u8; ALIGNMENT as usize];

// ── Options ─────────────────────────────────────────────────────────────────

/// Configuration for [`build_archive`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Wrap every entry that is not already an xbc1 block.
    pub compress:       bool,
    /// Payloads strictly larger than this use Zstd; the rest use Zlib.
    pub zstd_threshold: usize,
    /// Worker count for the prepare stage.  `None` uses every core.
    pub threads:        Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compress:       false,
            zstd_threshold: DEFAULT_ZSTD_THRESHOLD,
            threads:        None,
        }
    }
}

// ── Inputs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path:     PathBuf,
    /// Path relative to the input root; feeds the fallback cache id.
    pub rel_path: PathBuf,
}

/// Every regular file under `root`, sorted by relative path.
pub fn collect_sources(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for ent in WalkDir::new(root).follow_links(false) {
        let ent = ent.map_err(|e| {
            let msg = e.to_string();
            ArchiveError::Io(e.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, msg)))
        })?;
        if !ent.file_type().is_file() {
            continue;
        }
        let rel_path = ent
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| ent.path().to_path_buf());
        files.push(SourceFile { path: ent.path().to_path_buf(), rel_path });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

// ── Cache ids ───────────────────────────────────────────────────────────────

/// Parse a hex stem of at most 16 digits.
pub fn hex_stem_id(file_name: &str) -> Option<u64> {
    let stem = file_name.split('.').next().unwrap_or_default();
    if stem.is_empty() || stem.len() > 16 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

/// Fixed 64-bit hash of a relative path, independent of platform separators.
pub fn path_hash_id(rel_path: &Path) -> u64 {
    let normalized = rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let digest = blake3::hash(normalized.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(first)
}

pub fn derive_cache_id(path: &Path, rel_path: &Path) -> u64 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(hex_stem_id)
        .unwrap_or_else(|| path_hash_id(rel_path))
}

// ── Stage 1: prepare ────────────────────────────────────────────────────────

/// One file ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEntry {
    pub cache_id:                   u64,
    pub rel_path:                   PathBuf,
    /// Bytes exactly as they will appear in the blob.
    pub data:                       Vec<u8>,
    pub declared_uncompressed_size: u32,
}

/// Turn raw file contents into a [`PreparedEntry`].
pub fn prepare_bytes(src: &SourceFile, raw: Vec<u8>, opts: &BuildOptions) -> Result<PreparedEntry> {
    let cache_id = derive_cache_id(&src.path, &src.rel_path);

    let (data, declared_uncompressed_size) = if opts.compress && !is_block(&raw) {
        let declared = u32::try_from(raw.len())
            .map_err(|_| ArchiveError::format(format!("{} bytes do not fit an entry", raw.len())))?;
        let algorithm = Algorithm::for_payload_len(raw.len(), opts.zstd_threshold);
        let name = src
            .rel_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (encode_block(&raw, algorithm, &name)?, declared)
    } else {
        (raw, 0)
    };

    if u32::try_from(data.len()).is_err() {
        return Err(ArchiveError::format(format!("{} bytes do not fit an entry", data.len())));
    }
    Ok(PreparedEntry { cache_id, rel_path: src.rel_path.clone(), data, declared_uncompressed_size })
}

/// Read one source file and prepare it.
pub fn prepare_entry(src: &SourceFile, opts: &BuildOptions) -> Result<PreparedEntry> {
    let raw = fs::read(&src.path)?;
    prepare_bytes(src, raw, opts)
}

fn prepare_logged(src: &SourceFile, opts: &BuildOptions) -> Option<PreparedEntry> {
    match prepare_entry(src, opts) {
        Ok(entry) => {
            debug!("prepared {} as {:016x}", src.rel_path.display(), entry.cache_id);
            Some(entry)
        }
        Err(e) => {
            error!("Error processing file {}: {e}", src.rel_path.display());
            None
        }
    }
}

/// Prepare every source on a worker pool.  Failed files are dropped.
///
/// The result is an unordered collection; callers must not rely on its order.
pub fn prepare_all(sources: &[SourceFile], opts: &BuildOptions) -> Vec<PreparedEntry> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        let run = || -> Vec<PreparedEntry> {
            sources.par_iter().filter_map(|src| prepare_logged(src, opts)).collect()
        };

        match opts.threads {
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!("could not start a {n}-thread pool ({e}); using the global pool");
                    run()
                }
            },
            None => run(),
        }
    }

    #[cfg(not(feature = "parallel"))]
    {
        sources.iter().filter_map(|src| prepare_logged(src, opts)).collect()
    }
}

// ── Stage 2: assemble ───────────────────────────────────────────────────────

/// Sequential blob writer.  Appends entries with alignment padding and
/// records the index in the same order.
pub struct ArchiveWriter<W: Write> {
    writer:   W,
    index:    ArchiveIndex,
    position: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, index: ArchiveIndex::default(), position: 0 }
    }

    /// Bytes written to the blob so far, padding included.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Append one entry.  Returns the offset it was written at.
    pub fn append(&mut self, cache_id: u64, data: &[u8], declared_uncompressed_size: u32) -> Result<u64> {
        let stored_size = u32::try_from(data.len())
            .map_err(|_| ArchiveError::format(format!("entry {cache_id:016x} exceeds u32 size")))?;
        let offset = self.position;
        let padding = pad(data.len() as u64, ALIGNMENT);

        self.writer.write_all(data)?;
        self.writer.write_all(&ZERO_PAD[..padding as usize])?;
        self.position += data.len() as u64 + padding;

        self.index.push(ArchiveEntry { cache_id, stored_size, declared_uncompressed_size });
        Ok(offset)
    }

    /// Flush the blob and hand back the writer and the finished index.
    pub fn finish(mut self) -> Result<(W, ArchiveIndex)> {
        self.writer.flush()?;
        Ok((self.writer, self.index))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Source files offered to the builder.
    pub scanned:    usize,
    /// Entries written to the archive.
    pub packed:     usize,
    /// Files dropped because they could not be read or compressed.
    pub dropped:    usize,
    /// Files written under a cache id an earlier file already used.
    pub duplicates: usize,
    /// Entries wrapped in an xbc1 block by this build.
    pub compressed: usize,
    pub blob_size:  u64,
}

/// Sort `entries` and write every one of them to `blob`.  Entries sharing a
/// `cache_id` are kept, ordered by relative path, and reported as duplicates.
pub fn assemble<W: Write>(mut entries: Vec<PreparedEntry>, blob: W) -> Result<(ArchiveIndex, BuildReport)> {
    entries.sort_by(|a, b| a.cache_id.cmp(&b.cache_id).then_with(|| a.rel_path.cmp(&b.rel_path)));

    let mut report = BuildReport::default();
    let mut writer = ArchiveWriter::new(blob);
    let mut last_id = None;

    for entry in &entries {
        if last_id == Some(entry.cache_id) {
            warn!(
                "Duplicate cache id {:016x}: {} shares it with an earlier file",
                entry.cache_id,
                entry.rel_path.display()
            );
            report.duplicates += 1;
        }
        last_id = Some(entry.cache_id);

        writer.append(entry.cache_id, &entry.data, entry.declared_uncompressed_size)?;
        report.packed += 1;
        if entry.declared_uncompressed_size > 0 {
            report.compressed += 1;
        }
    }

    report.blob_size = writer.position();
    let (_, index) = writer.finish()?;
    Ok((index, report))
}

/// Build an archive from `sources`, writing the blob and index streams.
pub fn build_archive<B: Write, I: Write>(
    sources: &[SourceFile],
    opts:    &BuildOptions,
    blob:    B,
    mut index_out: I,
) -> Result<BuildReport> {
    info!("Processing {} files", sources.len());
    let prepared = prepare_all(sources, opts);
    let dropped = sources.len() - prepared.len();

    let (index, mut report) = assemble(prepared, blob)?;
    index.write(&mut index_out)?;
    index_out.flush()?;

    report.scanned = sources.len();
    report.dropped = dropped;
    info!("Added files: {} out of {}", report.packed, report.scanned);
    Ok(report)
}

/// [`build_archive`] over a directory, writing `blob_path` and `index_path`.
pub fn build_from_dir(
    input:      &Path,
    blob_path:  &Path,
    index_path: &Path,
    opts:       &BuildOptions,
) -> Result<BuildReport> {
    let sources = collect_sources(input)?;
    info!("Found {} files to archive", sources.len());
    let blob = io::BufWriter::new(fs::File::create(blob_path)?);
    let index = io::BufWriter::new(fs::File::create(index_path)?);
    build_archive(&sources, opts, blob, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::decode_block;

    fn src(name: &str) -> SourceFile {
        SourceFile { path: PathBuf::from("/in").join(name), rel_path: PathBuf::from(name) }
    }

    #[test]
    fn hex_stems_become_ids() {
        assert_eq!(hex_stem_id("00000000deadbeef.bdat"), Some(0xdead_beef));
        assert_eq!(hex_stem_id("FFFFFFFFFFFFFFFF"), Some(u64::MAX));
        assert_eq!(hex_stem_id("1a.tar.gz"), Some(0x1a));
    }

    #[test]
    fn non_hex_stems_fall_back() {
        assert_eq!(hex_stem_id("readme.txt"), None);
        assert_eq!(hex_stem_id("12345678901234567"), None);
        assert_eq!(hex_stem_id(".hidden"), None);
        assert_eq!(hex_stem_id("abc_def"), None);
    }

    #[test]
    fn path_hash_is_stable_and_separator_agnostic() {
        let a = path_hash_id(Path::new("dir/sub/readme.txt"));
        assert_eq!(a, path_hash_id(Path::new("dir/sub/readme.txt")));
        assert_ne!(a, path_hash_id(Path::new("dir/sub/readme.md")));
        let digest = blake3::hash(b"dir/sub/readme.txt");
        let mut first = [0u8; 8];
        first.copy_from_slice(&digest.as_bytes()[..8]);
        assert_eq!(a, u64::from_le_bytes(first));
    }

    #[test]
    fn compress_wraps_and_records_prewrap_size() {
        let opts = BuildOptions { compress: true, ..BuildOptions::default() };
        let entry = prepare_bytes(&src("0a.bin"), b"BDAT payload".to_vec(), &opts).unwrap();
        assert_eq!(entry.cache_id, 0x0a);
        assert!(is_block(&entry.data));
        assert_eq!(entry.declared_uncompressed_size, 12);
        assert_eq!(decode_block(&entry.data).unwrap(), b"BDAT payload");
        assert_eq!(entry.data[4..8], Algorithm::Zlib.id().to_le_bytes());
    }

    #[test]
    fn large_payloads_use_zstd() {
        let opts = BuildOptions { compress: true, zstd_threshold: 8, ..BuildOptions::default() };
        let entry = prepare_bytes(&src("big"), vec![3u8; 9], &opts).unwrap();
        assert_eq!(entry.data[4..8], Algorithm::Zstd.id().to_le_bytes());
    }

    #[test]
    fn existing_blocks_are_not_rewrapped() {
        let block = encode_block(b"inner", Algorithm::Zlib, "inner").unwrap();
        let opts = BuildOptions { compress: true, ..BuildOptions::default() };
        let entry = prepare_bytes(&src("1.xbc1"), block.clone(), &opts).unwrap();
        assert_eq!(entry.data, block);
        assert_eq!(entry.declared_uncompressed_size, 0);
    }

    #[test]
    fn writer_pads_to_sixteen() {
        let mut writer = ArchiveWriter::new(Vec::new());
        assert_eq!(writer.append(1, &[1u8; 10], 0).unwrap(), 0);
        assert_eq!(writer.append(2, &[2u8; 20], 0).unwrap(), 16);
        assert_eq!(writer.append(3, &[], 0).unwrap(), 48);
        let (blob, index) = writer.finish().unwrap();

        assert_eq!(blob.len(), 48);
        assert_eq!(&blob[10..16], &[0u8; 6]);
        assert_eq!(&blob[36..48], &[0u8; 12]);
        let sizes: Vec<u32> = index.entries.iter().map(|e| e.stored_size).collect();
        assert_eq!(sizes, vec![10, 20, 0]);
    }

    #[test]
    fn assemble_sorts_and_keeps_duplicates() {
        let mk = |id: u64, rel: &str, byte: u8| PreparedEntry {
            cache_id: id,
            rel_path: PathBuf::from(rel),
            data: vec![byte; 3],
            declared_uncompressed_size: 0,
        };
        let entries = vec![mk(9, "b", 1), mk(2, "z", 2), mk(9, "a", 3)];
        let mut blob = Vec::new();
        let (index, report) = assemble(entries, &mut blob).unwrap();

        let ids: Vec<u64> = index.entries.iter().map(|e| e.cache_id).collect();
        assert_eq!(ids, vec![2, 9, 9]);
        assert_eq!(report.packed, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.blob_size, 48);
        // "a" sorts before "b" within the shared id.
        assert_eq!(blob[16], 3);
        assert_eq!(blob[32], 1);
    }

    #[test]
    fn same_hex_stem_in_two_directories_packs_both() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/ff.bdat"), b"BDAT first").unwrap();
        fs::write(dir.path().join("b/ff.dds"), b"DDS second").unwrap();

        let sources = collect_sources(dir.path()).unwrap();
        let mut blob = Vec::new();
        let mut index = Vec::new();
        let report = build_archive(&sources, &BuildOptions::default(), &mut blob, &mut index).unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.packed, 2);
        assert_eq!(report.duplicates, 1);
        let parsed = ArchiveIndex::parse(&index).unwrap();
        let ids: Vec<u64> = parsed.entries.iter().map(|e| e.cache_id).collect();
        assert_eq!(ids, vec![0xff, 0xff]);
        assert_eq!(&blob[..10], b"BDAT first");
        assert_eq!(&blob[16..26], b"DDS second");
    }

    #[test]
    fn unreadable_file_is_dropped() {
        let sources = vec![SourceFile {
            path: PathBuf::from("/definitely/not/here/00ff.bin"),
            rel_path: PathBuf::from("00ff.bin"),
        }];
        let report = build_archive(&sources, &BuildOptions::default(), Vec::new(), Vec::new()).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.packed, 0);
    }
}
