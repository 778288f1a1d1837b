use clap::{Parser, Subcommand};
use ardpack::block::{compress_file, decompress_file};
use ardpack::build::{build_from_dir, BuildOptions};
use ardpack::codec::{Algorithm, DEFAULT_ZSTD_THRESHOLD};
use ardpack::content::ContentKind;
use ardpack::extract::{open_archive, DirectorySink, ExtractOptions};
use ardpack::index::ArchiveIndex;
use ardpack::layout::blob_len;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "ardpack", about = "ARH/ARD archive packer and xbc1 block tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log per-entry details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an ARD blob and ARH index from a directory
    Pack {
        input: PathBuf,
        /// Output blob (.ard)
        #[arg(long)]
        ard: PathBuf,
        /// Output index (.arh)
        #[arg(long)]
        arh: PathBuf,
        /// Wrap every file in an xbc1 block
        #[arg(short, long)]
        compress: bool,
        /// Payloads larger than this many bytes use zstd instead of zlib
        #[arg(long, default_value_t = DEFAULT_ZSTD_THRESHOLD)]
        zstd_threshold: usize,
        /// Worker threads (default: all cores)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract every entry of an ARD blob using its ARH index
    Unpack {
        ard: PathBuf,
        arh: PathBuf,
        /// Defaults to `<ard stem>_extracted`
        #[arg(short = 'C', long)]
        output_dir: Option<PathBuf>,
        /// Only save entries of this kind (bdat, dds, png, xbc1, dec, failed)
        #[arg(long)]
        only: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List index records with their replayed blob offsets
    List {
        arh: PathBuf,
    },
    /// Wrap a single file in an xbc1 block
    Compress {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Algorithm: zlib (1, default) or zstd (3)
        #[arg(short, long, default_value = "zlib")]
        algorithm: String,
        /// Name stored in the header (max 27 characters)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Unwrap a single xbc1 block
    Decompress {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, ard, arh, compress, zstd_threshold, threads, json } => {
            let opts = BuildOptions { compress, zstd_threshold, threads };
            let report = build_from_dir(&input, &ard, &arh, &opts)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            info!("Created ARD archive: {}", ard.display());
            info!("Created ARH file: {}", arh.display());
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { ard, arh, output_dir, only, json } => {
            let only = only.as_deref().map(parse_kind).transpose()?;
            let output_dir = output_dir.unwrap_or_else(|| default_output_dir(&ard));
            let mut sink = DirectorySink::create(&output_dir)?;
            let mut extractor = open_archive(&arh, &ard, ExtractOptions { only })?;
            let report = extractor.extract_all(&mut sink);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            info!(
                "Done: {} processed, {} saved, {} skipped, {} failed -> {}",
                report.entries, report.saved, report.skipped, report.failed,
                output_dir.display()
            );
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { arh } => {
            let index = ArchiveIndex::parse(&std::fs::read(&arh)?)?;
            println!("Index: {} ({} entries)", arh.display(), index.len());
            println!("{:<18} {:>12} {:>12} {:>12}", "Cache id", "Offset", "Stored", "Declared");
            for (offset, e) in index.offsets() {
                println!("{:016x}   {:>12} {:>12} {:>12}",
                    e.cache_id, offset, e.stored_size, e.declared_uncompressed_size);
            }
            println!("Expected blob size: {} B", blob_len(&index.entries));
        }

        // ── Compress ─────────────────────────────────────────────────────────
        Commands::Compress { input, output, algorithm, name } => {
            let algorithm = Algorithm::from_name(&algorithm)
                .ok_or_else(|| format!("unknown algorithm '{algorithm}' (expected zlib or zstd)"))?;
            compress_file(&input, output.as_deref(), algorithm, name.as_deref())?;
        }

        // ── Decompress ───────────────────────────────────────────────────────
        Commands::Decompress { input, output } => {
            decompress_file(&input, output.as_deref())?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_kind(s: &str) -> Result<ContentKind, String> {
    ContentKind::from_name(s).ok_or_else(|| format!("unknown entry kind '{s}'"))
}

fn default_output_dir(ard: &Path) -> PathBuf {
    let mut name = ard.file_stem().unwrap_or_default().to_os_string();
    name.push("_extracted");
    ard.with_file_name(name)
}
