use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::xxh3_64;

use fscodec_codecs::{registered, transform_for, ChaChaService, MasterKey};
use fscodec_core::{
    blocks_for_len, BlockBuffer, CompressionAlgorithm, ConfidentialityService, EncodedExtent,
    ExtentTransform, FileContext, LogicalRange, MemCache, ReadRequest, TransformConfig,
    TransformKind, PAGE_SIZE,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fscodec",
    about = "Run files through fscodec extent transforms (per-block encryption, lz4, zstd)",
    version
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file as one extent and write the stored blocks
    Encode {
        /// Plaintext file ("-" reads stdin)
        input: PathBuf,
        /// Destination for the stored bytes
        output: PathBuf,
        #[command(flatten)]
        opts: TransformOpts,
    },
    /// Decode stored bytes back into plaintext through a read request
    Decode {
        /// Stored extent bytes
        input: PathBuf,
        /// Plaintext destination ("-" writes to stdout)
        output: PathBuf,
        /// Plaintext length; required for compressed extents
        #[arg(short, long)]
        len: Option<usize>,
        #[command(flatten)]
        opts: TransformOpts,
    },
    /// List the registered extent transforms
    Transforms,
}

#[derive(Args)]
struct TransformOpts {
    /// Transform to use: encrypt | zstd | lz4
    #[arg(short, long, default_value = "encrypt")]
    transform: String,
    /// Zstd compression level (only used with --transform zstd)
    #[arg(long, default_value_t = 3)]
    zstd_level: i32,
    /// Filesystem block size; must equal the page size
    #[arg(short, long, default_value_t = PAGE_SIZE)]
    block_size: usize,
    /// Inode number the extent belongs to (selects the per-file key)
    #[arg(long, default_value_t = 1)]
    ino: u64,
    /// Passphrase for the encrypt transform
    #[arg(long, env = "FSCODEC_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn kind_from_name(name: &str, zstd_level: i32) -> anyhow::Result<TransformKind> {
    match name {
        "encrypt" | "crypt" | "e" => Ok(TransformKind::Encrypt),
        "zstd" | "z" => Ok(TransformKind::Compress(CompressionAlgorithm::Zstd {
            level: zstd_level,
        })),
        "lz4" | "l" => Ok(TransformKind::Compress(CompressionAlgorithm::Lz4)),
        other => anyhow::bail!(
            "unknown transform '{}'. Valid options: encrypt, zstd, lz4",
            other
        ),
    }
}

fn build_transform(opts: &TransformOpts) -> anyhow::Result<Arc<dyn ExtentTransform>> {
    let kind = kind_from_name(&opts.transform, opts.zstd_level)?;
    let service: Option<Arc<dyn ConfidentialityService>> = match (&kind, &opts.passphrase) {
        (TransformKind::Encrypt, Some(passphrase)) => {
            let master = MasterKey::from_passphrase(passphrase.as_bytes())?;
            let service: Arc<dyn ConfidentialityService> = Arc::new(ChaChaService::new(master));
            Some(service)
        }
        (TransformKind::Encrypt, None) => {
            anyhow::bail!("the encrypt transform needs --passphrase or FSCODEC_PASSPHRASE")
        }
        _ => None,
    };
    let config = TransformConfig::new(opts.block_size);
    Ok(transform_for(kind, config, service)?)
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    if path.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(path)
            .with_context(|| format!("opening input file {:?}", path))?
            .read_to_end(&mut data)?;
    }
    Ok(data)
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if path.to_str() == Some("-") {
        io::stdout().lock().write_all(bytes)?;
    } else {
        std::fs::write(path, bytes).with_context(|| format!("writing output file {:?}", path))?;
    }
    Ok(())
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Concatenate the used bytes of an encoded extent's blocks.
fn stored_bytes(encoded: &EncodedExtent) -> Vec<u8> {
    let mut stored = Vec::with_capacity(encoded.bytes_out);
    for block in &encoded.blocks {
        let take = (encoded.bytes_out - stored.len()).min(PAGE_SIZE);
        stored.extend_from_slice(&block.as_slice()[..take]);
    }
    stored
}

/// Decode `stored` into `plain_len` bytes of plaintext for file `ctx`.
///
/// An empty extent maps no destination blocks, so there is nothing to hand
/// to the streaming decoder.
fn decode_extent(
    transform: &dyn ExtentTransform,
    ctx: FileContext,
    stored: &[u8],
    plain_len: usize,
) -> anyhow::Result<Vec<u8>> {
    if plain_len == 0 {
        debug!("empty extent, skipping decode");
        return Ok(Vec::new());
    }
    let mut blocks = stored
        .chunks(PAGE_SIZE)
        .enumerate()
        .map(|(i, chunk)| BlockBuffer::from_bytes(None, i as u64, chunk))
        .collect::<Result<Vec<_>, _>>()?;

    let mut request = ReadRequest::for_range(ctx, LogicalRange::new(0, plain_len));
    transform.decode_stream(&mut blocks, 0, &mut request, stored.len())?;
    Ok(request.contents())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_encode(input: PathBuf, output: PathBuf, opts: TransformOpts) -> anyhow::Result<()> {
    let transform = build_transform(&opts)?;
    let ctx = FileContext::new(opts.ino);
    let data = read_input(&input)?;

    let mut cache = MemCache::new();
    cache.populate(ctx, 0, &data)?;
    debug!(blocks = cache.len(), "loaded plaintext into buffer cache");

    let range = LogicalRange::new(0, data.len());
    // Compressed frames carry a small header, so incompressible input may need one extra block.
    let capacity = range.block_count() + 1;

    let t0 = Instant::now();
    let encoded = transform
        .encode(&ctx, &cache, range, capacity)
        .with_context(|| format!("encoding {:?}", input))?;
    let elapsed = t0.elapsed();

    let stored = stored_bytes(&encoded);
    write_output(&output, &stored)?;

    eprintln!("  transform   : {}", transform.name());
    eprintln!("  blocks      : {}", encoded.blocks.len());
    eprintln!("  bytes in    : {}", human_bytes(encoded.bytes_in as u64));
    eprintln!("  bytes out   : {}", human_bytes(encoded.bytes_out as u64));
    eprintln!("  plaintext   : xxh3 {:016x}", xxh3_64(&data));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decode(
    input: PathBuf,
    output: PathBuf,
    len: Option<usize>,
    opts: TransformOpts,
) -> anyhow::Result<()> {
    let transform = build_transform(&opts)?;
    let ctx = FileContext::new(opts.ino);
    let stored = read_input(&input)?;

    let plain_len = match len {
        Some(len) => len,
        None if transform.kind().is_length_preserving() => stored.len(),
        None => anyhow::bail!(
            "--len is required to decode a {} extent",
            transform.name()
        ),
    };

    let t0 = Instant::now();
    let plaintext = decode_extent(transform.as_ref(), ctx, &stored, plain_len)
        .with_context(|| format!("decoding {:?}", input))?;
    let elapsed = t0.elapsed();
    write_output(&output, &plaintext)?;

    eprintln!("  transform   : {}", transform.name());
    eprintln!("  blocks      : {}", blocks_for_len(stored.len()));
    eprintln!(
        "  plaintext   : {} xxh3 {:016x}",
        human_bytes(plaintext.len() as u64),
        xxh3_64(&plaintext)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_transforms() -> anyhow::Result<()> {
    println!("  {:>4}  {:<8}  {:<16}  {}", "id", "name", "length-preserving", "workspace");
    println!("  {}", "-".repeat(44));
    for kind in registered() {
        println!(
            "  {:>4}  {:<8}  {:<16}  {}",
            kind.id(),
            kind.name(),
            kind.is_length_preserving(),
            kind.has_workspace()
        );
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Encode {
            input,
            output,
            opts,
        } => run_encode(input, output, opts),
        Commands::Decode {
            input,
            output,
            len,
            opts,
        } => run_decode(input, output, len, opts),
        Commands::Transforms => run_transforms(),
    }
}
