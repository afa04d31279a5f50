//! RandomX command-line tool
//!
//! Usage: randomx <command> [options]
//!
//! Commands:
//!   hash     Hash an input under a key
//!   commit   Hash an input and print its commitment
//!   verify   Hash an input and compare against an expected digest
//!   bench    Hash nonce-varied block templates and report throughput
//!   item     Print one dataset item (light mode)

use std::sync::Arc;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use randomx::{calculate_commitment, Cache, Dataset, Flags, Vm, DATASET_ITEM_COUNT, HASH_SIZE};
use tracing::Level;

/// Size of a Monero block hashing blob.
const BLOCK_TEMPLATE_SIZE: usize = 76;
/// Offset of the nonce inside the hashing blob.
const NONCE_OFFSET: usize = 39;

// =============================================================================
// CLI DEFINITION
// =============================================================================

#[derive(Parser)]
#[command(name = "randomx")]
#[command(about = "RandomX proof-of-work hashing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Materialize the 2 GiB dataset instead of computing items on demand
    #[arg(long, global = true)]
    full: bool,

    /// Dataset build workers (default: available parallelism)
    #[arg(long, global = true, value_name = "N")]
    threads: Option<usize>,

    /// Use AES-NI rounds when the CPU has them
    #[arg(long, global = true, conflicts_with = "soft_aes")]
    hard_aes: bool,

    /// Force the portable AES tables
    #[arg(long, global = true)]
    soft_aes: bool,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hash of an input
    Hash {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Print the hash and the commitment Blake2b-256(input || hash)
    Commit {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Exit non-zero unless the input hashes to EXPECTED
    Verify {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        input: InputArgs,
        /// Expected digest (64 hex characters)
        #[arg(long, value_name = "HEX")]
        expected: String,
    },
    /// Hash COUNT block templates with consecutive nonces
    Bench {
        #[command(flatten)]
        key: KeyArgs,
        /// Number of hashes
        #[arg(long, default_value_t = 1000)]
        count: u32,
        /// First nonce
        #[arg(long, default_value_t = 0)]
        start_nonce: u32,
    },
    /// Print the eight words of a dataset item
    Item {
        #[command(flatten)]
        key: KeyArgs,
        /// Item number
        index: u64,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct KeyArgs {
    /// Cache key as text
    #[arg(long)]
    key: Option<String>,
    /// Cache key as hex
    #[arg(long, value_name = "HEX")]
    key_hex: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InputArgs {
    /// Input as text
    #[arg(long)]
    input: Option<String>,
    /// Input as hex
    #[arg(long, value_name = "HEX")]
    input_hex: Option<String>,
}

fn text_or_hex(text: Option<&str>, hex_text: Option<&str>, what: &str) -> Result<Vec<u8>> {
    match (text, hex_text) {
        (Some(text), _) => Ok(text.as_bytes().to_vec()),
        (None, Some(hex_text)) => hex::decode(hex_text).with_context(|| format!("invalid {what} hex")),
        (None, None) => anyhow::bail!("missing {what}"),
    }
}

impl KeyArgs {
    fn bytes(&self) -> Result<Vec<u8>> {
        text_or_hex(self.key.as_deref(), self.key_hex.as_deref(), "key")
    }
}

impl InputArgs {
    fn bytes(&self) -> Result<Vec<u8>> {
        text_or_hex(self.input.as_deref(), self.input_hex.as_deref(), "input")
    }
}

impl Cli {
    fn flags(&self) -> Flags {
        let mut flags = Flags::recommended();
        if self.hard_aes {
            flags |= Flags::HARD_AES;
        }
        if self.soft_aes {
            flags = flags & !Flags::HARD_AES;
        }
        if self.full {
            flags |= Flags::FULL_MEM;
        }
        flags
    }

    fn threads(&self) -> usize {
        self.threads
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}

fn format_duration(secs: f64) -> String {
    let whole = secs as u64;
    let minutes = whole / 60;
    if minutes > 0 {
        format!("{}m {:.1}s", minutes, secs - (minutes * 60) as f64)
    } else {
        format!("{secs:.3}s")
    }
}

fn init_cache(flags: Flags, key: &[u8]) -> Result<Arc<Cache>> {
    let mut cache = Cache::new(flags).context("allocating cache")?;
    cache.init(key).context("initializing cache")?;
    Ok(Arc::new(cache))
}

/// Builds a VM for `key` in the mode selected by `flags`.
fn build_vm(flags: Flags, key: &[u8], threads: usize) -> Result<Vm> {
    let started = Instant::now();
    let cache = init_cache(flags, key)?;

    let vm = if flags.contains(Flags::FULL_MEM) {
        let mut dataset = Dataset::new(flags, cache).context("allocating dataset")?;
        tracing::info!(
            items = %format_number(dataset.item_count()),
            threads,
            "building dataset"
        );
        dataset.build_parallel(threads).context("building dataset")?;
        Vm::new(flags, None, Some(Arc::new(dataset)))
    } else {
        Vm::new(flags, Some(cache), None)
    }
    .context("creating vm")?;

    tracing::info!(elapsed = %format_duration(started.elapsed().as_secs_f64()), ?flags, "vm ready");
    Ok(vm)
}

fn parse_digest(text: &str) -> Result<[u8; HASH_SIZE]> {
    let bytes = hex::decode(text.trim()).context("invalid expected hex")?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("expected {HASH_SIZE} bytes, got {}", bytes.len()))
}

// =============================================================================
// COMMANDS
// =============================================================================

fn bench(vm: &mut Vm, count: u32, start_nonce: u32) {
    let mut template = [0u8; BLOCK_TEMPLATE_SIZE];
    let mut combined = [0u8; HASH_SIZE];

    let end = start_nonce.saturating_add(count);
    let hashes = end - start_nonce;
    let started = Instant::now();
    for nonce in start_nonce..end {
        template[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
        let hash = vm.calculate_hash(&template);
        for (c, h) in combined.iter_mut().zip(hash) {
            *c ^= h;
        }
    }
    let elapsed = started.elapsed().as_secs_f64();

    println!("hashes:   {}", format_number(u64::from(hashes)));
    println!("elapsed:  {}", format_duration(elapsed));
    println!("rate:     {:.2} H/s", f64::from(hashes) / elapsed.max(f64::EPSILON));
    println!("combined: {}", hex::encode(combined));
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let flags = cli.flags();
    let threads = cli.threads();

    match &cli.command {
        Commands::Hash { key, input } => {
            let mut vm = build_vm(flags, &key.bytes()?, threads)?;
            println!("{}", hex::encode(vm.calculate_hash(&input.bytes()?)));
        }
        Commands::Commit { key, input } => {
            let input = input.bytes()?;
            let mut vm = build_vm(flags, &key.bytes()?, threads)?;
            let hash = vm.calculate_hash(&input);
            println!("hash:       {}", hex::encode(hash));
            println!("commitment: {}", hex::encode(calculate_commitment(&input, &hash)));
        }
        Commands::Verify { key, input, expected } => {
            let expected = parse_digest(expected)?;
            let mut vm = build_vm(flags, &key.bytes()?, threads)?;
            let hash = vm.calculate_hash(&input.bytes()?);
            ensure!(
                hash == expected,
                "hash mismatch: expected {}, got {}",
                hex::encode(expected),
                hex::encode(hash)
            );
            println!("OK {}", hex::encode(hash));
        }
        Commands::Bench { key, count, start_nonce } => {
            let mut vm = build_vm(flags, &key.bytes()?, threads)?;
            bench(&mut vm, *count, *start_nonce);
        }
        Commands::Item { key, index } => {
            ensure!(
                *index < DATASET_ITEM_COUNT,
                "item {index} out of range (dataset has {} items)",
                format_number(DATASET_ITEM_COUNT)
            );
            let cache = init_cache(flags & !Flags::FULL_MEM, &key.bytes()?)?;
            for (i, word) in cache.dataset_item(*index).iter().enumerate() {
                println!("r{i}: {word:#018x}");
            }
        }
    }

    Ok(())
}
