//! pharbox command line entry point.
//!
//! Thin wrapper around the pharbox library that:
//! 1. Parses command-line arguments
//! 2. Initializes logging
//! 3. Loads the build configuration
//! 4. Runs the requested command

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pharbox::{BuildConfig, ProcessComposer, compile};
use pharbox_crypto::PublicKey;
use pharbox_formats::phar::Phar;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pharbox",
    about = "Package PHP applications into PHAR archives",
    version,
    author,
    long_about = "Builds a single self-contained PHAR archive from a PHP application and its \
                  Composer dependencies, as described by a box.json file."
)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the archive
    Compile {
        /// Configuration file (default: box.json, then box.json.dist)
        #[arg(short, long, env = "PHARBOX_CONFIG")]
        config: Option<PathBuf>,

        /// Process files sequentially
        #[arg(long)]
        no_parallel: bool,

        /// Directory to build from
        #[arg(short = 'd', long)]
        working_dir: Option<PathBuf>,

        /// Composer executable
        #[arg(long, env = "PHARBOX_COMPOSER_BIN", default_value = "composer")]
        composer_bin: PathBuf,
    },

    /// Check the signature of an archive
    Verify {
        /// Archive to check
        phar: PathBuf,

        /// Public key for OpenSSL signatures (default: <phar>.pubkey)
        #[arg(long)]
        pubkey: Option<PathBuf>,
    },

    /// Show the contents of an archive
    Info {
        /// Archive to inspect
        phar: PathBuf,

        /// List every entry
        #[arg(short, long)]
        list: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Compile {
            config,
            no_parallel,
            working_dir,
            composer_bin,
        } => run_compile(config, no_parallel, working_dir, composer_bin),
        Commands::Verify { phar, pubkey } => run_verify(&phar, pubkey.as_deref()),
        Commands::Info { phar, list } => run_info(&phar, list),
    }
}

fn run_compile(
    config: Option<PathBuf>,
    no_parallel: bool,
    working_dir: Option<PathBuf>,
    composer_bin: PathBuf,
) -> Result<()> {
    let working_dir = match working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Cannot determine the working directory")?,
    };

    let config_path = match config {
        Some(path) => Some(working_dir.join(path)),
        None => BuildConfig::find(&working_dir),
    };
    let mut config = match &config_path {
        Some(path) => BuildConfig::load(path)
            .with_context(|| format!("Cannot load the configuration {}", path.display()))?,
        None => {
            tracing::info!("No configuration file found, using the defaults");
            BuildConfig::defaults(&working_dir)?
        }
    };
    if no_parallel {
        config.parallel = false;
    }

    let vendor_dir = pharbox::ComposerFiles::load(&config.base_path)?.vendor_dir();
    let composer = ProcessComposer::new(composer_bin, vendor_dir);

    let report = compile(&config, &composer)
        .with_context(|| format!("Cannot build {}", config.output.display()))?;

    println!(
        "Built {} ({} entries, {} signature, compression {})",
        report.output.display(),
        report.entry_count,
        report.signature,
        report.compression
    );
    if let Some(extension) = report.required_extension {
        println!("The archive needs the PHP extension \"{extension}\" at runtime");
    }
    Ok(())
}

fn run_verify(path: &Path, pubkey: Option<&Path>) -> Result<()> {
    let phar = Phar::open(path).with_context(|| format!("Cannot open {}", path.display()))?;

    let key = pubkey
        .map(|key_path| -> Result<PublicKey> {
            let pem = fs::read_to_string(key_path)
                .with_context(|| format!("Cannot read {}", key_path.display()))?;
            Ok(PublicKey::from_pem(&pem)?)
        })
        .transpose()?;

    match phar.verify(key.as_ref()) {
        Ok(signature) => {
            println!(
                "{}: {} signature OK ({})",
                path.display(),
                signature.kind,
                signature.hash_hex()
            );
            Ok(())
        }
        Err(e) => bail!("{}: signature check failed: {e}", path.display()),
    }
}

fn run_info(path: &Path, list: bool) -> Result<()> {
    let phar = Phar::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let file = phar.file();

    println!("Archive: {}", path.display());
    println!("Alias: {}", phar.alias());
    println!("Entries: {}", phar.count());
    match &file.signature {
        Some(signature) => println!("Signature: {}", signature.kind),
        None => println!("Signature: none"),
    }

    let compressed = phar.entries().filter(|entry| entry.is_compressed()).count();
    let mut algorithms: Vec<String> = phar
        .entries()
        .filter(|entry| entry.is_compressed())
        .map(|entry| entry.compression.to_string())
        .collect();
    algorithms.sort();
    algorithms.dedup();
    if algorithms.is_empty() {
        println!("Compression: none");
    } else {
        println!(
            "Compression: {} ({compressed} of {} entries)",
            algorithms.join(", "),
            phar.count()
        );
    }
    println!("Metadata: {} bytes", phar.metadata().len());

    if list {
        for entry in phar.entries() {
            println!(
                "  {:<60} {:>10} {:o}",
                entry.name,
                entry.contents.len(),
                entry.permissions
            );
        }
    }
    Ok(())
}
