//! Command-line interface for the archive engine.
//!
//! Runs one create, extract, repair or probe per invocation. The engine call
//! itself runs on a blocking worker while the async side drives the progress
//! bar; Ctrl-C requests cancellation at the next entry boundary.

use archive_engine::{
    ArchiveEngine, ArchiveInfo, ArchiveOperation, EngineConfig, EngineError, OperationKind,
    OperationOutcome, PathSource,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Resolution of the progress bar.
const BAR_TICKS: u64 = 1000;

#[derive(Parser)]
#[command(name = "archiver")]
#[command(version, about = "Create, extract and repair archives", long_about = None)]
struct Cli {
    /// Engine settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into a new archive; the format follows the output name
    Create {
        /// Files to add
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Archive to write
        #[arg(short, long)]
        out: PathBuf,

        /// Encrypt every entry with AES-256 (ZIP only)
        #[arg(long, env = "ARCHIVER_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Split the archive into volumes of this many bytes (ZIP only)
        #[arg(long, default_value = "0")]
        split_size: u64,

        /// Compression level 0-9, 0 stores entries uncompressed
        #[arg(long)]
        level: Option<u32>,
    },

    /// Extract an archive, or the ordered volumes of a split archive
    Extract {
        /// Archive file, or every volume in order
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Password for encrypted archives
        #[arg(long, env = "ARCHIVER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Recover what can be read from a damaged ZIP
    Repair {
        /// Damaged archive
        archive: PathBuf,

        /// Directory for recovered files
        #[arg(short, long)]
        out: PathBuf,

        /// Also write a clean archive of the recovered files here
        #[arg(long)]
        rebuild: Option<PathBuf>,

        /// Password for encrypted archives
        #[arg(long, env = "ARCHIVER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Probe archive metadata
    Probe {
        /// Archive file to probe
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => dispatch(ArchiveEngine::new(config), cli.command).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        match e.downcast_ref::<EngineError>() {
            Some(engine_err) => eprintln!("Error ({:?}): {}", engine_err.kind(), engine_err),
            None => eprintln!("Error: {}", e),
        }
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading engine config");
            Ok(EngineConfig::from_toml_file(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

async fn dispatch(
    engine: ArchiveEngine,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Create {
            inputs,
            out,
            password,
            split_size,
            level,
        } => {
            let level = level.unwrap_or(engine.config().default_compression_level);
            let op = ArchiveOperation::builder(OperationKind::Create)
                .inputs(inputs.into_iter().map(PathSource::shared))
                .output(out)
                .password(password)
                .split_size(split_size)
                .compression_level(level)
                .build()?;
            handle_operation(engine, op).await
        }
        Commands::Extract {
            archives,
            out,
            password,
        } => {
            let op = ArchiveOperation::builder(OperationKind::Extract)
                .inputs(archives.into_iter().map(PathSource::shared))
                .output(out)
                .password(password)
                .build()?;
            handle_operation(engine, op).await
        }
        Commands::Repair {
            archive,
            out,
            rebuild,
            password,
        } => {
            let mut builder = ArchiveOperation::builder(OperationKind::Repair)
                .input(PathSource::shared(archive))
                .output(out)
                .password(password);
            if let Some(rebuild) = rebuild {
                builder = builder.rebuild_to(rebuild);
            }
            handle_operation(engine, builder.build()?).await
        }
        Commands::Probe { archive, json } => handle_probe(&engine, &archive, json),
    }
}

/// Run `op` on a blocking worker, mirroring its progress onto a bar.
async fn handle_operation(
    engine: ArchiveEngine,
    mut op: ArchiveOperation,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            warn!("Cancellation requested, stopping after the current entry");
        }
    })?;

    let (tx, mut rx) = watch::channel(0.0f32);
    let worker = tokio::task::spawn_blocking(move || {
        let progress = move |fraction: f32| {
            // the receiver only goes away once the bar is torn down
            let _ = tx.send(fraction);
        };
        let result = engine.run(&mut op, &progress, cancel);
        debug!(id = op.id(), status = ?op.status, progress = op.progress, "Operation finished");
        result
    });

    let bar = progress_bar();
    while rx.changed().await.is_ok() {
        let fraction = *rx.borrow_and_update();
        bar.set_position((fraction * BAR_TICKS as f32) as u64);
    }

    let outcome = worker.await?;
    match &outcome {
        Ok(_) => bar.finish(),
        Err(_) => bar.abandon(),
    }
    report(&outcome?);
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_TICKS);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn report(outcome: &OperationOutcome) {
    match outcome {
        OperationOutcome::Created(summary) => {
            println!(
                "Created {} entries ({} bytes) in {:.2?}",
                summary.entries.len(),
                summary.bytes_read,
                summary.duration
            );
            for output in &summary.outputs {
                println!("  {}", output.display());
            }
        }
        OperationOutcome::Extracted(stats) => {
            println!(
                "Extracted {} files ({} bytes) in {:.2?}",
                stats.files_extracted, stats.bytes_written, stats.duration
            );
        }
        OperationOutcome::Repaired(result) => {
            let mode = if result.salvaged {
                "salvaged from local headers"
            } else {
                "archive was intact"
            };
            println!(
                "Recovered {} entries, skipped {} ({})",
                result.recovered.len(),
                result.skipped,
                mode
            );
            if let Some(rebuilt) = &result.rebuilt_archive {
                println!("Clean archive: {}", rebuilt.display());
            }
        }
    }
}

fn handle_probe(
    engine: &ArchiveEngine,
    archive: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = engine.probe(&PathSource::new(archive))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(archive, &info);
    }
    Ok(())
}

fn print_info(archive: &Path, info: &ArchiveInfo) {
    println!("Archive:      {}", archive.display());
    println!("Format:       {}", info.format);
    println!("Entries:      {}", info.entries);
    println!("Compressed:   {} bytes", info.compressed_bytes);
    println!("Uncompressed: {} bytes", info.uncompressed_bytes);
    println!("Encrypted:    {}", if info.encrypted { "yes" } else { "no" });

    for entry in &info.entry_list {
        let marker = if entry.is_directory { "d" } else { "-" };
        println!("  {} {:>12}  {}", marker, entry.size, entry.path);
    }
}
