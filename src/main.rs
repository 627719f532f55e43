//! cryptdump - Decrypted image dumper for encrypted Mach-O binaries.
//!
//! Inspect and patch single images, or dump every application image of a
//! recorded process snapshot.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cryptdump::dump::{
    discover, BatchResult, Capabilities, DumpOptions, Dumper, FallbackPolicy, FileWriter,
};
use cryptdump::host::{
    ipa_path_for, package_ipa, FlatImage, LocalFs, Snapshot, DEFAULT_CHUNK_SIZE,
};
use cryptdump::macho::MachHeader;
use cryptdump::patch::{
    layout_file_size, locate_encryption_with, merge_from_live, patch_crypt_id, segment_mappings,
    EncryptionState,
};
use cryptdump::util::format_size;

/// Decrypted image dumper for encrypted Mach-O binaries.
#[derive(Parser, Debug)]
#[command(name = "cryptdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, default_value = "1", global = true)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the header, load commands and encryption state of an image
    Info {
        /// Mach-O file to inspect
        file: PathBuf,
    },

    /// Clear cryptid of an image without decrypting it
    Patch {
        /// Mach-O file to patch
        file: PathBuf,

        /// Output path (default: <file>.patched)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a raw memory copy of a loaded image into its on-disk file
    Merge {
        /// On-disk image
        #[arg(long)]
        disk: PathBuf,

        /// Raw copy of the loaded image, starting at its Mach-O header
        #[arg(long)]
        memory: PathBuf,

        /// Output path (default: <disk>.decrypted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the application images of a snapshot
    List {
        /// Snapshot manifest
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Dump one image from a snapshot
    Dump {
        /// Snapshot manifest
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Device path of the image (e.g., "/var/containers/Bundle/Application/X/App.app/App")
        image: String,

        #[command(flatten)]
        dump: DumpArgs,
    },

    /// Dump every application image of a snapshot
    DumpAll {
        /// Snapshot manifest
        #[arg(short, long)]
        snapshot: PathBuf,

        #[command(flatten)]
        dump: DumpArgs,

        /// Print the batch result as JSON
        #[arg(long)]
        json: bool,

        /// Also package the bundle with the dumps swapped in as <output-dir>/<App>_decrypted.ipa
        #[arg(long)]
        ipa: bool,

        /// Local copy of the app bundle (default: the device bundle path below --disk-root)
        #[arg(long, requires = "ipa")]
        bundle: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Directory to write dumps to (default: system temp directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Local directory holding a copy of the device filesystem
    #[arg(long)]
    disk_root: Option<PathBuf>,

    /// cryptid handling for images dumped from memory only
    #[arg(long, value_enum, default_value_t = FallbackArg::Verbatim)]
    fallback: FallbackArg,

    /// Largest single write in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FallbackArg {
    /// Write the mapped image as read
    Verbatim,
    /// Zero cryptid in the mapped image
    #[value(name = "clear-cryptid")]
    ClearCryptId,
}

impl From<FallbackArg> for FallbackPolicy {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Verbatim => FallbackPolicy::Verbatim,
            FallbackArg::ClearCryptId => FallbackPolicy::ClearCryptId,
        }
    }
}

/// Where to find the bundle to package after a batch.
#[derive(Debug)]
struct PackageArgs {
    bundle: Option<PathBuf>,
}

impl DumpArgs {
    fn options(&self) -> DumpOptions {
        let mut options = DumpOptions::default().with_fallback_policy(self.fallback.into());
        if let Some(dir) = &self.output_dir {
            options = options.with_output_dir(dir);
        }
        options
    }

    fn files(&self) -> LocalFs {
        let mut files = LocalFs::new().with_chunk_size(self.chunk_size);
        if let Some(root) = &self.disk_root {
            files = files.with_root(root);
        }
        files
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Info { file } => cmd_info(&file),
        Commands::Patch { file, output } => cmd_patch(&file, output),
        Commands::Merge {
            disk,
            memory,
            output,
        } => cmd_merge(&disk, &memory, output),
        Commands::List { snapshot, json } => cmd_list(&snapshot, json),
        Commands::Dump {
            snapshot,
            image,
            dump,
        } => cmd_dump(&snapshot, &image, &dump),
        Commands::DumpAll {
            snapshot,
            dump,
            json,
            ipa,
            bundle,
        } => {
            let package = ipa.then_some(PackageArgs { bundle });
            cmd_dump_all(&snapshot, &dump, json, package.as_ref())
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Appends `.suffix` to the file name of `path`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn cmd_info(file: &Path) -> Result<()> {
    let data = read_file(file)?;
    let source = data.as_slice();

    let header = MachHeader::parse(source)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    println!("Mach-O Image Information");
    println!("========================");
    println!("Path:          {}", file.display());
    println!("Size:          {}", format_size(data.len() as u64));
    println!("Header:        {}", header);
    println!("Load commands: {} ({} bytes)", header.ncmds, header.sizeofcmds);

    println!("\nLoad commands:");
    for record in header.load_commands(source) {
        match record {
            Ok(record) => println!(
                "  [{:2}] {:#06x} {:<28} {:>6} bytes",
                record.index,
                record.offset,
                record.name(),
                record.cmdsize
            ),
            Err(e) => {
                println!("  <{}>", e);
                break;
            }
        }
    }

    let segments = segment_mappings(source)?;
    if !segments.is_empty() {
        println!("\nSegments:");
        for seg in &segments {
            println!("  {}", seg);
        }
    }

    println!("\nEncryption:");
    match locate_encryption_with(&header, source)? {
        EncryptionState::Absent => println!("  none"),
        EncryptionState::Decrypted(info) => println!("  decrypted: {}", info),
        EncryptionState::Encrypted(info) => println!("  encrypted: {}", info),
    }

    match layout_file_size(source)? {
        Some(size) => println!("\nLayout size:   {:#x} ({})", size, format_size(size)),
        None => println!("\nLayout size:   undetermined"),
    }

    Ok(())
}

fn cmd_patch(file: &Path, output: Option<PathBuf>) -> Result<()> {
    let mut data = read_file(file)?;

    let state = patch_crypt_id(&mut data)
        .with_context(|| format!("Failed to patch {}", file.display()))?;
    let info = match state {
        EncryptionState::Absent => bail!("No encryption info found in {}", file.display()),
        EncryptionState::Decrypted(_) => {
            println!("Already decrypted (cryptid = 0), nothing written");
            return Ok(());
        }
        EncryptionState::Encrypted(info) => info,
    };

    let output = output.unwrap_or_else(|| with_suffix(file, "patched"));
    LocalFs::new()
        .write_all(&output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("cryptid {} -> 0 ({})", info.crypt_id, info);
    println!("Patched file written to {}", output.display());
    Ok(())
}

fn cmd_merge(disk_path: &Path, memory_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let mut disk = read_file(disk_path)?;
    let memory = FlatImage::open(memory_path, 0)
        .with_context(|| format!("Failed to open {}", memory_path.display()))?;
    info!(
        "Memory copy {} ({})",
        memory_path.display(),
        format_size(memory.len() as u64)
    );

    let state = merge_from_live(&mut disk, &memory, memory.base())
        .with_context(|| format!("Failed to merge into {}", disk_path.display()))?;
    match state {
        EncryptionState::Absent => warn!("No encryption info, writing disk image as-is"),
        EncryptionState::Decrypted(_) => warn!("Already decrypted, writing disk image as-is"),
        EncryptionState::Encrypted(info) => info!("Merged window {}", info),
    }

    let output = output.unwrap_or_else(|| with_suffix(disk_path, "decrypted"));
    LocalFs::new()
        .write_all(&output, &disk)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Decrypted file written to {}", output.display());
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    Snapshot::load(path).with_context(|| format!("Failed to load snapshot: {}", path.display()))
}

fn cmd_list(snapshot_path: &Path, json: bool) -> Result<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    let app = discover(&snapshot)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&app)?);
        return Ok(());
    }

    match &app.bundle_root {
        Some(root) => println!("Bundle: {}", root.display()),
        None => println!("Bundle: <unknown>"),
    }
    for image in &app.images {
        println!(
            "{:#018x}  {:>8}  {}",
            image.base_address,
            format_size(image.mapped_size),
            image.path
        );
    }

    Ok(())
}

fn cmd_dump(snapshot_path: &Path, image: &str, args: &DumpArgs) -> Result<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    let files = args.files();
    let dumper = Dumper::new(Capabilities::new(&snapshot, &files), args.options());

    let result = dumper.dump_image(image);
    match (&result.output_path, &result.outcome) {
        (Some(path), outcome) => {
            if result.is_fallback() {
                warn!("{} was dumped from memory only", result.name);
            }
            println!("{}: {:?}", result.name, outcome);
            println!("Dumped to {}", path.display());
            Ok(())
        }
        (None, outcome) => bail!("Failed to dump {}: {:?}", image, outcome),
    }
}

fn cmd_package(
    batch: &BatchResult,
    files: &LocalFs,
    output_dir: &Path,
    package: &PackageArgs,
) -> Result<()> {
    let bundle_dir = match (&package.bundle, &batch.bundle_root) {
        (Some(dir), _) => dir.clone(),
        (None, Some(root)) => files.resolve(root),
        (None, None) => bail!("No bundle directory known; pass --bundle"),
    };

    let ipa_path = ipa_path_for(output_dir, &bundle_dir);
    let report = package_ipa(&bundle_dir, batch, &ipa_path)
        .with_context(|| format!("Failed to package {}", bundle_dir.display()))?;

    if !report.missing.is_empty() {
        warn!(
            "{} dumped images had no counterpart in {}",
            report.missing.len(),
            bundle_dir.display()
        );
    }
    println!(
        "Packaged {} ({} entries, {} decrypted)",
        report.ipa_path.display(),
        report.entries,
        report.replaced.len()
    );
    Ok(())
}

fn cmd_dump_all(
    snapshot_path: &Path,
    args: &DumpArgs,
    json: bool,
    package: Option<&PackageArgs>,
) -> Result<()> {
    let start = Instant::now();

    let snapshot = load_snapshot(snapshot_path)?;
    let files = args.files();
    let dumper = Dumper::new(Capabilities::new(&snapshot, &files), args.options());

    let app = dumper.list_images()?;
    if app.images.is_empty() {
        warn!("No application images found");
    }

    info!(
        "Dumping {} images to {}",
        app.images.len(),
        dumper.options().output_dir.display()
    );

    // Setup progress bar
    let progress = ProgressBar::new(app.images.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let batch = dumper.dump_images(&app, |result| {
        progress.set_message(result.name.clone());
        progress.inc(1);
    });

    progress.finish_with_message("Done");

    if json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    } else {
        for path in &batch.dumped_files {
            println!("{}", path.display());
        }
    }

    let failed: Vec<_> = batch.modules.iter().filter(|m| !m.success()).collect();
    if !failed.is_empty() {
        warn!("{} images failed to dump:", failed.len());
        for result in &failed {
            error!("  {}: {:?}", result.original_path, result.outcome);
        }
    }

    info!(
        "Dumped {}/{} images ({} from memory only) in {:.2}s",
        batch.succeeded(),
        batch.processed(),
        batch.fallbacks(),
        start.elapsed().as_secs_f64()
    );

    if let Some(package) = package {
        cmd_package(&batch, &files, &dumper.options().output_dir, package)?;
    }

    if !failed.is_empty() {
        bail!("{} of {} images failed", failed.len(), batch.processed());
    }
    Ok(())
}
