use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use layerforge::{
    CancelToken, Collection, ForgeConfig, FsStore, GenerationOutcome, StoreCatalog, TraitCatalog,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "layerforge", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one directory of images per layer into the store.
    Ingest(IngestArgs),
    /// Generate a batch of unique artifacts.
    Generate(GenerateArgs),
    /// Export every stored artifact as a zip of PNGs plus CSV metadata.
    Export(ExportArgs),
    /// List layers, trait names, and the remaining combination space.
    Layers(StoreArgs),
    /// Delete every generated artifact from the store.
    Reset(StoreArgs),
}

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Store directory.
    #[arg(long)]
    store: PathBuf,
}

#[derive(Parser, Debug)]
struct IngestArgs {
    /// Store directory.
    #[arg(long)]
    store: PathBuf,

    /// Layer directory; repeat in paint order (bottom layer first).
    #[arg(long = "layer", required = true)]
    layers: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Store directory.
    #[arg(long)]
    store: PathBuf,

    /// Generation settings JSON; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Canvas edge in pixels.
    #[arg(long)]
    canvas_size: Option<u32>,

    /// Number of artifacts to generate.
    #[arg(long)]
    batch_size: Option<usize>,

    /// RNG seed for a reproducible batch.
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the zip archive here.
    #[arg(long)]
    zip: Option<PathBuf>,

    /// Also write the CSV metadata here.
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Store directory.
    #[arg(long)]
    store: PathBuf,

    /// Output zip path.
    #[arg(long, default_value = "nfts.zip")]
    zip: PathBuf,

    /// Output CSV path.
    #[arg(long, default_value = "metadata.csv")]
    csv: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Ingest(args) => cmd_ingest(args),
        Command::Generate(args) => cmd_generate(args),
        Command::Export(args) => cmd_export(args),
        Command::Layers(args) => cmd_layers(args),
        Command::Reset(args) => cmd_reset(args),
    }
}

fn open_store(path: &Path) -> anyhow::Result<FsStore> {
    FsStore::open(path).with_context(|| format!("open store '{}'", path.display()))
}

fn cmd_ingest(args: IngestArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let catalog = StoreCatalog::new(&store);
    let counts = layerforge::catalog::ingest::ingest_dirs(&catalog, &args.layers)
        .context("ingest layers")?;
    for (index, (dir, count)) in args.layers.iter().zip(&counts).enumerate() {
        println!("layer {index}: {count} traits from {}", dir.display());
    }
    Ok(())
}

fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => ForgeConfig::from_json_file(path)?,
        None => ForgeConfig::default(),
    };
    if let Some(v) = args.canvas_size {
        cfg.canvas_size = v;
    }
    if let Some(v) = args.batch_size {
        cfg.batch_size = v;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    let request = cfg.request().context("invalid generation settings")?;

    let store = open_store(&args.store)?;
    let catalog = StoreCatalog::new(&store);
    let mut collection = Collection::open(&store).context("open collection")?;

    let report = collection
        .generate(&catalog, &request, &CancelToken::new())
        .context("generate batch")?;

    println!(
        "generated {} of {} requested ({} total)",
        report.artifacts.len(),
        report.requested,
        collection.registry().count()
    );
    for failure in &report.decode_failures {
        println!("  skipped: {failure}");
    }

    if args.zip.is_some() || args.csv.is_some() {
        let zip = args.zip.unwrap_or_else(|| PathBuf::from("nfts.zip"));
        let csv = args.csv.unwrap_or_else(|| PathBuf::from("metadata.csv"));
        layerforge::export_to_paths(collection.artifacts(), &zip, &csv)?;
        println!("wrote {} and {}", zip.display(), csv.display());
    }

    match report.outcome {
        GenerationOutcome::Completed => Ok(()),
        GenerationOutcome::Exhausted => {
            println!("combination space exhausted");
            Ok(())
        }
        GenerationOutcome::Unrenderable => {
            println!("remaining combinations need trait images that failed to decode");
            Ok(())
        }
        GenerationOutcome::Aborted(e) => Err(anyhow::Error::new(e).context("batch aborted")),
    }
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let collection = Collection::open(&store).context("open collection")?;
    layerforge::export_to_paths(collection.artifacts(), &args.zip, &args.csv)?;
    println!(
        "wrote {} artifacts to {} and {}",
        collection.registry().count(),
        args.zip.display(),
        args.csv.display()
    );
    Ok(())
}

fn cmd_layers(args: StoreArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let catalog = StoreCatalog::new(&store);
    for layer in catalog.layers()? {
        let names: Vec<&str> = layer.traits.iter().map(|t| t.name.as_str()).collect();
        println!("layer {} ({}): {}", layer.index, names.len(), names.join(", "));
    }

    let collection = Collection::open(&store).context("open collection")?;
    let summary = collection.space(&catalog)?;
    println!(
        "{} participating layers, {} combinations, {} remaining, {} generated",
        summary.layers,
        summary.space,
        summary.remaining,
        collection.registry().count()
    );
    Ok(())
}

fn cmd_reset(args: StoreArgs) -> anyhow::Result<()> {
    let store = open_store(&args.store)?;
    let mut collection = Collection::open(&store).context("open collection")?;
    let n = collection.registry().count();
    collection.reset()?;
    println!("removed {n} artifacts");
    Ok(())
}
