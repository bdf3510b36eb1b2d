use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskmirror::config::Config;
use taskmirror::manifest::Manifest;
use taskmirror::pivot::PivotWorker;
use taskmirror::DataLayer;

#[derive(Parser, Debug)]
#[command(name = "taskmirror")]
#[command(about = "Inspect and sync the local task cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskmirror/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List cached tables with their record counts
  Tables,
  /// Print every readable record of a table as JSON
  Dump { table: String },
  /// Fetch a table from the API and update the cache
  Sync { table: String },
  /// Check a signed manifest file against the server key
  Verify { manifest: PathBuf },
  /// Switch encryption of a collection for this session
  Encryption { collection: String, mode: Toggle },
  /// Count a table's records by two fields
  Pivot {
    table: String,
    row: String,
    col: String,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
  On,
  Off,
}

/// Log to a daily file in the data directory, and to stderr when verbose.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(verbose: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "taskmirror=info".into());

  let (file_layer, guard) = match dirs::data_dir() {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir.join("taskmirror"), "taskmirror.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        ),
        Some(guard),
      )
    }
    None => (None, None),
  };

  let stderr_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose);

  let config = Config::load(args.config.as_deref())?;
  let layer = DataLayer::open(&config)?;
  let startup = layer.init().await?;
  if startup.unreadable > 0 {
    eprintln!(
      "warning: {} cached records are unreadable with the current key or policy",
      startup.unreadable
    );
  }

  match args.command {
    Command::Tables => tables(&layer),
    Command::Dump { table } => dump(&layer, &table).await,
    Command::Sync { table } => sync(&layer, &table).await,
    Command::Verify { manifest } => verify(&layer, &manifest).await,
    Command::Encryption { collection, mode } => {
      layer
        .policy()
        .set_encryption(&collection, matches!(mode, Toggle::On));
      for (name, encrypted) in layer.policy().overrides() {
        println!("{:<20} {}", name, if encrypted { "encrypted" } else { "plaintext" });
      }
      Ok(())
    }
    Command::Pivot { table, row, col } => pivot(&layer, &table, &row, &col).await,
  }
}

fn tables(layer: &DataLayer) -> Result<()> {
  for table in layer.registry.tables() {
    let count = match layer.registry.get(table) {
      Some(cache) => cache.count()?,
      None => 0,
    };
    let mode = if layer.policy().should_encrypt(table) {
      "encrypted"
    } else {
      "plaintext"
    };
    println!("{:<20} {:>8}  {}", table, count, mode);
  }
  Ok(())
}

async fn dump(layer: &DataLayer, table: &str) -> Result<()> {
  let cache = layer
    .registry
    .get(table)
    .ok_or_else(|| eyre!("Unknown table: {}", table))?;

  for record in cache.snapshot().await? {
    println!("{}", serde_json::to_string(&record)?);
  }
  Ok(())
}

async fn sync(layer: &DataLayer, table: &str) -> Result<()> {
  let summary = layer.registry.refresh_table(table).await?;
  info!(table, upserted = summary.upserted, removed = summary.removed, "Synced from CLI");
  println!(
    "{}: {} upserted, {} removed ({})",
    table,
    summary.upserted,
    summary.removed,
    if summary.incremental {
      "incremental"
    } else {
      "full"
    }
  );
  Ok(())
}

async fn verify(layer: &DataLayer, path: &Path) -> Result<()> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read manifest {}: {}", path.display(), e))?;
  let manifest: Manifest = serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse manifest {}: {}", path.display(), e))?;

  if layer.verifier.verify(&manifest).await? {
    println!("{}: valid (kid {})", path.display(), manifest.kid);
    Ok(())
  } else {
    Err(eyre!("{}: signature does not match", path.display()))
  }
}

async fn pivot(layer: &DataLayer, table: &str, row: &str, col: &str) -> Result<()> {
  let cache = layer
    .registry
    .get(table)
    .ok_or_else(|| eyre!("Unknown table: {}", table))?;
  let records = cache.snapshot().await?;

  let worker = PivotWorker::spawn()?;
  let matrix = worker.pivot(records, row, col).await?;

  print!("{:<20}", "");
  for label in &matrix.cols {
    print!(" {:>10}", label);
  }
  println!();
  for (label, counts) in matrix.rows.iter().zip(&matrix.counts) {
    print!("{:<20}", label);
    for count in counts {
      print!(" {:>10}", count);
    }
    println!();
  }
  Ok(())
}
