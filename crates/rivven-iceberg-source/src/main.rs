//! rivven-iceberg-source - incremental Apache Iceberg extraction
//!
//! Events are written to stdout as JSON lines; logs go to stderr.
//!
//! ```bash
//! # Validate configuration
//! rivven-iceberg-source -c iceberg.yaml validate
//!
//! # Print the stream catalog
//! rivven-iceberg-source -c iceberg.yaml discover
//!
//! # Read all selected streams, resuming from saved state
//! rivven-iceberg-source -c iceberg.yaml read --state state.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use rivven_iceberg_source::{IcebergSource, IcebergSourceConfig, State};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "rivven-iceberg-source")]
#[command(version, about = "Incremental Apache Iceberg source for Rivven")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ICEBERG_SOURCE_CONFIG", default_value = "iceberg.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,
    /// Print the catalog of discovered streams as JSON
    Discover,
    /// Read selected streams and print events as JSON lines
    Read {
        /// State file from a previous run
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Print the JSON schema of the configuration
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Schema = cli.command {
        println!(
            "{}",
            serde_json::to_string_pretty(&IcebergSourceConfig::json_schema())?
        );
        return Ok(());
    }

    let config = IcebergSourceConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Validate => validate_config(&config),
        Commands::Discover => discover(config).await,
        Commands::Read { state } => read(config, state).await,
        Commands::Schema => Ok(()),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn validate_config(config: &IcebergSourceConfig) -> Result<()> {
    println!("✓ Configuration valid!\n");
    println!("Catalog:");
    println!("  Type: {:?}", config.catalog.catalog_type);
    println!("  Name: {}", config.catalog.name);
    if let Some(ref rest) = config.catalog.rest {
        println!("  URI: {}", rest.uri);
    }
    if !config.namespaces.is_empty() {
        println!("Namespaces: {}", config.namespaces.join(", "));
    }
    if !config.tables.is_empty() {
        println!("Tables: {}", config.tables.join(", "));
    }
    for (name, overrides) in &config.streams {
        println!(
            "Stream {}: selected={}, replication_key={}",
            name,
            overrides.selected,
            overrides.replication_key.as_deref().unwrap_or("<sort order>")
        );
    }
    Ok(())
}

async fn discover(config: IcebergSourceConfig) -> Result<()> {
    let source = IcebergSource::connect(config)
        .await
        .context("Failed to connect to catalog")?;
    let catalog = source.discover();
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

async fn read(config: IcebergSourceConfig, state_path: Option<PathBuf>) -> Result<()> {
    let state = match state_path {
        Some(path) => Some(
            State::from_file(&path)
                .with_context(|| format!("Failed to load state from {}", path.display()))?,
        ),
        None => None,
    };

    let source = IcebergSource::connect(config)
        .await
        .context("Failed to connect to catalog")?;

    let mut events = source.read(state);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0u64;
    while let Some(event) = events.next().await {
        let event = event.context("Read failed")?;
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.flush()?;

    info!(events = count, "Read complete");
    Ok(())
}
