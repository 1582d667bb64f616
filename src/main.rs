use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rssmill::config::{Config, PipelineConfig};
use rssmill::feed::HttpFetcher;
use rssmill::pipeline::{probe, Aggregator, Registration};
use rssmill::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "rssmill", about = "Background RSS/Atom ingestion into SQLite")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, value_name = "FILE", default_value = "rssmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all registered sources until interrupted (Ctrl-C)
    Run,
    /// Probe a feed URL and register it as a new source
    Add {
        /// Feed URL
        url: String,
    },
    /// Probe a feed URL without registering it
    Check {
        /// Feed URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    execute(args.command, &config).await
}

async fn execute(command: Command, config: &Config) -> Result<()> {
    let pipeline = config.pipeline().context("Invalid configuration")?;

    let fetcher = HttpFetcher::new(
        reqwest::Client::builder()
            .user_agent(concat!("rssmill/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?,
    );

    match command {
        // Validation only: never touches the database
        Command::Check { url } => {
            let url = url.trim();
            probe(&fetcher, url, pipeline.source_timeout())
                .await
                .with_context(|| format!("{} is not a readable feed", url))?;
            println!("OK: {}", url);
        }
        Command::Add { url } => {
            let aggregator = Aggregator::new(pipeline, open_database(config).await?, fetcher);
            match aggregator.add_source(&url).await? {
                Registration::Added(source) => {
                    println!("Added source {} ({})", source.id, source.url);
                }
                Registration::AlreadyExists => {
                    println!("Source already registered: {}", url.trim());
                }
            }
        }
        Command::Run => run(pipeline, open_database(config).await?, fetcher).await?,
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::open(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database))
}

async fn run(pipeline: PipelineConfig, db: Database, fetcher: HttpFetcher) -> Result<()> {
    let mut aggregator = Aggregator::new(pipeline, db, fetcher);
    aggregator.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    aggregator.stop().await;
    Ok(())
}
