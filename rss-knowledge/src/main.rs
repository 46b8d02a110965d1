use anyhow::{Context, Result};
use clap::Parser;
use interfaces::SqliteKnowledgeStore;
use rss_knowledge::{load_feed_sources, parse_feed_sources, IngestionPipeline, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rss-knowledge", about = "Ingests RSS feeds into a knowledge store")]
struct Args {
    /// JSON file with the feed list
    #[arg(long, env = "RSS_FEEDS_FILE")]
    feeds: Option<PathBuf>,

    /// Inline JSON feed list, used when no file is given
    #[arg(long, env = "RSS_FEEDS", hide_env_values = true)]
    feeds_json: Option<String>,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://rss_knowledge.db")]
    database_url: String,

    /// Age after which articles are swept, at most ten years
    #[arg(long, default_value_t = 72, value_parser = clap::value_parser!(i64).range(1..=87_600))]
    retention_hours: i64,

    /// Pause between expiration sweeps, at most one week
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=10_080))]
    sweep_interval_minutes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let sources = match (&args.feeds, &args.feeds_json) {
        (Some(path), _) => load_feed_sources(path)
            .with_context(|| format!("loading feeds from {}", path.display()))?,
        (None, Some(json)) => parse_feed_sources(json).context("parsing RSS_FEEDS")?,
        (None, None) => Vec::new(),
    };

    info!("Opening knowledge store at {}", args.database_url);
    let store = SqliteKnowledgeStore::connect(&args.database_url)
        .await
        .context("connecting to the knowledge store")?;
    store.setup_schema().await?;

    let config = PipelineConfig {
        retention: chrono::Duration::hours(args.retention_hours),
        sweep_interval: Duration::from_secs(args.sweep_interval_minutes * 60),
        ..PipelineConfig::default()
    };

    let pipeline = IngestionPipeline::new(sources, Arc::new(store), config);
    pipeline.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    pipeline.stop().await;

    Ok(())
}
