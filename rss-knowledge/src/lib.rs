pub mod aggregator;
pub mod config;
pub mod digest;
pub mod fetcher;
pub mod identity;
pub mod markdown;
pub mod parser;
pub mod pipeline;
pub mod reconciler;
pub mod sweeper;
pub mod types;

pub use aggregator::FeedIngestor;
pub use config::{load_feed_sources, parse_feed_sources, PipelineConfig};
pub use digest::HeadlineAggregator;
pub use fetcher::Fetcher;
pub use parser::parse_feed;
pub use pipeline::IngestionPipeline;
pub use reconciler::Reconciler;
pub use sweeper::ExpirationSweeper;
pub use types::*;
