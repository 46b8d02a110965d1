use crate::aggregator::FeedIngestor;
use crate::config::PipelineConfig;
use crate::sweeper::ExpirationSweeper;
use crate::types::{CycleReport, FeedSource, Result};
use interfaces::{Account, AccountStore, KnowledgeStore};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

enum Lifecycle {
    Uninitialized,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// Schedules polling for every configured source plus the periodic
/// expiration sweep.
pub struct IngestionPipeline {
    sources: Vec<FeedSource>,
    store: Arc<dyn KnowledgeStore>,
    accounts: Arc<dyn AccountStore>,
    config: PipelineConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl IngestionPipeline {
    pub fn new<S>(sources: Vec<FeedSource>, store: Arc<S>, config: PipelineConfig) -> Self
    where
        S: KnowledgeStore + AccountStore + 'static,
    {
        Self {
            sources,
            store: store.clone(),
            accounts: store,
            config,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Registers accounts and spawns the timers. Returns `false` when the
    /// pipeline was already started; the second call changes nothing.
    pub async fn start(&self) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Uninitialized) {
            info!("Ingestion pipeline already started");
            return Ok(false);
        }

        if self.sources.is_empty() {
            info!("No RSS feeds configured");
            *lifecycle = Lifecycle::Running(Vec::new());
            return Ok(true);
        }

        let ingestor = Arc::new(FeedIngestor::new(self.store.clone(), &self.config)?);

        info!("Starting ingestion pipeline with {} sources", self.sources.len());

        let mut handles = Vec::with_capacity(self.sources.len() + 1);
        for source in &self.sources {
            self.ensure_account(source).await;
            handles.push(spawn_source_poller(ingestor.clone(), source.clone()));
        }
        handles.push(self.spawn_sweeper());

        *lifecycle = Lifecycle::Running(handles);
        Ok(true)
    }

    /// Aborts every timer. Calling it before `start` does nothing.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(handles) => {
                for handle in &handles {
                    handle.abort();
                }
                info!("Stopped ingestion pipeline ({} tasks)", handles.len());
            }
            Lifecycle::Uninitialized => *lifecycle = Lifecycle::Uninitialized,
            Lifecycle::Stopped => {}
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    /// Number of live timer tasks.
    pub async fn task_count(&self) -> usize {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(handles) => handles.iter().filter(|h| !h.is_finished()).count(),
            _ => 0,
        }
    }

    /// One cycle over every source, outside of the timers.
    pub async fn run_once(&self) -> Result<Vec<CycleReport>> {
        let ingestor = FeedIngestor::new(self.store.clone(), &self.config)?;
        let mut reports = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if let Some(report) = run_logged(&ingestor, source).await {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    pub async fn sweep_once(&self) -> u64 {
        self.sweeper().sweep(&self.source_ids()).await
    }

    async fn ensure_account(&self, source: &FeedSource) {
        let account = Account {
            id: source.id(),
            name: source.name.clone(),
            details: json!({ "type": "rss-feed", "url": source.url.as_str() }),
        };
        match self.accounts.ensure_account(account).await {
            Ok(true) => debug!("Created account for feed {}", source.name),
            Ok(false) => {}
            Err(e) => error!("Failed to ensure account for feed {}: {}", source.name, e),
        }
    }

    fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(self.store.clone())
            .with_retention(self.config.retention)
            .with_headlines(self.config.include_headlines)
    }

    fn source_ids(&self) -> Vec<uuid::Uuid> {
        self.sources.iter().map(FeedSource::id).collect()
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sweeper = self.sweeper();
        let source_ids = self.source_ids();
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let deleted = sweeper.sweep(&source_ids).await;
                debug!("Expiration sweep deleted {} records", deleted);
            }
        })
    }
}

/// The first tick fires immediately. A tick is only awaited after the
/// previous cycle returned, so cycles of one source never overlap.
fn spawn_source_poller(ingestor: Arc<FeedIngestor>, source: FeedSource) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(source.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_logged(&ingestor, &source).await;
        }
    })
}

async fn run_logged(ingestor: &FeedIngestor, source: &FeedSource) -> Option<CycleReport> {
    match ingestor.run_cycle(source).await {
        Ok(report) => Some(report),
        Err(e) if e.is_transport() => {
            warn!("Failed to fetch RSS feed {}: {}", source.name, e);
            None
        }
        Err(e) => {
            error!("Failed to ingest RSS feed {}: {}", source.name, e);
            None
        }
    }
}
