use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::archive::Archiver;
use crate::cache::Cache;
use crate::error::PollError;
use crate::feed::{Source, SharedSourceList};
use crate::fetcher::Fetcher;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Where the cache is stored after every cycle.
    pub data_dir: PathBuf,
    /// Prefix of local feeds, warmed after every cycle. Empty to skip.
    pub base_url: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            data_dir: PathBuf::from("./data"),
            base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CycleCompleted {
        sources: usize,
        cached: usize,
        redirects: HashMap<String, String>,
    },
}

/// What a poller works on.
#[derive(Clone)]
pub struct PollContext {
    pub fetcher: Fetcher,
    pub cache: Cache,
    pub archive: Arc<dyn Archiver>,
}

pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    refresh: Arc<Notify>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Requests a cycle now, e.g. right after a local post.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub async fn stop(self) -> Result<(), PollError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(PollError::from)
    }
}

pub fn spawn_poller(
    sources: SharedSourceList,
    config: PollConfig,
    context: PollContext,
    update_tx: mpsc::Sender<Event>,
) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let refresh = Arc::new(Notify::new());
    let refresh_rx = refresh.clone();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("poller shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
                _ = refresh_rx.notified() => {
                    info!("on-demand refresh requested");
                }
            }

            let snapshot = sources.read().await.clone();
            let event = poll_once(&snapshot, &config, &context).await;
            if update_tx.send(event).await.is_err() {
                warn!(error = %PollError::UpdateChannelClosed, "dropping cycle event");
            }
        }
    });

    PollerHandle {
        cancel_tx,
        refresh,
        join,
    }
}

/// Runs one cycle: fetch every source, warm the local prefix aggregate and
/// store the cache.
pub async fn poll_once(sources: &[Source], config: &PollConfig, context: &PollContext) -> Event {
    info!(sources = sources.len(), "updating feeds");
    context
        .fetcher
        .fetch_all(sources, &context.cache, &context.archive)
        .await;

    if !config.base_url.is_empty() {
        let local = context.cache.get_by_prefix(&config.base_url, true).await;
        info!(base_url = %config.base_url, twts = local.len(), "warmed local twts");
    }

    if let Err(err) = context.cache.store(&config.data_dir).await {
        warn!(error = %err, path = %config.data_dir.display(), "error saving feed cache");
    }

    Event::CycleCompleted {
        sources: context.cache.source_count().await,
        cached: context.cache.count().await,
        redirects: context.fetcher.redirects().await,
    }
}
