use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use twtcache_core::{
    shared_source_list, spawn_poller, Archiver, Cache, Config, DiskArchiver, Event, Fetcher,
    NullArchiver, PollContext, Registry,
};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = load_config();
    let data_dir = config.data_dir.clone();
    info!(data_dir = %data_dir.display(), base_url = %config.base_url, "starting twtcache");

    let fetcher = match Fetcher::from_config(config.fetch_config()) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            error!(error = %err, "failed to build HTTP client");
            std::process::exit(1);
        }
    };
    let cache = load_cache(&data_dir).await;
    let archive = open_archive(&data_dir);
    let registry = Registry::load_from_dir(shared_source_list(Vec::new()), cache.clone(), &data_dir).await;

    let (update_tx, mut update_rx) = mpsc::channel(16);
    let poller = spawn_poller(
        registry.shared(),
        config.poll_config(),
        PollContext {
            fetcher: fetcher.clone(),
            cache: cache.clone(),
            archive,
        },
        update_tx,
    );

    loop {
        tokio::select! {
            event = update_rx.recv() => match event {
                Some(Event::CycleCompleted { sources, cached, redirects }) => {
                    info!(sources, cached, failures = fetcher.metrics().failures(), "cycle completed");
                    registry.apply_redirects(&redirects).await;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Err(err) = poller.stop().await {
        warn!(error = %err, "poller did not stop cleanly");
    }
    if let Err(err) = cache.store(&data_dir).await {
        error!(error = %err, "error saving feed cache on shutdown");
        std::process::exit(1);
    }
    info!("feed cache saved");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config() -> Config {
    // TWTCACHE_CONFIG overrides ~/.config/twtcache/config.json
    match std::env::var_os("TWTCACHE_CONFIG") {
        Some(path) => Config::load_or_default(&PathBuf::from(path)),
        None => Config::load(),
    }
}

async fn load_cache(data_dir: &Path) -> Cache {
    match Cache::load(data_dir).await {
        Ok(cache) => cache,
        Err(err) => {
            warn!(error = %err, "unable to load feed cache, starting empty");
            Cache::new()
        }
    }
}

fn open_archive(data_dir: &Path) -> Arc<dyn Archiver> {
    match DiskArchiver::in_data_dir(data_dir) {
        Ok(archive) => Arc::new(archive),
        Err(err) => {
            warn!(error = %err, "unable to open archive, archiving disabled");
            Arc::new(NullArchiver)
        }
    }
}
