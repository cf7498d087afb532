use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{redirect, Client, ClientBuilder, Response, StatusCode};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::Archiver;
use crate::cache::Cache;
use crate::error::{ArchiveError, FetchError, ParseError};
use crate::feed::{unique_by_url, Source};
use crate::parser::parse_file;
use crate::twt::Twts;

pub const MAX_FETCHERS: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_FETCH_BYTES: u64 = 1 << 21;
pub const DEFAULT_MAX_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 10);
pub const DEFAULT_MAX_CACHE_ITEMS: usize = 150;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound on simultaneous outbound requests.
    pub max_fetchers: usize,
    pub request_timeout: Duration,
    /// Feed bodies are cut off after this many bytes.
    pub max_fetch_bytes: u64,
    pub max_cache_ttl: Duration,
    pub max_cache_items: usize,
    /// Fetches still running this long after the cycle started are aborted.
    pub cycle_deadline: Option<Duration>,
    pub base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_fetchers: MAX_FETCHERS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            max_cache_ttl: DEFAULT_MAX_CACHE_TTL,
            max_cache_items: DEFAULT_MAX_CACHE_ITEMS,
            cycle_deadline: None,
            base_url: String::new(),
        }
    }
}

impl FetchConfig {
    pub fn user_agent(&self) -> String {
        let version = env!("CARGO_PKG_VERSION");
        if self.base_url.is_empty() {
            format!("twtcache/{version}")
        } else {
            format!("twtcache/{version} (+{})", self.base_url)
        }
    }

    pub fn build_client(&self) -> Result<Client, FetchError> {
        Ok(ClientBuilder::new()
            .redirect(redirect::Policy::limited(5))
            .user_agent(self.user_agent())
            .timeout(self.request_timeout)
            .build()?)
    }
}

/// Outcome of the latest fetch of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Updated { twts: usize, overflow: usize },
    NotModified,
    /// The body was served but not a single line of it parsed.
    InvalidFeed,
    Failed(String),
}

/// Counters and gauges describing fetch activity.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    sources: AtomicUsize,
    cached: AtomicUsize,
    last_cycle_millis: AtomicU64,
    cycles: AtomicU64,
    archived: AtomicU64,
    archive_failures: AtomicU64,
    invalid_feeds: AtomicU64,
    failures: AtomicU64,
}

struct InFlight<'a>(&'a FetchMetrics);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FetchMetrics {
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous fetches during the latest cycle.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> usize {
        self.sources.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.cached.load(Ordering::Relaxed)
    }

    pub fn last_cycle(&self) -> Duration {
        Duration::from_millis(self.last_cycle_millis.load(Ordering::Relaxed))
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn archived(&self) -> u64 {
        self.archived.load(Ordering::Relaxed)
    }

    pub fn archive_failures(&self) -> u64 {
        self.archive_failures.load(Ordering::Relaxed)
    }

    pub fn invalid_feeds(&self) -> u64 {
        self.invalid_feeds.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Fetches sources concurrently into a [`Cache`], pushing overflowing twts
/// to an [`Archiver`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    config: Arc<FetchConfig>,
    metrics: Arc<FetchMetrics>,
    statuses: Arc<RwLock<HashMap<String, SourceStatus>>>,
    redirects: Arc<RwLock<HashMap<String, String>>>,
}

impl Fetcher {
    pub fn new(client: Client, config: FetchConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            metrics: Arc::new(FetchMetrics::default()),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            redirects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Builds a fetcher with its own HTTP client configured from `config`.
    pub fn from_config(config: FetchConfig) -> Result<Self, FetchError> {
        let client = config.build_client()?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &FetchMetrics {
        &self.metrics
    }

    pub async fn status(&self, url: &str) -> Option<SourceStatus> {
        self.statuses.read().await.get(url).cloned()
    }

    /// Configured URL -> URL actually served, for sources redirected during
    /// the latest cycle.
    pub async fn redirects(&self) -> HashMap<String, String> {
        self.redirects.read().await.clone()
    }

    /// Runs one fetch cycle over `sources`. Failures are per source: they are
    /// logged, counted and recorded as a [`SourceStatus`], and the source
    /// keeps whatever the cache held before.
    pub async fn fetch_all(&self, sources: &[Source], cache: &Cache, archive: &Arc<dyn Archiver>) {
        let started = Instant::now();
        let deadline = self
            .config
            .cycle_deadline
            .map(|limit| tokio::time::Instant::now() + limit);
        let sources = unique_by_url(sources.iter().cloned());
        let total = sources.len();

        self.redirects.write().await.clear();
        self.metrics.peak_in_flight.store(0, Ordering::SeqCst);

        let permits = Arc::new(Semaphore::new(self.config.max_fetchers.max(1)));
        let mut tasks = JoinSet::new();
        let mut urls = HashMap::new();
        for source in sources {
            let url = source.url.clone();
            let permits = permits.clone();
            let fetcher = self.clone();
            let cache = cache.clone();
            let archive = archive.clone();
            let handle = tasks.spawn(async move {
                let status = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        let _in_flight = fetcher.metrics.enter();
                        fetcher.fetch_source(&source, &cache, archive).await
                    }
                    Err(err) => SourceStatus::Failed(err.to_string()),
                };
                (source.url, status)
            });
            urls.insert(handle.id(), url);
        }

        let mut updated = 0usize;
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(pending = tasks.len(), "fetch cycle deadline reached, aborting remaining fetches");
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next().await {
                            match joined {
                                Ok((url, status)) => updated += self.record_status(url, status).await,
                                Err(err) if err.is_cancelled() => {
                                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                                    if let Some(url) = urls.remove(&err.id()) {
                                        let status = SourceStatus::Failed("aborted at cycle deadline".to_owned());
                                        self.record_status(url, status).await;
                                    }
                                }
                                Err(err) => {
                                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                                    warn!(error = %FetchError::Task(err), "fetch task did not complete");
                                }
                            }
                        }
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            let Some(joined) = next else { break };

            match joined {
                Ok((url, status)) => updated += self.record_status(url, status).await,
                Err(err) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %FetchError::Task(err), "fetch task did not complete");
                }
            }
        }

        let elapsed = started.elapsed();
        let sources_cached = cache.source_count().await;
        let cached = cache.count().await;
        self.metrics.sources.store(sources_cached, Ordering::Relaxed);
        self.metrics.cached.store(cached, Ordering::Relaxed);
        self.metrics
            .last_cycle_millis
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
        info!(
            sources = total,
            updated,
            cached,
            elapsed_ms = elapsed.as_millis() as u64,
            "fetch cycle finished"
        );
    }

    // Returns 1 when the source was updated, for the cycle summary.
    async fn record_status(&self, url: String, status: SourceStatus) -> usize {
        let updated = usize::from(matches!(status, SourceStatus::Updated { .. }));
        self.statuses.write().await.insert(url, status);
        updated
    }

    async fn fetch_source(&self, source: &Source, cache: &Cache, archive: Arc<dyn Archiver>) -> SourceStatus {
        match self.try_fetch_source(source, cache, archive).await {
            Ok(status) => status,
            Err(FetchError::Parse(err @ ParseError::InvalidFeed { .. })) => {
                self.metrics.invalid_feeds.fetch_add(1, Ordering::Relaxed);
                warn!(nick = %source.nick, url = %source.url, error = %err, "error parsing feed");
                SourceStatus::InvalidFeed
            }
            Err(err) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(nick = %source.nick, url = %source.url, error = %err, "failed to fetch feed");
                SourceStatus::Failed(err.to_string())
            }
        }
    }

    async fn try_fetch_source(
        &self,
        source: &Source,
        cache: &Cache,
        archive: Arc<dyn Archiver>,
    ) -> Result<SourceStatus, FetchError> {
        let requested = Url::parse(&source.url)?;
        let mut request = self.client.get(requested.clone());
        if let Some(last_modified) = cache.last_modified_for(&source.url).await {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;

        let mut url = source.url.clone();
        if response.url() != &requested {
            let resolved = response.url().to_string();
            warn!(nick = %source.nick, from = %source.url, to = %resolved, "feed moved");
            self.redirects
                .write()
                .await
                .insert(source.url.clone(), resolved.clone());
            url = resolved;
        }

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_MODIFIED => {
                debug!(url = %url, "feed not modified");
                return Ok(SourceStatus::NotModified);
            }
            status => return Err(FetchError::Status(status.as_u16())),
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = read_limited(response, self.config.max_fetch_bytes).await?;

        let twter = source.twter(&url);
        let parsed = parse_file(
            &body[..],
            &twter,
            self.config.max_cache_ttl,
            self.config.max_cache_items,
        )?;
        let status = SourceStatus::Updated {
            twts: parsed.current.len(),
            overflow: parsed.overflow.len(),
        };

        cache.replace(&url, parsed.current, last_modified).await;
        self.archive_overflow(archive, parsed.overflow).await;

        Ok(status)
    }

    async fn archive_overflow(&self, archive: Arc<dyn Archiver>, overflow: Twts) {
        if overflow.is_empty() {
            return;
        }

        let result = tokio::task::spawn_blocking(move || {
            let (mut archived, mut failed) = (0u64, 0u64);
            for twt in &overflow {
                if archive.has(twt.hash()) {
                    continue;
                }
                match archive.archive(twt) {
                    Ok(()) => archived += 1,
                    Err(ArchiveError::AlreadyArchived(_)) => {}
                    Err(err) => {
                        failed += 1;
                        warn!(hash = twt.hash(), error = %err, "error archiving twt");
                    }
                }
            }
            (archived, failed)
        })
        .await;

        match result {
            Ok((archived, failed)) => {
                self.metrics.archived.fetch_add(archived, Ordering::Relaxed);
                self.metrics
                    .archive_failures
                    .fetch_add(failed, Ordering::Relaxed);
            }
            Err(err) => warn!(error = %err, "archive task failed"),
        }
    }
}

async fn read_limited(response: Response, limit: u64) -> Result<Bytes, FetchError> {
    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = usize::try_from(limit.saturating_sub(body.len() as u64)).unwrap_or(usize::MAX);
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            debug!(limit, "feed body truncated at fetch limit");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
