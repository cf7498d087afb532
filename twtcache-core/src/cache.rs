use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::twt::{Twt, Twts};

pub const CACHE_FILE: &str = "cache";
pub const CACHE_VERSION: u32 = 1;

/// The current twts of one source plus the `Last-Modified` header they were
/// served with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedFeed {
    pub twts: Twts,
    #[serde(default)]
    pub last_modified: String,
    // hash -> index into `twts`, built on first lookup
    #[serde(skip)]
    by_hash: OnceCell<HashMap<String, usize>>,
}

impl CachedFeed {
    pub fn new(twts: Twts, last_modified: impl Into<String>) -> Self {
        Self {
            twts,
            last_modified: last_modified.into(),
            by_hash: OnceCell::new(),
        }
    }

    fn find(&self, hash: &str) -> Option<&Twt> {
        let index = self.by_hash.get_or_init(|| {
            self.twts
                .iter()
                .enumerate()
                .map(|(i, twt)| (twt.hash().to_owned(), i))
                .collect()
        });
        index.get(hash).and_then(|&i| self.twts.get(i))
    }
}

// Cache file layout. Version 1 wraps the per-source map; files written before
// the wrapper existed hold the bare map and are migrated on load. Only that
// single hop is supported.
#[derive(Serialize)]
struct PersistedCacheRef<'a> {
    version: u32,
    feeds: &'a HashMap<String, CachedFeed>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistedCache {
    version: u32,
    feeds: HashMap<String, CachedFeed>,
}

type LegacyCache = HashMap<String, CachedFeed>;

#[derive(Debug)]
struct Aggregate {
    prefix: String,
    twts: Twts,
    stale: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    feeds: HashMap<String, CachedFeed>,
    // "prefix:<prefix>" -> memoized get_by_prefix result
    aggregates: HashMap<String, Aggregate>,
}

impl CacheState {
    fn mark_stale(&mut self, url: &str) {
        for aggregate in self.aggregates.values_mut() {
            if url.starts_with(aggregate.prefix.as_str()) {
                aggregate.stale = true;
            }
        }
    }
}

/// Process-wide cache of the current twts of every source, keyed by source
/// URL. Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    inner: Arc<RwLock<CacheState>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_feeds(feeds: HashMap<String, CachedFeed>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheState {
                feeds,
                aggregates: HashMap::new(),
            })),
        }
    }

    pub fn file_path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(CACHE_FILE)
    }

    /// Loads the cache stored in `dir`. A missing file yields an empty cache.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = Self::file_path(dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file, starting empty");
                return Ok(Self::new());
            }
            Err(err) => return Err(err.into()),
        };
        let feeds = decode(&bytes)?;
        info!(path = %path.display(), sources = feeds.len(), "loaded feed cache");
        Ok(Self::from_feeds(feeds))
    }

    /// Writes the whole cache to `dir`, through a temp file and a rename.
    pub async fn store(&self, dir: impl AsRef<Path>) -> Result<(), CacheError> {
        let dir = dir.as_ref();
        let bytes = {
            let state = self.inner.read().await;
            serde_json::to_vec(&PersistedCacheRef {
                version: CACHE_VERSION,
                feeds: &state.feeds,
            })?
        };

        tokio::fs::create_dir_all(dir).await?;
        let path = Self::file_path(dir);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored feed cache");
        Ok(())
    }

    /// When the cache in `dir` was last written; the Unix epoch if never.
    pub async fn last_modified(dir: impl AsRef<Path>) -> Result<DateTime<Utc>, CacheError> {
        match tokio::fs::metadata(Self::file_path(dir)).await {
            Ok(meta) => Ok(meta.modified()?.into()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DateTime::<Utc>::from(UNIX_EPOCH)),
            Err(err) => Err(err.into()),
        }
    }

    /// The `Last-Modified` value recorded for a source, if any.
    pub async fn last_modified_for(&self, url: &str) -> Option<String> {
        let state = self.inner.read().await;
        state
            .feeds
            .get(url)
            .map(|cached| cached.last_modified.clone())
            .filter(|value| !value.is_empty())
    }

    /// Replaces a source's entry wholesale.
    pub async fn replace(&self, url: &str, twts: Twts, last_modified: impl Into<String>) {
        let cached = CachedFeed::new(twts, last_modified);
        let mut state = self.inner.write().await;
        state.feeds.insert(url.to_owned(), cached);
        state.mark_stale(url);
    }

    /// Finds a twt by hash in any source.
    pub async fn lookup(&self, hash: &str) -> Option<Twt> {
        let state = self.inner.read().await;
        state.feeds.values().find_map(|cached| cached.find(hash).cloned())
    }

    pub async fn get_by_url(&self, url: &str) -> Twts {
        let state = self.inner.read().await;
        state
            .feeds
            .get(url)
            .map(|cached| cached.twts.clone())
            .unwrap_or_default()
    }

    /// All twts of sources whose URL starts with `prefix`, in no particular
    /// order. The result is memoized until a matching source changes or
    /// `refresh` is set.
    pub async fn get_by_prefix(&self, prefix: &str, refresh: bool) -> Twts {
        let key = format!("prefix:{prefix}");
        if !refresh {
            let state = self.inner.read().await;
            if let Some(aggregate) = state.aggregates.get(&key) {
                if !aggregate.stale {
                    return aggregate.twts.clone();
                }
            }
        }

        let mut state = self.inner.write().await;
        let twts: Twts = state
            .feeds
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .flat_map(|(_, cached)| cached.twts.iter().cloned())
            .collect();
        let aggregate = Aggregate {
            prefix: prefix.to_owned(),
            twts: twts.clone(),
            stale: false,
        };
        debug!(prefix, twts = twts.len(), "rebuilt prefix aggregate");
        state.aggregates.insert(key, aggregate);
        twts
    }

    /// Every cached twt of every source, without deduplication.
    pub async fn get_all(&self) -> Twts {
        let state = self.inner.read().await;
        state
            .feeds
            .values()
            .flat_map(|cached| cached.twts.iter().cloned())
            .collect()
    }

    /// Twts mentioning the feed at `user_url`, deduplicated by hash.
    pub async fn get_mentions(&self, user_url: &str) -> Twts {
        let state = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut twts = Twts::new();
        for twt in state.feeds.values().flat_map(|cached| cached.twts.iter()) {
            if twt.mentions().iter().any(|mention| mention.url == user_url)
                && seen.insert(twt.hash().to_owned())
            {
                twts.push(twt.clone());
            }
        }
        twts
    }

    /// Drops the entries of the given sources entirely.
    pub async fn delete<'a>(&self, urls: impl IntoIterator<Item = &'a str>) {
        let mut state = self.inner.write().await;
        for url in urls {
            if state.feeds.remove(url).is_some() {
                state.mark_stale(url);
            } else {
                warn!(url, "no cached feed to delete");
            }
        }
    }

    /// Total number of cached twts.
    pub async fn count(&self) -> usize {
        let state = self.inner.read().await;
        state.feeds.values().map(|cached| cached.twts.len()).sum()
    }

    pub async fn source_count(&self) -> usize {
        self.inner.read().await.feeds.len()
    }

    pub async fn urls(&self) -> Vec<String> {
        self.inner.read().await.feeds.keys().cloned().collect()
    }
}

fn decode(bytes: &[u8]) -> Result<HashMap<String, CachedFeed>, CacheError> {
    let current = match serde_json::from_slice::<PersistedCache>(bytes) {
        Ok(persisted) if persisted.version == CACHE_VERSION => return Ok(persisted.feeds),
        Ok(persisted) => return Err(CacheError::UnsupportedVersion(persisted.version)),
        Err(err) => err,
    };

    match serde_json::from_slice::<LegacyCache>(bytes) {
        Ok(feeds) => {
            warn!(error = %current, sources = feeds.len(), "decoded cache in legacy format, migrating");
            Ok(feeds)
        }
        Err(legacy) => Err(CacheError::Decode { current, legacy }),
    }
}
