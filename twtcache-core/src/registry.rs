use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::feed::{add_source, list_sources, remove_source, rewrite_urls, SharedSourceList, Source};

pub const SOURCES_FILE: &str = "sources.json";

/// The persisted list of followed sources, kept consistent with the cache:
/// unfollowing a source drops its cached twts.
#[derive(Debug, Clone)]
pub struct Registry {
    sources: SharedSourceList,
    cache: Cache,
    sources_path: PathBuf,
}

impl Registry {
    /// Loads `sources.json` from `dir` into the shared list.
    pub async fn load_from_dir(sources: SharedSourceList, cache: Cache, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let sources_path = dir.join(SOURCES_FILE);

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "failed to create data dir");
        }

        let initial: Vec<Source> = read_json_with_tmp_fallback(&sources_path).await;
        if !initial.is_empty() {
            info!(sources = initial.len(), "loaded sources");
            let mut store = sources.write().await;
            *store = initial;
        }

        Self {
            sources,
            cache,
            sources_path,
        }
    }

    pub fn shared(&self) -> SharedSourceList {
        self.sources.clone()
    }

    async fn persist_sources(&self) {
        let sources = list_sources(&self.sources).await;
        match serde_json::to_vec_pretty(&sources) {
            Ok(bytes) => {
                if let Some(parent) = self.sources_path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                let tmp = self.sources_path.with_extension("json.tmp");
                if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
                    warn!(error = %e, path = %tmp.display(), "failed to write temp sources.json");
                    return;
                }
                if let Err(e) = tokio::fs::rename(&tmp, &self.sources_path).await {
                    warn!(error = %e, path = %self.sources_path.display(), "failed to persist sources.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize sources for persistence"),
        }
    }

    pub async fn add_source(&self, source: Source) {
        add_source(&self.sources, source).await;
        self.persist_sources().await;
    }

    /// Unfollows a source and drops its cached twts.
    pub async fn remove_source(&self, url: &str) {
        if remove_source(&self.sources, url).await.is_some() {
            self.persist_sources().await;
        }
        self.cache.delete([url]).await;
    }

    pub async fn list_sources(&self) -> Vec<Source> {
        list_sources(&self.sources).await
    }

    /// Follows redirects permanently: rewrites the persisted URLs and drops
    /// the cache entries kept under the old ones.
    pub async fn apply_redirects(&self, redirects: &HashMap<String, String>) -> usize {
        if redirects.is_empty() {
            return 0;
        }
        let changed = rewrite_urls(&self.sources, redirects).await;
        if changed > 0 {
            info!(changed, "rewrote redirected sources");
            self.persist_sources().await;
            self.cache.delete(redirects.keys().map(String::as_str)).await;
        }
        changed
    }
}

// Falls back to the temp file of an interrupted write when the main file is
// corrupt.
async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(_) => Default::default(),
    }
}
