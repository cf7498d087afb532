use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::twt::Twter;

/// A remote feed to fetch, unique by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub nick: String,
    pub url: String,
}

impl Source {
    pub fn new(nick: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            url: url.into(),
        }
    }

    /// The author attached to every twt parsed from this source, using the
    /// URL the feed was actually served from.
    pub fn twter(&self, resolved_url: &str) -> Twter {
        Twter::new(&self.nick, resolved_url)
    }
}

pub type SharedSourceList = Arc<RwLock<Vec<Source>>>;

pub fn shared_source_list(initial: Vec<Source>) -> SharedSourceList {
    Arc::new(RwLock::new(initial))
}

pub async fn add_source(store: &SharedSourceList, source: Source) {
    let mut sources = store.write().await;
    sources.retain(|existing| existing.url != source.url);
    sources.push(source);
}

pub async fn remove_source(store: &SharedSourceList, url: &str) -> Option<Source> {
    let mut sources = store.write().await;
    let index = sources.iter().position(|existing| existing.url == url)?;
    Some(sources.remove(index))
}

pub async fn list_sources(store: &SharedSourceList) -> Vec<Source> {
    store.read().await.clone()
}

/// Rewrites configured URLs that were redirected elsewhere. Returns how many
/// sources changed.
pub async fn rewrite_urls(store: &SharedSourceList, redirects: &HashMap<String, String>) -> usize {
    let mut sources = store.write().await;
    let mut changed = 0;
    for source in sources.iter_mut() {
        if let Some(target) = redirects.get(&source.url) {
            source.url = target.clone();
            changed += 1;
        }
    }
    let mut seen = HashSet::new();
    sources.retain(|source| seen.insert(source.url.clone()));
    changed
}

/// Deduplicates by URL, keeping the first nick seen for each.
pub fn unique_by_url(sources: impl IntoIterator<Item = Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen.insert(source.url.clone()))
        .collect()
}
