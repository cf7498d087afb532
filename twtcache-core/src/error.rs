use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid twt line")]
    InvalidLine,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid feed: none of {lines} lines could be parsed")]
    InvalidFeed { lines: usize },
    #[error("error reading feed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("twt {0} already archived")]
    AlreadyArchived(String),
    #[error("twt {0} not found in archive")]
    NotArchived(String),
    #[error("invalid twt hash: {0}")]
    InvalidHash(String),
    #[error("archive i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error decoding cache (current: {current}; legacy: {legacy})")]
    Decode {
        current: serde_json::Error,
        legacy: serde_json::Error,
    },
    #[error("unsupported cache version {0}")]
    UnsupportedVersion(u32),
    #[error("error encoding cache: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid source url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("feed parsing error: {0}")]
    Parse(#[from] ParseError),
    #[error("fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("update channel closed unexpectedly")]
    UpdateChannelClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to find the configuration directory")]
    NoConfigDir,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
