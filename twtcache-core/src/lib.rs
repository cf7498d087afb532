pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod parser;
pub mod poller;
pub mod registry;
pub mod twt;

pub use archive::{Archiver, DiskArchiver, NullArchiver};
pub use cache::{Cache, CachedFeed};
pub use config::Config;
pub use error::{ArchiveError, CacheError, ConfigError, FetchError, ParseError, PollError};
pub use feed::shared_source_list;
pub use feed::{add_source, list_sources, remove_source};
pub use feed::{SharedSourceList, Source};
pub use fetcher::{FetchConfig, FetchMetrics, Fetcher, SourceStatus};
pub use parser::{parse_file, parse_file_at, parse_line, parse_time, ParsedFeed};
pub use poller::{poll_once, spawn_poller, Event, PollConfig, PollContext, PollerHandle};
pub use registry::Registry;
pub use twt::{Twt, Twter, Twts};
